//! Module that contains the coloured terminal logging helpers.

use color_print::cformat;
use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Function that enables or disables `debug` output.
pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::Relaxed);
}

/// Function that tells if `debug` output is enabled.
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

pub fn info(message: &str) {
    println!("{}", cformat!("<green, bold>[INFO]</green, bold> {message}"));
}

pub fn warning(message: &str) {
    println!("{}", cformat!("<yellow, bold>[WARNING]</yellow, bold> {message}"));
}

pub fn error(message: &str) {
    eprintln!("{}", cformat!("<red, bold>[ERROR]</red, bold> {message}"));
}

pub fn debug(message: &str) {
    if is_verbose() {
        println!("{}", cformat!("<blue, bold>[DEBUG]</blue, bold> {message}"));
    }
}
