use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::time::Duration;

/// Exponential inter-arrival times, so requests form a Poisson process of the given rate.
pub struct Poisson<R: Rng + ?Sized> {
    pub rng: Box<R>,
    pub rate: f64,
}

impl Poisson<SmallRng> {
    pub fn new(rate: f64, seed: u64) -> Self {
        Self {
            rng: Box::new(SmallRng::seed_from_u64(seed)),
            rate,
        }
    }

    pub fn from_os_rng(rate: f64) -> Self {
        Self {
            rng: Box::new(SmallRng::from_os_rng()),
            rate,
        }
    }
}

impl<R: Rng> Poisson<R> {
    pub fn time_for_next_event(&mut self) -> Duration {
        let secs = -(1.0f64 - self.rng.random::<f64>()).ln() / self.rate;
        Duration::from_secs_f64(secs)
    }
}
