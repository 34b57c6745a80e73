use clap::Parser;
use color_print::cformat;
use lamport_mutex::{
    config::{BackoffConfig, ClusterConfig, PeerConfig},
    log,
    peer::MutexPeer,
    poisson::Poisson,
    reachability::RetryWithBackoff,
    server::Listener,
    transport::TcpTransport,
    PeerId, RATE,
};
use rand::Rng;
use std::{error::Error, path::PathBuf, sync::Arc, time::Duration};

/// Peer of a distributed mutual exclusion cluster
#[derive(Parser, Debug)]
#[command(name = "lamport-mutex")]
#[command(about = "Run one peer of a Ricart-Agrawala mutual exclusion cluster")]
struct Args {
    /// Id of this peer in the cluster configuration
    #[arg(short, long, default_value_t = 1)]
    id: u32,

    /// JSON file mapping peer ids to addresses (defaults to three local peers)
    #[arg(short, long)]
    peers: Option<PathBuf>,

    /// Mean number of critical section requests per second
    #[arg(long, default_value_t = RATE)]
    rate: f64,

    /// Shortest time spent inside the critical section, in milliseconds
    #[arg(long, default_value_t = 8_000)]
    hold_ms_min: u64,

    /// Longest time spent inside the critical section, in milliseconds
    #[arg(long, default_value_t = 12_000)]
    hold_ms_max: u64,

    /// Stop after this many critical sections
    #[arg(long)]
    rounds: Option<u64>,

    /// Give up on a request after this many milliseconds without every grant
    #[arg(long)]
    grant_timeout_ms: Option<u64>,

    /// Retries before an unreachable peer is dropped from the cluster
    #[arg(long, default_value_t = 5)]
    retries: u32,

    /// Print debug output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = Args::parse();
    log::set_verbose(args.verbose);

    if args.rate <= 0.0 {
        return Err("--rate must be positive".into());
    }
    if args.hold_ms_min > args.hold_ms_max {
        return Err("--hold-ms-min must not exceed --hold-ms-max".into());
    }

    let cluster = match &args.peers {
        Some(path) => ClusterConfig::load(path)?,
        None => ClusterConfig::default(),
    };
    let id = PeerId(args.id);
    let address = cluster
        .address_of(id)
        .ok_or_else(|| format!("Node {id} is not part of the cluster configuration"))?;

    // the listener has to be up before anyone can ask us for permission
    let listener = Listener::bind(address).await?;

    let transport = TcpTransport::new(id, &cluster);
    let connected = transport.connect_all().await;
    log::info(&cformat!(
        "Node <bold>{id}</bold> connected to <bold>{connected}</bold> of <bold>{}</bold> peers.",
        cluster.peers.len() - 1
    ));

    let mut config = PeerConfig::default();
    if let Some(timeout) = args.grant_timeout_ms {
        config = config.with_grant_timeout(Duration::from_millis(timeout));
    }
    let peer = Arc::new(
        MutexPeer::new(id, cluster.peers.keys().copied(), transport)
            .with_config(config)
            .with_policy(RetryWithBackoff::new(BackoffConfig::default(), args.retries)),
    );

    let server = {
        let peer = Arc::clone(&peer);
        tokio::spawn(async move {
            if let Err(e) = listener.serve(peer).await {
                log::error(&format!("{e}"));
            }
        })
    };

    let mut poisson = Poisson::from_os_rng(args.rate);
    let mut rounds = 0;
    loop {
        if args.rounds.is_some_and(|limit| rounds >= limit) {
            break;
        }
        tokio::time::sleep(poisson.time_for_next_event()).await;

        let hold = Duration::from_millis(rand::rng().random_range(args.hold_ms_min..=args.hold_ms_max));
        match peer.run_critical_section(tokio::time::sleep(hold)).await {
            Ok(()) => rounds += 1,
            Err(e) => log::warning(&cformat!("Node <bold>{id}</bold> didn't get the critical section: {e}")),
        }
    }

    log::info(&cformat!("Node <bold>{id}</bold> finished <bold>{rounds}</bold> rounds."));
    // keep answering the others until they are done too
    if let Err(e) = server.await {
        log::error(&format!("Server task failed: {e}"));
    }
    Ok(())
}
