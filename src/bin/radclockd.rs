//! Daemon entry point: CLI/config loading, logging, signal handling, and the
//! per-server thread spawns described in spec §5. The library crate itself
//! never touches argv, a logger, or process-level signals — only this binary
//! does.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use radclock::algo::MetaParams;
use radclock::cfg::{Cli, Config, VerboseLevel};
use radclock::driver::ServerDriver;
use radclock::error::{ClockError, Result};
use radclock::kernel::{KernelClock, NoopKernelClock};
use radclock::leap::LeapTable;
use radclock::preferred::{Candidate, PreferredSelector};
use radclock::sms::Sms;
use radclock::source::{AsciiReplay, StampSource};
use radclock::stamp::StampQueue;
use radclock::trigger::Trigger;

#[cfg(target_arch = "x86_64")]
use radclock::counter::TscOracle;

fn init_logging(verbose: VerboseLevel) {
    let default_level = match verbose {
        VerboseLevel::Quiet => "warn",
        VerboseLevel::Normal => "info",
        VerboseLevel::High => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// One upstream server's full worker set: trigger thread (network feed) or
/// ascii-replay driver thread, sharing a [`ServerDriver`] and the global
/// candidate table (spec §5 `globaldata_mutex`).
struct ServerWorker {
    join: thread::JoinHandle<()>,
}

fn resolve_server(host: &str) -> Result<SocketAddr> {
    (host, 123u16)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| ClockError::Config(format!("could not resolve server '{host}'")))
}

#[allow(clippy::too_many_arguments)]
fn spawn_live_server(
    server: usize,
    host: String,
    poll_period: u64,
    n_servers: usize,
    meta: MetaParams,
    stop: Arc<AtomicBool>,
    candidates: Arc<Mutex<Vec<Option<Candidate>>>>,
    sms: Arc<Sms>,
    kernel_clock: Arc<dyn KernelClock>,
) -> Result<ServerWorker> {
    let server_addr = resolve_server(&host)?;
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    let queue = Arc::new(Mutex::new(StampQueue::new(64)));

    #[cfg(target_arch = "x86_64")]
    let counter: Arc<dyn radclock::counter::CounterOracle> = Arc::new(TscOracle::new());
    #[cfg(not(target_arch = "x86_64"))]
    let counter: Arc<dyn radclock::counter::CounterOracle> = {
        tracing::warn!(server, "no hardware counter oracle for this architecture");
        return Err(ClockError::Fatal("no CounterOracle implementation for this target".into()));
    };

    let trigger_socket = socket.try_clone()?;
    let mut trigger = Trigger::new(server, trigger_socket, poll_period, Arc::clone(&queue), Arc::clone(&stop), counter);
    let stagger = trigger.startup_stagger_for(n_servers);

    let trigger_stop = Arc::clone(&stop);
    let trigger_handle = thread::spawn(move || {
        thread::sleep(stagger);
        while !trigger_stop.load(Ordering::Relaxed) {
            if let Err(err) = trigger.tick(server_addr) {
                tracing::warn!(server, error = %err, "trigger cycle failed");
            }
            thread::sleep(Duration::from_secs_f64(1.0));
        }
    });

    let proc_stop = Arc::clone(&stop);
    let proc_handle = thread::spawn(move || {
        let mut source = radclock::source::LiveNtp::new(Arc::clone(&queue));
        run_proc_loop(server, poll_period, meta, &mut source, proc_stop, candidates, sms, kernel_clock);
    });

    let _ = trigger_handle;
    Ok(ServerWorker { join: proc_handle })
}

#[allow(clippy::too_many_arguments)]
fn spawn_replay_server(
    server: usize,
    path: std::path::PathBuf,
    poll_period: u64,
    meta: MetaParams,
    stop: Arc<AtomicBool>,
    candidates: Arc<Mutex<Vec<Option<Candidate>>>>,
    sms: Arc<Sms>,
    kernel_clock: Arc<dyn KernelClock>,
) -> Result<ServerWorker> {
    let mut source = AsciiReplay::open(&path)?;
    let join = thread::spawn(move || {
        run_proc_loop(server, poll_period, meta, &mut source, stop, candidates, sms, kernel_clock);
    });
    Ok(ServerWorker { join })
}

#[allow(clippy::too_many_arguments)]
fn run_proc_loop(
    server: usize,
    poll_period: u64,
    meta: MetaParams,
    source: &mut dyn StampSource,
    stop: Arc<AtomicBool>,
    candidates: Arc<Mutex<Vec<Option<Candidate>>>>,
    sms: Arc<Sms>,
    kernel_clock: Arc<dyn KernelClock>,
) {
    let mut driver = ServerDriver::new(server, poll_period, meta, 1e-9, LeapTable::default());
    let mut selector = PreferredSelector::new();

    while !stop.load(Ordering::Relaxed) {
        let stamp = match source.next_stamp() {
            Ok(Some(s)) => s,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(server, error = %err, "stamp source failed");
                break;
            }
        };

        let (data, error) = match driver.process_stamp(stamp, stamp.tf) {
            Ok(pair) => pair,
            Err(ClockError::CounterChanged { server }) => {
                tracing::error!(server, "hardware counter changed under the daemon, stopping this server");
                break;
            }
            Err(err) => {
                tracing::warn!(server, error = %err, "failed to process stamp");
                continue;
            }
        };

        kernel_clock
            .push(&radclock::kernel::fill_ffclock_estimate(&data, stamp.tf))
            .unwrap_or_else(|err| tracing::warn!(server, error = %err, "kernel clock push failed"));

        let mut guard = candidates.lock().expect("candidate table mutex poisoned");
        if guard.len() <= server {
            guard.resize(server + 1, None);
        }
        guard[server] = Some(Candidate { server, trust: driver.trust(), data, error });

        let snapshot: Vec<Candidate> = guard.iter().filter_map(|c| *c).collect();
        drop(guard);

        if let Some((elected, _event)) = selector.select(&snapshot, server) {
            if let Some(chosen) = snapshot.iter().find(|c| c.server == elected) {
                sms.publish(chosen.data, chosen.error);
            }
        }
    }
}

fn install_signal_flags() -> Result<(Arc<AtomicBool>, Arc<AtomicBool>)> {
    let stop = Arc::new(AtomicBool::new(false));
    let reload = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&stop))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop))?;
    signal_hook::flag::register(signal_hook::consts::SIGHUP, Arc::clone(&reload))?;
    Ok((stop, reload))
}

fn run(config: Config) -> Result<()> {
    let (stop, reload) = install_signal_flags()?;
    let sms = Sms::new();
    let kernel_clock: Arc<dyn KernelClock> = Arc::new(NoopKernelClock);
    let candidates: Arc<Mutex<Vec<Option<Candidate>>>> = Arc::new(Mutex::new(Vec::new()));
    let meta = config.meta_params();

    let mut workers = Vec::new();

    if let Some(path) = &config.ascii_replay {
        let worker = spawn_replay_server(0, path.clone(), 16, meta, Arc::clone(&stop), Arc::clone(&candidates), Arc::clone(&sms), Arc::clone(&kernel_clock))?;
        workers.push(worker);
    } else {
        let n_servers = config.servers.len();
        for (i, server_cfg) in config.servers.iter().enumerate() {
            let worker = spawn_live_server(
                i,
                server_cfg.host.clone(),
                server_cfg.poll_period,
                n_servers,
                meta,
                Arc::clone(&stop),
                Arc::clone(&candidates),
                Arc::clone(&sms),
                Arc::clone(&kernel_clock),
            )?;
            workers.push(worker);
        }
    }

    tracing::info!(servers = workers.len(), "radclockd running");

    while !stop.load(Ordering::Relaxed) {
        if reload.swap(false, Ordering::Relaxed) {
            tracing::info!("SIGHUP received; config reload of live servers is not yet wired to running workers");
        }
        thread::sleep(Duration::from_millis(200));
    }

    for worker in workers {
        let _ = worker.join.join();
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let config = match Config::load(&cli) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("radclockd: configuration error: {err}");
            std::process::exit(1);
        }
    };

    init_logging(config.verbose);

    if let Err(err) = run(config) {
        tracing::error!(error = %err, "radclockd exiting");
        std::process::exit(1);
    }
}
