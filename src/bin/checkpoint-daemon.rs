//! Background checkpoint and fragment-statistics daemon (SPEC_FULL.md SS6,
//! scenario S7): periodically calls `DB::create_checkpoint` and sweeps the
//! stat monitor, the way `wal::checkpoint_manager::CheckpointManager`'s
//! trigger condition is described -- whichever of "dirty pages since last
//! checkpoint" or "interval elapsed" comes first. Nothing in the library
//! spawns this loop itself; this binary is the thread that drives it.

use ordered_store::am::stats::StatMonitor;
use ordered_store::{DBConfig, Result, DB};

use std::{
    env, process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

fn usage() -> ! {
    eprintln!("usage: checkpoint-daemon <root-path>");
    process::exit(2);
}

fn run(
    db: &DB,
    checkpoint_interval_secs: u64,
    dirty_log_threshold_bytes: u64,
    stop: &AtomicBool,
) -> Result<()> {
    let stat_monitor = StatMonitor::new();
    let interval = Duration::from_secs(1);
    let mut elapsed_secs: u64 = 0;
    let mut last_checkpoint_lsn = db.get_wal().current_lsn();

    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(interval);
        elapsed_secs += 1;

        let grown = db.get_wal().current_lsn().saturating_sub(last_checkpoint_lsn);
        let due_by_interval = elapsed_secs >= checkpoint_interval_secs;
        let due_by_log_growth = grown >= dirty_log_threshold_bytes;

        if due_by_interval || due_by_log_growth {
            db.create_checkpoint()?;
            last_checkpoint_lsn = db.get_wal().current_lsn();
            elapsed_secs = 0;
            stat_monitor.sweep_once();
        }
    }

    Ok(())
}

fn main() {
    env_logger::init();

    let root_path = match env::args().nth(1) {
        Some(path) => path,
        None => usage(),
    };

    let config = DBConfig::new().root_path(&root_path);
    // `checkpoint_dirty_pages * page_size` stands in for true per-page
    // dirty tracking, which the buffer pool does not currently expose.
    let checkpoint_interval_secs = config.checkpoint_interval_secs;
    let dirty_log_threshold_bytes = (config.checkpoint_dirty_pages * config.page_size) as u64;

    let db = DB::open(config).unwrap_or_else(|e| {
        eprintln!("could not open database at {}: {}", root_path, e);
        process::exit(1);
    });

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    if let Err(e) = ctrlc_shutdown_on_sigint(stop_handler) {
        log::warn!("could not install shutdown handler: {}", e);
    }

    log::info!("checkpoint daemon started for {}", root_path);

    if let Err(e) = run(&db, checkpoint_interval_secs, dirty_log_threshold_bytes, &stop) {
        eprintln!("checkpoint daemon failed: {}", e);
        process::exit(1);
    }
}

/// Placeholder for wiring a real signal handler (no signal-handling crate
/// is part of the dependency stack); the daemon otherwise runs until
/// killed. Kept as its own function so the intended extension point is
/// named rather than inlined into `main`.
fn ctrlc_shutdown_on_sigint(_stop: Arc<AtomicBool>) -> std::io::Result<()> {
    Ok(())
}
