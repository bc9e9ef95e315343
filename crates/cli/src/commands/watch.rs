use color_eyre::eyre::eyre;
use tether_attach::{locate, Canceller, Platform, ProcessWatcher, RemoteProcess, WatchOutcome};
use tracing::{info, warn};

use crate::{commands::WatchArgs, config::Config, output::OutputBuilder};

/// Cancel the watch when the user presses Ctrl-C.
pub fn cancel_on_interrupt(canceller: Canceller) {
    if let Err(error) = ctrlc::set_handler(move || canceller.cancel()) {
        warn!(%error, "Ctrl-C will not cancel the watch");
    }
}

pub fn watch<P: Platform>(
    platform: &P,
    config: &Config,
    args: WatchArgs,
    on_armed: impl FnOnce(Canceller),
) -> color_eyre::Result<String> {
    let target = locate(platform.processes(), &args.target.selector(config))?;
    let pid = target.pid();
    let timeout = config.watch_timeout();

    let watcher = ProcessWatcher::new(platform.thread_pool());

    let outcome = watcher.watch(&target, timeout, |canceller| {
        info!(pid, ?timeout, "waiting for process to exit");
        on_armed(canceller);
    })?;

    match outcome {
        WatchOutcome::Exited => Ok(OutputBuilder::new(format!("Process {pid} exited")).build()),
        WatchOutcome::Cancelled => Err(eyre!("stopped watching process {pid}: cancelled")),
        WatchOutcome::TimedOut => Err(eyre!(
            "stopped watching process {pid}: still running after {}s",
            timeout.unwrap_or_default().as_secs()
        )),
    }
}
