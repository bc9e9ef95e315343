//! The Windows backend: dll-syringe for the remote loader and export calls, and the Win32 thread
//! pool for exit notification.

mod privilege;
mod process;
mod thread_pool;

pub use self::{
    process::{NtProcess, NtProcessSource},
    thread_pool::NtThreadPool,
};
use crate::{error::AttachError, platform::Platform};

#[derive(Debug, Default)]
pub struct NtPlatform {
    processes: NtProcessSource,
}

impl NtPlatform {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Platform for NtPlatform {
    type Processes = NtProcessSource;
    type ThreadPool = NtThreadPool;

    fn processes(&self) -> &Self::Processes {
        &self.processes
    }

    fn thread_pool(&self) -> Self::ThreadPool {
        NtThreadPool
    }

    fn enable_debug_privilege(&self) -> Result<(), AttachError> {
        privilege::enable_debug_privilege()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        process::{Child, Command, Stdio},
        time::Duration,
    };

    use pretty_assertions::assert_eq;

    use super::{privilege, NtProcessSource, NtThreadPool};
    use crate::{
        error::AttachError,
        process::{locate, ProcessSelector, RemoteProcess},
        watch::{ProcessWatcher, WatchOutcome},
    };

    /// A child that keeps running for roughly `seconds` seconds.
    fn spawn_sleeper(seconds: u32) -> Child {
        Command::new("cmd")
            .args(["/c", "ping", "-n", &seconds.to_string(), "127.0.0.1"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap()
    }

    #[test]
    fn exit_of_a_child_process_is_observed() {
        let mut child = spawn_sleeper(2);
        let target = locate(&NtProcessSource, &ProcessSelector::Pid(child.id())).unwrap();
        let watcher = ProcessWatcher::new(NtThreadPool);

        let outcome = watcher
            .watch(&target, Some(Duration::from_secs(60)), |_| {})
            .unwrap();

        assert_eq!(WatchOutcome::Exited, outcome);
        child.wait().unwrap();
    }

    #[test]
    fn already_exited_process_completes_immediately() {
        let mut child = spawn_sleeper(1);
        let target = locate(&NtProcessSource, &ProcessSelector::Pid(child.id())).unwrap();
        child.wait().unwrap();

        let outcome = ProcessWatcher::new(NtThreadPool)
            .watch(&target, Some(Duration::from_secs(10)), |_| {})
            .unwrap();

        assert_eq!(WatchOutcome::Exited, outcome);
    }

    #[test]
    fn watch_times_out_while_the_process_runs() {
        let mut child = spawn_sleeper(60);
        let target = locate(&NtProcessSource, &ProcessSelector::Pid(child.id())).unwrap();

        let outcome = ProcessWatcher::new(NtThreadPool)
            .watch(&target, Some(Duration::from_millis(10)), |_| {})
            .unwrap();

        assert_eq!(WatchOutcome::TimedOut, outcome);

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn cancelled_watch_leaves_the_process_running() {
        let mut child = spawn_sleeper(60);
        let target = locate(&NtProcessSource, &ProcessSelector::Pid(child.id())).unwrap();

        let outcome = ProcessWatcher::new(NtThreadPool)
            .watch(&target, None, |canceller| canceller.cancel())
            .unwrap();

        assert_eq!(WatchOutcome::Cancelled, outcome);
        assert_eq!(None, child.try_wait().unwrap());

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn repeated_watches_release_their_pool_objects() {
        let mut child = spawn_sleeper(60);
        let target = locate(&NtProcessSource, &ProcessSelector::Pid(child.id())).unwrap();
        let watcher = ProcessWatcher::new(NtThreadPool);

        for _ in 0..16 {
            let outcome = watcher
                .watch(&target, Some(Duration::from_millis(1)), |_| {})
                .unwrap();
            assert_eq!(WatchOutcome::TimedOut, outcome);
        }

        child.kill().unwrap();
        child.wait().unwrap();

        let outcome = watcher
            .watch(&target, Some(Duration::from_secs(10)), |_| {})
            .unwrap();
        assert_eq!(WatchOutcome::Exited, outcome);
    }

    #[test]
    fn unknown_pid_is_not_found() {
        let error = locate(&NtProcessSource, &ProcessSelector::Pid(u32::MAX)).unwrap_err();

        assert!(matches!(
            error,
            AttachError::NotFound {
                selector: ProcessSelector::Pid(u32::MAX)
            }
        ));
    }

    #[test]
    fn unknown_name_is_not_found() {
        let selector = ProcessSelector::Name("tether-no-such-process.exe".to_owned());

        let error = locate(&NtProcessSource, &selector).unwrap_err();

        assert!(matches!(error, AttachError::NotFound { .. }));
    }

    #[test]
    fn modules_of_the_current_process_are_visible() {
        let target =
            locate(&NtProcessSource, &ProcessSelector::Pid(std::process::id())).unwrap();

        let ntdll = target.find_module("ntdll.dll").unwrap().unwrap();

        assert_eq!(std::process::id(), target.pid());
        assert!(target.is_mapped(ntdll).unwrap());
        assert_eq!(None, target.find_module("tether-not-loaded.dll").unwrap());
    }

    #[test]
    fn debug_privilege_is_enabled_or_denied() {
        let result = privilege::enable_debug_privilege();

        assert!(
            matches!(result, Ok(()) | Err(AttachError::PrivilegeDenied { .. })),
            "{result:?}"
        );
    }
}
