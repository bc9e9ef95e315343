//! Asynchronous observation of target process exit.
//!
//! A watch session owns a chain of thread-pool objects: a callback environment, a pool with a
//! single worker, a cleanup group bound to the environment, and a wait object registered against
//! the target's exit signal. The wait callback and the watching thread share exactly one
//! [`WatchContext`]; everything else is owned by the session and released in reverse creation
//! order when it is dropped.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tracing::{debug, info, instrument};

use crate::{error::AttachError, scoped::ScopedResource};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The target process terminated.
    Exited,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Default)]
struct WatchState {
    done: bool,
    cancelled: bool,
}

/// State shared between the watching thread and the exit callback.
///
/// Both flags are only read and written under the mutex, and notification happens while it is
/// held, so a signal that fires before the waiter starts waiting is never lost.
#[derive(Debug, Default)]
pub struct WatchContext {
    state: Mutex<WatchState>,
    condvar: Condvar,
}

impl WatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called from the exit callback, on a pool thread.
    pub fn signal(&self) {
        let mut state = self.lock();
        state.done = true;
        self.condvar.notify_all();
    }

    pub fn cancel(&self) {
        let mut state = self.lock();
        state.cancelled = true;
        self.condvar.notify_all();
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Block until the context is signalled or cancelled, or until `timeout` elapses.
    pub fn wait(&self, timeout: Option<Duration>) -> WatchOutcome {
        let pending = |state: &mut WatchState| !state.done && !state.cancelled;
        let guard = self.lock();

        let state = match timeout {
            None => self
                .condvar
                .wait_while(guard, pending)
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                self.condvar
                    .wait_timeout_while(guard, timeout, pending)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        };

        if state.done {
            WatchOutcome::Exited
        } else if state.cancelled {
            WatchOutcome::Cancelled
        } else {
            WatchOutcome::TimedOut
        }
    }
}

/// Cancels a watch from another thread (for example a Ctrl-C handler).
#[derive(Clone, Debug)]
pub struct Canceller(Arc<WatchContext>);

impl Canceller {
    pub fn cancel(&self) {
        self.0.cancel();
    }
}

/// The thread-pool primitives a watch session is built from.
///
/// Every `create_*` call that succeeds is paired with exactly one `destroy_*` call for the same
/// object. Objects are destroyed in reverse creation order.
pub trait ThreadPool {
    type Environment;
    type Pool;
    type CleanupGroup;
    type Wait;
    /// Whatever the wait object can be registered against.
    type Target: ?Sized;

    fn create_environment(&self) -> Result<Self::Environment, AttachError>;

    /// Create a pool with exactly `workers` threads.
    fn create_pool(&self, workers: u32) -> Result<Self::Pool, AttachError>;

    fn bind_pool(&self, environment: &mut Self::Environment, pool: &Self::Pool);

    fn create_cleanup_group(&self) -> Result<Self::CleanupGroup, AttachError>;

    fn bind_cleanup_group(&self, environment: &mut Self::Environment, group: &Self::CleanupGroup);

    /// Create a wait object whose callback calls [`WatchContext::signal`] on `context`.
    fn create_wait(
        &self,
        environment: &Self::Environment,
        context: Arc<WatchContext>,
    ) -> Result<Self::Wait, AttachError>;

    /// Register `wait` against the termination of `target`.
    fn arm_wait(&self, wait: &Self::Wait, target: &Self::Target);

    /// Block until callbacks of `wait` that already started have returned.
    fn wait_for_callbacks(&self, wait: &Self::Wait);

    /// Unregister, drain and close `wait`. Pending callbacks that have not started are
    /// cancelled.
    fn destroy_wait(&self, wait: Self::Wait);

    fn destroy_cleanup_group(&self, group: Self::CleanupGroup);

    fn destroy_pool(&self, pool: Self::Pool);

    fn destroy_environment(&self, environment: Self::Environment);
}

type Scoped<'a, H> = ScopedResource<H, Box<dyn FnOnce(H) + 'a>>;

/// Creates watch sessions on a [`ThreadPool`] implementation.
#[derive(Debug)]
pub struct ProcessWatcher<T> {
    pool: T,
}

impl<T: ThreadPool> ProcessWatcher<T> {
    /// A single worker is enough: a session waits for one event.
    pub const WORKERS: u32 = 1;

    pub fn new(pool: T) -> Self {
        Self { pool }
    }

    pub fn thread_pool(&self) -> &T {
        &self.pool
    }

    /// Build the thread-pool object chain and register for the exit of `target`.
    ///
    /// On failure everything created so far is released before the error is returned.
    #[instrument(skip_all, err)]
    pub fn arm(&self, target: &T::Target) -> Result<WatchSession<'_, T>, AttachError> {
        let api = &self.pool;

        let mut environment: Scoped<'_, T::Environment> = ScopedResource::owned(
            api.create_environment()?,
            Box::new(move |environment| api.destroy_environment(environment)),
        );

        let pool: Scoped<'_, T::Pool> = ScopedResource::owned(
            api.create_pool(Self::WORKERS)?,
            Box::new(move |pool| api.destroy_pool(pool)),
        );

        let cleanup_group: Scoped<'_, T::CleanupGroup> = ScopedResource::owned(
            api.create_cleanup_group()?,
            Box::new(move |group| api.destroy_cleanup_group(group)),
        );

        api.bind_pool(environment.get_mut(), pool.get());
        api.bind_cleanup_group(environment.get_mut(), cleanup_group.get());

        let context = Arc::new(WatchContext::new());

        let wait: Scoped<'_, T::Wait> = ScopedResource::owned(
            api.create_wait(environment.get(), context.clone())?,
            Box::new(move |wait| api.destroy_wait(wait)),
        );

        api.arm_wait(wait.get(), target);

        debug!("waiting on process exit");

        Ok(WatchSession {
            wait,
            context,
            cleanup_group,
            pool,
            environment,
            api,
        })
    }

    /// Arm a session and block until the target exits, the returned session is cancelled or
    /// `timeout` elapses. `on_armed` receives a [`Canceller`] before blocking.
    pub fn watch(
        &self,
        target: &T::Target,
        timeout: Option<Duration>,
        on_armed: impl FnOnce(Canceller),
    ) -> Result<WatchOutcome, AttachError> {
        let session = self.arm(target)?;
        on_armed(session.canceller());

        Ok(session.wait(timeout))
    }
}

/// An armed watch. Dropping it tears the thread-pool chain down.
pub struct WatchSession<'a, T: ThreadPool> {
    // Fields drop in declaration order, which is the reverse of creation order.
    wait: Scoped<'a, T::Wait>,
    context: Arc<WatchContext>,
    cleanup_group: Scoped<'a, T::CleanupGroup>,
    pool: Scoped<'a, T::Pool>,
    environment: Scoped<'a, T::Environment>,
    api: &'a T,
}

impl<T: ThreadPool> WatchSession<'_, T> {
    pub fn canceller(&self) -> Canceller {
        Canceller(self.context.clone())
    }

    pub fn context(&self) -> &WatchContext {
        &self.context
    }

    /// Block until the session completes, then wait for any exit callback still running so that
    /// teardown cannot race it.
    #[instrument(skip(self))]
    pub fn wait(self, timeout: Option<Duration>) -> WatchOutcome {
        let outcome = self.context.wait(timeout);

        if outcome == WatchOutcome::Exited {
            self.api.wait_for_callbacks(self.wait.get());
        }

        info!(?outcome, "watch finished");

        outcome
    }
}

impl<T: ThreadPool> std::fmt::Debug for WatchSession<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSession")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use pretty_assertions::assert_eq;

    use super::{ProcessWatcher, WatchContext, WatchOutcome};
    use crate::{
        error::AttachError,
        testing::{FakeProcess, PoolEvent, PoolObject, RecordingThreadPool},
    };

    use PoolEvent::{Arm, Bind, Create, Destroy, Drain};
    use PoolObject::{CleanupGroup, Environment, Pool, Wait};

    #[test]
    fn tears_down_in_reverse_creation_order() {
        let watcher = ProcessWatcher::new(RecordingThreadPool::default());
        let target = FakeProcess::new(1, "Target.exe");

        let outcome = watcher
            .watch(&target, None, |_| target.exit())
            .unwrap();

        assert_eq!(WatchOutcome::Exited, outcome);
        assert_eq!(
            vec![
                Create(Environment),
                Create(Pool),
                Create(CleanupGroup),
                Bind(Pool),
                Bind(CleanupGroup),
                Create(Wait),
                Arm,
                Drain,
                Destroy(Wait),
                Destroy(CleanupGroup),
                Destroy(Pool),
                Destroy(Environment),
            ],
            watcher.thread_pool().events()
        );
        assert_eq!(0, watcher.thread_pool().live());
        assert_eq!(1, watcher.thread_pool().callbacks_run());
    }

    #[test]
    fn pool_has_a_single_worker() {
        let watcher = ProcessWatcher::new(RecordingThreadPool::default());
        let target = FakeProcess::new(1, "Target.exe");

        watcher.watch(&target, None, |_| target.exit()).unwrap();

        assert_eq!(Some(1), watcher.thread_pool().workers());
    }

    fn failing_at(object: PoolObject) -> (AttachError, RecordingThreadPool) {
        let watcher = ProcessWatcher::new(RecordingThreadPool::failing_at(object));
        let target = FakeProcess::new(1, "Target.exe");

        let error = watcher.arm(&target).unwrap_err();

        let ProcessWatcher { pool } = watcher;
        (error, pool)
    }

    #[test]
    fn setup_failure_releases_what_was_created() {
        let (error, pool) = failing_at(Pool);
        assert!(matches!(error, AttachError::ThreadPoolSetupFailed { object: "pool", .. }));
        assert_eq!(vec![Create(Environment), Destroy(Environment)], pool.events());
        assert_eq!(0, pool.live());

        let (error, pool) = failing_at(CleanupGroup);
        assert!(matches!(error, AttachError::ThreadPoolSetupFailed { object: "cleanup group", .. }));
        assert_eq!(
            vec![
                Create(Environment),
                Create(Pool),
                Destroy(Pool),
                Destroy(Environment)
            ],
            pool.events()
        );
        assert_eq!(0, pool.live());

        let (error, pool) = failing_at(Wait);
        assert!(matches!(error, AttachError::ThreadPoolSetupFailed { object: "wait", .. }));
        assert_eq!(
            vec![
                Create(Environment),
                Create(Pool),
                Create(CleanupGroup),
                Bind(Pool),
                Bind(CleanupGroup),
                Destroy(CleanupGroup),
                Destroy(Pool),
                Destroy(Environment)
            ],
            pool.events()
        );
        assert_eq!(0, pool.live());
    }

    #[test]
    fn environment_failure_creates_nothing() {
        let (error, pool) = failing_at(Environment);

        assert!(matches!(error, AttachError::ThreadPoolSetupFailed { object: "environment", .. }));
        assert!(pool.events().is_empty());
    }

    #[test]
    fn target_exiting_mid_wait_unblocks_the_watcher() {
        let watcher = ProcessWatcher::new(RecordingThreadPool::default());
        let target = FakeProcess::new(1, "Target.exe");

        let outcome = thread::scope(|scope| {
            let session = watcher.arm(&target).unwrap();
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(20));
                target.exit();
            });
            session.wait(None)
        });

        assert_eq!(WatchOutcome::Exited, outcome);
        assert_eq!(0, watcher.thread_pool().live());
    }

    #[test]
    fn target_that_already_exited_is_observed() {
        let watcher = ProcessWatcher::new(RecordingThreadPool::default());
        let target = FakeProcess::new(1, "Target.exe");
        target.exit();

        let outcome = watcher.watch(&target, None, |_| {}).unwrap();

        assert_eq!(WatchOutcome::Exited, outcome);
    }

    #[test]
    fn cancel_ends_the_wait_and_tears_down() {
        let watcher = ProcessWatcher::new(RecordingThreadPool::default());
        let target = FakeProcess::new(1, "Target.exe");

        let outcome = watcher
            .watch(&target, None, |canceller| {
                thread::spawn(move || canceller.cancel());
            })
            .unwrap();

        assert_eq!(WatchOutcome::Cancelled, outcome);
        assert_eq!(0, watcher.thread_pool().live());
        assert_eq!(0, watcher.thread_pool().callbacks_run());
        assert!(!watcher.thread_pool().events().contains(&Drain));
    }

    #[test]
    fn timeout_ends_the_wait_and_tears_down() {
        let watcher = ProcessWatcher::new(RecordingThreadPool::default());
        let target = FakeProcess::new(1, "Target.exe");

        let outcome = watcher
            .watch(&target, Some(Duration::from_millis(10)), |_| {})
            .unwrap();

        assert_eq!(WatchOutcome::TimedOut, outcome);
        assert_eq!(0, watcher.thread_pool().live());
    }

    #[test]
    fn signal_before_wait_is_not_lost() {
        for _ in 0..1000 {
            let context = Arc::new(WatchContext::new());

            let signaller = thread::spawn({
                let context = context.clone();
                move || context.signal()
            });

            assert_eq!(WatchOutcome::Exited, context.wait(None));
            signaller.join().unwrap();
        }
    }

    #[test]
    fn exit_racing_the_waiter_always_unblocks_it() {
        for _ in 0..200 {
            let watcher = ProcessWatcher::new(RecordingThreadPool::default());
            let target = FakeProcess::new(1, "Target.exe");

            let outcome = watcher
                .watch(&target, None, |_| {
                    thread::spawn({
                        let target = target.clone();
                        move || target.exit()
                    });
                })
                .unwrap();

            assert_eq!(WatchOutcome::Exited, outcome);
            assert_eq!(0, watcher.thread_pool().live());
        }
    }

    #[test]
    fn done_wins_over_a_later_cancel() {
        let context = WatchContext::new();
        context.signal();
        context.cancel();

        assert!(context.is_done());
        assert_eq!(WatchOutcome::Exited, context.wait(None));
    }
}
