//! In-memory backends for exercising attachment logic without a real target process.

use std::{
    collections::BTreeMap,
    io,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
};

use crate::{
    error::{AttachError, BackendError},
    inject::module_name,
    platform::Platform,
    process::{ProcessSource, RemoteCall, RemoteModule, RemoteProcess},
    watch::{ThreadPool, WatchContext},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct ModuleTable {
    mapped: BTreeMap<usize, String>,
    exports: BTreeMap<String, usize>,
    next_base: usize,
    fail_loads: bool,
    fail_unloads: bool,
    loads: usize,
    unloads: usize,
    events: Vec<String>,
    calls: Vec<String>,
}

#[derive(Debug)]
struct ProcessState {
    pid: u32,
    name: String,
    modules: Mutex<ModuleTable>,
    exited: Mutex<bool>,
    exit_condvar: Condvar,
}

/// A target process with a module table, an export table shared by every module, and an exit
/// signal. Clones refer to the same process.
#[derive(Clone, Debug)]
pub struct FakeProcess(Arc<ProcessState>);

impl FakeProcess {
    pub fn new(pid: u32, name: &str) -> Self {
        Self(Arc::new(ProcessState {
            pid,
            name: name.to_owned(),
            modules: Mutex::new(ModuleTable {
                next_base: 0x7ff6_1000_0000,
                ..Default::default()
            }),
            exited: Mutex::new(false),
            exit_condvar: Condvar::new(),
        }))
    }

    pub fn with_export(self, symbol: &str, return_value: usize) -> Self {
        lock(&self.0.modules)
            .exports
            .insert(symbol.to_owned(), return_value);
        self
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Make every subsequent load fail as if the loader rejected the file.
    pub fn fail_loads(&self) {
        lock(&self.0.modules).fail_loads = true;
    }

    /// Make every subsequent unload fail as if the loader refused to free the module.
    pub fn fail_unloads(&self) {
        lock(&self.0.modules).fail_unloads = true;
    }

    pub fn load_count(&self) -> usize {
        lock(&self.0.modules).loads
    }

    pub fn unload_count(&self) -> usize {
        lock(&self.0.modules).unloads
    }

    /// Exports called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.0.modules).calls.clone()
    }

    /// Every mutation and call made against the process, in order.
    pub fn events(&self) -> Vec<String> {
        lock(&self.0.modules).events.clone()
    }

    /// Terminate the process.
    pub fn exit(&self) {
        let mut exited = lock(&self.0.exited);
        *exited = true;
        self.0.exit_condvar.notify_all();
    }

    pub fn has_exited(&self) -> bool {
        *lock(&self.0.exited)
    }

    /// Block until the process exits or `stop` is set. Returns whether the process exited.
    fn wait_for_exit(&self, stop: &AtomicBool) -> bool {
        let exited = lock(&self.0.exited);
        let exited = self
            .0
            .exit_condvar
            .wait_while(exited, |exited| !*exited && !stop.load(Ordering::SeqCst))
            .unwrap_or_else(PoisonError::into_inner);

        *exited
    }

    fn wake(&self) {
        let _exited = lock(&self.0.exited);
        self.0.exit_condvar.notify_all();
    }
}

impl RemoteProcess for FakeProcess {
    fn pid(&self) -> u32 {
        self.0.pid
    }

    fn find_module(&self, name: &str) -> Result<Option<RemoteModule>, BackendError> {
        let table = lock(&self.0.modules);

        Ok(table
            .mapped
            .iter()
            .find(|(_, mapped)| mapped.eq_ignore_ascii_case(name))
            .and_then(|(base, _)| RemoteModule::from_base_address(*base)))
    }

    fn is_mapped(&self, module: RemoteModule) -> Result<bool, BackendError> {
        Ok(lock(&self.0.modules)
            .mapped
            .contains_key(&module.base_address()))
    }

    fn load_module(&self, path: &Path) -> Result<RemoteModule, BackendError> {
        let mut table = lock(&self.0.modules);

        if table.fail_loads {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "module architecture does not match target",
            )
            .into());
        }

        let base = table.next_base;
        table.next_base += 0x10_0000;
        table.mapped.insert(base, module_name(path));
        table.loads += 1;
        table.events.push(format!("load {}", path.display()));

        RemoteModule::from_base_address(base).ok_or_else(|| "loader returned null".into())
    }

    fn unload_module(&self, module: RemoteModule) -> Result<(), BackendError> {
        let mut table = lock(&self.0.modules);

        if table.fail_unloads {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied).into());
        }

        let name = table
            .mapped
            .remove(&module.base_address())
            .ok_or("module is not mapped")?;
        table.unloads += 1;
        table.events.push(format!("unload {name}"));

        Ok(())
    }

    fn call_export(
        &self,
        module: RemoteModule,
        symbol: &str,
    ) -> Result<Option<RemoteCall>, BackendError> {
        let mut table = lock(&self.0.modules);

        if !table.mapped.contains_key(&module.base_address()) {
            return Err("module is not mapped".into());
        }

        let Some(return_value) = table.exports.get(symbol).copied() else {
            return Ok(None);
        };

        table.calls.push(symbol.to_owned());
        table.events.push(format!("call {symbol}"));

        Ok(Some(RemoteCall {
            return_value,
            last_error: Some(0),
        }))
    }
}

/// A process table for [`locate`](crate::process::locate).
#[derive(Debug, Default)]
pub struct FakeProcessSource {
    processes: Mutex<Vec<FakeProcess>>,
    denied: Mutex<Vec<u32>>,
    opened: AtomicUsize,
}

impl FakeProcessSource {
    pub fn spawn(&self, process: FakeProcess) {
        lock(&self.processes).push(process);
    }

    /// Opening `pid` fails with "access denied".
    pub fn deny_access(&self, pid: u32) {
        lock(&self.denied).push(pid);
    }

    /// Number of process handles handed out.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn open(&self, process: &FakeProcess) -> FakeProcess {
        self.opened.fetch_add(1, Ordering::SeqCst);
        process.clone()
    }
}

impl ProcessSource for FakeProcessSource {
    type Process = FakeProcess;

    fn open_pid(&self, pid: u32) -> Result<Self::Process, BackendError> {
        if lock(&self.denied).contains(&pid) {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied).into());
        }

        lock(&self.processes)
            .iter()
            .find(|process| process.pid() == pid)
            .map(|process| self.open(process))
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput).into())
    }

    fn find_by_name(&self, name: &str) -> Result<Option<Self::Process>, BackendError> {
        Ok(lock(&self.processes)
            .iter()
            .find(|process| process.name().eq_ignore_ascii_case(name))
            .map(|process| self.open(process)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolObject {
    Environment,
    Pool,
    CleanupGroup,
    Wait,
}

impl PoolObject {
    fn name(self) -> &'static str {
        match self {
            PoolObject::Environment => "environment",
            PoolObject::Pool => "pool",
            PoolObject::CleanupGroup => "cleanup group",
            PoolObject::Wait => "wait",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolEvent {
    Create(PoolObject),
    /// The object was attached to the callback environment.
    Bind(PoolObject),
    Arm,
    /// Waited for running callbacks to finish.
    Drain,
    Destroy(PoolObject),
}

#[derive(Debug, Default)]
struct Recorder {
    events: Mutex<Vec<PoolEvent>>,
    live: AtomicUsize,
    callbacks_run: AtomicUsize,
    workers: Mutex<Option<u32>>,
    fail_at: Option<PoolObject>,
}

/// A thread pool that records every object it creates and destroys. Exit callbacks run on a real
/// thread that waits for the [`FakeProcess`] to exit.
#[derive(Clone, Debug, Default)]
pub struct RecordingThreadPool(Arc<Recorder>);

#[derive(Debug)]
pub struct FakeEnvironment {
    pool_bound: bool,
    cleanup_group_bound: bool,
}

#[derive(Debug)]
pub struct FakeObject(PoolObject);

#[derive(Debug)]
pub struct FakeWait {
    context: Arc<WatchContext>,
    stop: Arc<AtomicBool>,
    armed: Mutex<Option<(FakeProcess, JoinHandle<()>)>>,
}

impl RecordingThreadPool {
    /// A pool whose creation of `object` fails.
    pub fn failing_at(object: PoolObject) -> Self {
        Self(Arc::new(Recorder {
            fail_at: Some(object),
            ..Default::default()
        }))
    }

    pub fn events(&self) -> Vec<PoolEvent> {
        lock(&self.0.events).clone()
    }

    /// Number of objects created and not yet destroyed.
    pub fn live(&self) -> usize {
        self.0.live.load(Ordering::SeqCst)
    }

    /// Number of exit callbacks that signalled their context.
    pub fn callbacks_run(&self) -> usize {
        self.0.callbacks_run.load(Ordering::SeqCst)
    }

    pub fn workers(&self) -> Option<u32> {
        *lock(&self.0.workers)
    }

    fn record(&self, event: PoolEvent) {
        lock(&self.0.events).push(event);
    }

    fn create(&self, object: PoolObject) -> Result<(), AttachError> {
        if self.0.fail_at == Some(object) {
            return Err(AttachError::thread_pool(
                object.name(),
                io::Error::other("not enough resources"),
            ));
        }

        self.0.live.fetch_add(1, Ordering::SeqCst);
        self.record(PoolEvent::Create(object));
        Ok(())
    }

    fn destroy(&self, object: PoolObject) {
        self.record(PoolEvent::Destroy(object));
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ThreadPool for RecordingThreadPool {
    type Environment = FakeEnvironment;
    type Pool = FakeObject;
    type CleanupGroup = FakeObject;
    type Wait = FakeWait;
    type Target = FakeProcess;

    fn create_environment(&self) -> Result<Self::Environment, AttachError> {
        self.create(PoolObject::Environment)?;

        Ok(FakeEnvironment {
            pool_bound: false,
            cleanup_group_bound: false,
        })
    }

    fn create_pool(&self, workers: u32) -> Result<Self::Pool, AttachError> {
        self.create(PoolObject::Pool)?;
        *lock(&self.0.workers) = Some(workers);

        Ok(FakeObject(PoolObject::Pool))
    }

    fn bind_pool(&self, environment: &mut Self::Environment, _: &Self::Pool) {
        environment.pool_bound = true;
        self.record(PoolEvent::Bind(PoolObject::Pool));
    }

    fn create_cleanup_group(&self) -> Result<Self::CleanupGroup, AttachError> {
        self.create(PoolObject::CleanupGroup)?;

        Ok(FakeObject(PoolObject::CleanupGroup))
    }

    fn bind_cleanup_group(&self, environment: &mut Self::Environment, _: &Self::CleanupGroup) {
        environment.cleanup_group_bound = true;
        self.record(PoolEvent::Bind(PoolObject::CleanupGroup));
    }

    fn create_wait(
        &self,
        environment: &Self::Environment,
        context: Arc<WatchContext>,
    ) -> Result<Self::Wait, AttachError> {
        assert!(
            environment.pool_bound && environment.cleanup_group_bound,
            "wait created in an environment without a pool and cleanup group"
        );

        self.create(PoolObject::Wait)?;

        Ok(FakeWait {
            context,
            stop: Arc::new(AtomicBool::new(false)),
            armed: Mutex::new(None),
        })
    }

    fn arm_wait(&self, wait: &Self::Wait, target: &Self::Target) {
        self.record(PoolEvent::Arm);

        let worker = thread::spawn({
            let target = target.clone();
            let context = wait.context.clone();
            let stop = wait.stop.clone();
            let recorder = self.clone();

            move || {
                if target.wait_for_exit(&stop) {
                    recorder.0.callbacks_run.fetch_add(1, Ordering::SeqCst);
                    context.signal();
                }
            }
        });

        *lock(&wait.armed) = Some((target.clone(), worker));
    }

    fn wait_for_callbacks(&self, wait: &Self::Wait) {
        self.record(PoolEvent::Drain);

        let armed = lock(&wait.armed).take();
        if let Some((_, worker)) = armed {
            let _ = worker.join();
        }
    }

    fn destroy_wait(&self, wait: Self::Wait) {
        wait.stop.store(true, Ordering::SeqCst);

        let armed = lock(&wait.armed).take();
        if let Some((target, worker)) = armed {
            target.wake();
            let _ = worker.join();
        }

        self.destroy(PoolObject::Wait);
    }

    fn destroy_cleanup_group(&self, group: Self::CleanupGroup) {
        self.destroy(group.0);
    }

    fn destroy_pool(&self, pool: Self::Pool) {
        self.destroy(pool.0);
    }

    fn destroy_environment(&self, _: Self::Environment) {
        self.destroy(PoolObject::Environment);
    }
}

/// A [`Platform`] built from the fakes in this module.
#[derive(Debug, Default)]
pub struct FakePlatform {
    processes: FakeProcessSource,
    thread_pool: RecordingThreadPool,
    privilege_requests: AtomicUsize,
    deny_privilege: bool,
}

impl FakePlatform {
    pub fn with_process(process: FakeProcess) -> Self {
        let platform = Self::default();
        platform.processes.spawn(process);
        platform
    }

    pub fn denying_privilege(mut self) -> Self {
        self.deny_privilege = true;
        self
    }

    pub fn recorder(&self) -> &RecordingThreadPool {
        &self.thread_pool
    }

    pub fn privilege_requests(&self) -> usize {
        self.privilege_requests.load(Ordering::SeqCst)
    }
}

impl Platform for FakePlatform {
    type Processes = FakeProcessSource;
    type ThreadPool = RecordingThreadPool;

    fn processes(&self) -> &Self::Processes {
        &self.processes
    }

    fn thread_pool(&self) -> Self::ThreadPool {
        self.thread_pool.clone()
    }

    fn enable_debug_privilege(&self) -> Result<(), AttachError> {
        self.privilege_requests.fetch_add(1, Ordering::SeqCst);

        if self.deny_privilege {
            return Err(AttachError::PrivilegeDenied {
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }

        Ok(())
    }
}
