use std::{ffi::c_void, mem, sync::Arc};

use tracing::debug;
use windows::Win32::{
    Foundation::HANDLE,
    System::Threading::{
        CloseThreadpool, CloseThreadpoolCleanupGroup, CloseThreadpoolWait, CreateThreadpool,
        CreateThreadpoolCleanupGroup, CreateThreadpoolWait, SetThreadpoolThreadMaximum,
        SetThreadpoolThreadMinimum, SetThreadpoolWait, WaitForThreadpoolWaitCallbacks,
        PTP_CALLBACK_INSTANCE, PTP_CLEANUP_GROUP, PTP_POOL, PTP_WAIT, TP_CALLBACK_ENVIRON_V3,
        TP_CALLBACK_PRIORITY_NORMAL,
    },
};

use super::process::NtProcess;
use crate::{
    error::AttachError,
    scoped::ScopedResource,
    watch::{ThreadPool, WatchContext},
};

/// The Win32 thread pool API.
///
/// `InitializeThreadpoolEnvironment`, `SetThreadpoolCallbackPool`,
/// `SetThreadpoolCallbackCleanupGroup` and `DestroyThreadpoolEnvironment` are inline functions in
/// the SDK headers and have no exports, so they are written out here against the environment
/// structure.
#[derive(Clone, Copy, Debug, Default)]
pub struct NtThreadPool;

/// Boxed so the structure keeps its address while the pool objects created from it exist.
pub struct NtEnvironment(Box<TP_CALLBACK_ENVIRON_V3>);

pub struct NtWait {
    wait: PTP_WAIT,
    context: *const WatchContext,
}

unsafe extern "system" fn on_process_exit(
    _instance: PTP_CALLBACK_INSTANCE,
    context: *mut c_void,
    _wait: PTP_WAIT,
    _result: u32,
) {
    // SAFETY: `context` comes from `Arc::into_raw` in `create_wait`, and the reference is only
    // released in `destroy_wait` after all callbacks have completed.
    let context = unsafe { &*(context as *const WatchContext) };

    debug!("got process exit callback");
    context.signal();
}

impl ThreadPool for NtThreadPool {
    type Environment = NtEnvironment;
    type Pool = PTP_POOL;
    type CleanupGroup = PTP_CLEANUP_GROUP;
    type Wait = NtWait;
    type Target = NtProcess;

    fn create_environment(&self) -> Result<Self::Environment, AttachError> {
        Ok(NtEnvironment(Box::new(TP_CALLBACK_ENVIRON_V3 {
            Version: 3,
            CallbackPriority: TP_CALLBACK_PRIORITY_NORMAL,
            Size: mem::size_of::<TP_CALLBACK_ENVIRON_V3>() as u32,
            ..Default::default()
        })))
    }

    fn create_pool(&self, workers: u32) -> Result<Self::Pool, AttachError> {
        let pool = unsafe { CreateThreadpool(None) }
            .map_err(|error| AttachError::thread_pool("pool", error))?;

        let pool = ScopedResource::owned(pool, |pool| unsafe { CloseThreadpool(pool) });

        unsafe {
            SetThreadpoolThreadMaximum(*pool.get(), workers);
            SetThreadpoolThreadMinimum(*pool.get(), workers)
        }
        .map_err(|error| AttachError::thread_pool("pool", error))?;

        Ok(pool.into_inner())
    }

    fn bind_pool(&self, environment: &mut Self::Environment, pool: &Self::Pool) {
        environment.0.Pool = *pool;
    }

    fn create_cleanup_group(&self) -> Result<Self::CleanupGroup, AttachError> {
        unsafe { CreateThreadpoolCleanupGroup() }
            .map_err(|error| AttachError::thread_pool("cleanup group", error))
    }

    fn bind_cleanup_group(&self, environment: &mut Self::Environment, group: &Self::CleanupGroup) {
        environment.0.CleanupGroup = *group;
        environment.0.CleanupGroupCancelCallback = None;
    }

    fn create_wait(
        &self,
        environment: &Self::Environment,
        context: Arc<WatchContext>,
    ) -> Result<Self::Wait, AttachError> {
        let context = Arc::into_raw(context);

        let wait = unsafe {
            CreateThreadpoolWait(
                Some(on_process_exit),
                Some(context as *mut c_void),
                Some(&*environment.0 as *const TP_CALLBACK_ENVIRON_V3),
            )
        };

        match wait {
            Ok(wait) => Ok(NtWait { wait, context }),
            Err(error) => {
                // SAFETY: no wait object exists that could still use the context.
                drop(unsafe { Arc::from_raw(context) });
                Err(AttachError::thread_pool("wait", error))
            }
        }
    }

    fn arm_wait(&self, wait: &Self::Wait, target: &Self::Target) {
        unsafe { SetThreadpoolWait(wait.wait, Some(HANDLE(target.raw_handle())), None) };
    }

    fn wait_for_callbacks(&self, wait: &Self::Wait) {
        unsafe { WaitForThreadpoolWaitCallbacks(wait.wait, false) };
    }

    fn destroy_wait(&self, wait: Self::Wait) {
        unsafe {
            SetThreadpoolWait(wait.wait, None, None);
            WaitForThreadpoolWaitCallbacks(wait.wait, true);
            CloseThreadpoolWait(wait.wait);

            // SAFETY: the wait is closed and no callback is running, so this is the last user.
            drop(Arc::from_raw(wait.context));
        }
    }

    fn destroy_cleanup_group(&self, group: Self::CleanupGroup) {
        unsafe { CloseThreadpoolCleanupGroup(group) };
    }

    fn destroy_pool(&self, pool: Self::Pool) {
        unsafe { CloseThreadpool(pool) };
    }

    fn destroy_environment(&self, environment: Self::Environment) {
        drop(environment);
    }
}
