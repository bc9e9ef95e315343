use std::{path::Path, sync::Arc};

use crate::{
    error::{AttachError, BackendError},
    process::{ProcessSource, RemoteCall, RemoteModule, RemoteProcess},
    watch::{ThreadPool, WatchContext},
};

/// Everything the controller needs from the host OS.
pub trait Platform {
    type Processes: ProcessSource;
    type ThreadPool: ThreadPool<Target = <Self::Processes as ProcessSource>::Process>;

    fn processes(&self) -> &Self::Processes;

    fn thread_pool(&self) -> Self::ThreadPool;

    /// Enable the debug privilege for the current process token.
    fn enable_debug_privilege(&self) -> Result<(), AttachError>;
}

#[cfg(windows)]
pub type NativePlatform = crate::nt::NtPlatform;

#[cfg(not(windows))]
pub type NativePlatform = Unsupported;

/// The platform backend for the host OS.
pub fn native() -> Result<NativePlatform, AttachError> {
    #[cfg(windows)]
    {
        Ok(crate::nt::NtPlatform::new())
    }

    #[cfg(not(windows))]
    {
        Err(AttachError::UnsupportedPlatform {
            operation: "attaching to processes",
        })
    }
}

/// Stands in for a backend on hosts without one. It has no values, so none of its methods can
/// ever be called.
#[derive(Debug)]
pub enum Unsupported {}

impl Platform for Unsupported {
    type Processes = Unsupported;
    type ThreadPool = Unsupported;

    fn processes(&self) -> &Self::Processes {
        self
    }

    fn thread_pool(&self) -> Self::ThreadPool {
        match *self {}
    }

    fn enable_debug_privilege(&self) -> Result<(), AttachError> {
        match *self {}
    }
}

impl ProcessSource for Unsupported {
    type Process = Unsupported;

    fn open_pid(&self, _: u32) -> Result<Self::Process, BackendError> {
        match *self {}
    }

    fn find_by_name(&self, _: &str) -> Result<Option<Self::Process>, BackendError> {
        match *self {}
    }
}

impl RemoteProcess for Unsupported {
    fn pid(&self) -> u32 {
        match *self {}
    }

    fn find_module(&self, _: &str) -> Result<Option<RemoteModule>, BackendError> {
        match *self {}
    }

    fn is_mapped(&self, _: RemoteModule) -> Result<bool, BackendError> {
        match *self {}
    }

    fn load_module(&self, _: &Path) -> Result<RemoteModule, BackendError> {
        match *self {}
    }

    fn unload_module(&self, _: RemoteModule) -> Result<(), BackendError> {
        match *self {}
    }

    fn call_export(&self, _: RemoteModule, _: &str) -> Result<Option<RemoteCall>, BackendError> {
        match *self {}
    }
}

impl ThreadPool for Unsupported {
    type Environment = Unsupported;
    type Pool = Unsupported;
    type CleanupGroup = Unsupported;
    type Wait = Unsupported;
    type Target = Unsupported;

    fn create_environment(&self) -> Result<Self::Environment, AttachError> {
        match *self {}
    }

    fn create_pool(&self, _: u32) -> Result<Self::Pool, AttachError> {
        match *self {}
    }

    fn bind_pool(&self, _: &mut Self::Environment, _: &Self::Pool) {
        match *self {}
    }

    fn create_cleanup_group(&self) -> Result<Self::CleanupGroup, AttachError> {
        match *self {}
    }

    fn bind_cleanup_group(&self, _: &mut Self::Environment, _: &Self::CleanupGroup) {
        match *self {}
    }

    fn create_wait(
        &self,
        _: &Self::Environment,
        _: Arc<WatchContext>,
    ) -> Result<Self::Wait, AttachError> {
        match *self {}
    }

    fn arm_wait(&self, _: &Self::Wait, _: &Self::Target) {
        match *self {}
    }

    fn wait_for_callbacks(&self, _: &Self::Wait) {
        match *self {}
    }

    fn destroy_wait(&self, wait: Self::Wait) {
        match wait {}
    }

    fn destroy_cleanup_group(&self, group: Self::CleanupGroup) {
        match group {}
    }

    fn destroy_pool(&self, pool: Self::Pool) {
        match pool {}
    }

    fn destroy_environment(&self, environment: Self::Environment) {
        match environment {}
    }
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::native;
    use crate::error::AttachError;

    #[test]
    fn native_backend_is_unavailable_off_windows() {
        assert!(matches!(
            native(),
            Err(AttachError::UnsupportedPlatform { .. })
        ));
    }
}
