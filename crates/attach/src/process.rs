use std::{fmt, num::NonZeroUsize, path::Path};

use tracing::{debug, instrument};

use crate::error::{AttachError, BackendError};

/// A module mapped into a *target* process.
///
/// The base address is only meaningful inside the target's address space, so there is no way to
/// turn this into a pointer in the controller. It can only be handed back to the backend that
/// produced it, or printed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RemoteModule(NonZeroUsize);

impl RemoteModule {
    /// Wrap a base address reported by a backend. A null base address is not a module.
    pub fn from_base_address(base: usize) -> Option<Self> {
        NonZeroUsize::new(base).map(Self)
    }

    pub fn base_address(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for RemoteModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteModule({self})")
    }
}

impl fmt::Display for RemoteModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}

/// Result of a remote call: the function's return value and, when the backend can observe it,
/// the target-side last-error code at the time it returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteCall {
    pub return_value: usize,
    pub last_error: Option<u32>,
}

/// A live, opened target process.
///
/// Implementations own the underlying OS handle and close it when dropped.
pub trait RemoteProcess {
    fn pid(&self) -> u32;

    /// Find a mapped module by file name (case-insensitive).
    fn find_module(&self, name: &str) -> Result<Option<RemoteModule>, BackendError>;

    /// Whether `module` is currently mapped into this process.
    fn is_mapped(&self, module: RemoteModule) -> Result<bool, BackendError>;

    /// Ask the target's loader to map the module at `path`. The path is already absolute.
    fn load_module(&self, path: &Path) -> Result<RemoteModule, BackendError>;

    fn unload_module(&self, module: RemoteModule) -> Result<(), BackendError>;

    /// Call a zero-argument export of `module` on a thread in the target and wait for it to
    /// return. `Ok(None)` means the module has no such export.
    fn call_export(
        &self,
        module: RemoteModule,
        symbol: &str,
    ) -> Result<Option<RemoteCall>, BackendError>;
}

/// How a target process is selected on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessSelector {
    Pid(u32),
    Name(String),
}

impl fmt::Display for ProcessSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessSelector::Pid(pid) => write!(f, "pid {pid}"),
            ProcessSelector::Name(name) => write!(f, "{name}"),
        }
    }
}

/// Opens processes. Implemented once per platform.
pub trait ProcessSource {
    type Process: RemoteProcess;

    fn open_pid(&self, pid: u32) -> Result<Self::Process, BackendError>;

    fn find_by_name(&self, name: &str) -> Result<Option<Self::Process>, BackendError>;
}

/// Resolve `selector` to an opened process.
///
/// Every failure, including "access denied", is reported as [`AttachError::NotFound`]. The
/// underlying cause is logged at debug level.
#[instrument(skip(source), err)]
pub fn locate<S: ProcessSource>(
    source: &S,
    selector: &ProcessSelector,
) -> Result<S::Process, AttachError> {
    let opened = match selector {
        ProcessSelector::Pid(pid) => source.open_pid(*pid).map(Some),
        ProcessSelector::Name(name) => source.find_by_name(name),
    };

    match opened {
        Ok(Some(process)) => {
            debug!(pid = process.pid(), "located target process");
            Ok(process)
        }
        Ok(None) => Err(AttachError::NotFound {
            selector: selector.clone(),
        }),
        Err(error) => {
            debug!(%error, "process lookup failed");
            Err(AttachError::NotFound {
                selector: selector.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{locate, ProcessSelector, RemoteModule, RemoteProcess};
    use crate::{
        error::AttachError,
        testing::{FakeProcess, FakeProcessSource},
    };

    #[test]
    fn null_base_address_is_not_a_module() {
        assert_eq!(None, RemoteModule::from_base_address(0));
    }

    #[test]
    fn module_displays_as_hex() {
        let module = RemoteModule::from_base_address(0x7ff6_1000_0000).unwrap();
        assert_eq!("0x7ff610000000", module.to_string());
    }

    #[test]
    fn locates_by_pid_and_name() {
        let source = FakeProcessSource::default();
        source.spawn(FakeProcess::new(42, "Target.exe"));

        let by_pid = locate(&source, &ProcessSelector::Pid(42)).unwrap();
        assert_eq!(42, by_pid.pid());

        let by_name = locate(&source, &ProcessSelector::Name("target.EXE".into())).unwrap();
        assert_eq!(42, by_name.pid());
    }

    #[test]
    fn missing_name_is_not_found_and_opens_nothing() {
        let source = FakeProcessSource::default();

        let error = locate(&source, &ProcessSelector::Name("Target.exe".into())).unwrap_err();

        assert!(matches!(
            error,
            AttachError::NotFound { selector: ProcessSelector::Name(ref name) } if name == "Target.exe"
        ));
        assert_eq!(0, source.opened());
    }

    #[test]
    fn open_failures_are_reported_as_not_found() {
        let source = FakeProcessSource::default();
        source.deny_access(7);

        let error = locate(&source, &ProcessSelector::Pid(7)).unwrap_err();

        assert!(matches!(
            error,
            AttachError::NotFound {
                selector: ProcessSelector::Pid(7)
            }
        ));
    }
}
