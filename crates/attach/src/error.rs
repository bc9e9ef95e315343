use std::{io, path::PathBuf};

use thiserror::Error;

use crate::process::{ProcessSelector, RemoteCall, RemoteModule};

/// An error raised by a process backend (the OS, or the injection library driving it).
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum AttachError {
    /// The target process could not be opened. Covers both "no such process" and
    /// "access denied".
    #[error("process not running: {selector}")]
    NotFound { selector: ProcessSelector },

    #[error("{name} is already injected at {module}, please eject first")]
    AlreadyInjected { name: String, module: RemoteModule },

    #[error("{name} is not injected")]
    NotInjected { name: String },

    #[error("could not find module file {}", path.display())]
    ModuleNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to inject {}", path.display())]
    InjectionFailed {
        path: PathBuf,
        #[source]
        source: BackendError,
    },

    /// `unload` holds the result of the unload hook when it ran before the unmap failed.
    #[error("failed to eject module at {module}")]
    EjectFailed {
        module: RemoteModule,
        unload: Option<RemoteCall>,
        #[source]
        source: BackendError,
    },

    #[error("no export named `{symbol}` in module at {module}")]
    ExportNotFound { module: RemoteModule, symbol: String },

    #[error("remote call to `{symbol}` failed")]
    RemoteCallFailed {
        module: RemoteModule,
        symbol: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to create thread pool {object}")]
    ThreadPoolSetupFailed {
        object: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to acquire debug privilege")]
    PrivilegeDenied {
        #[source]
        source: io::Error,
    },

    #[error("{operation} is not supported on this platform")]
    UnsupportedPlatform { operation: &'static str },
}

impl AttachError {
    pub(crate) fn thread_pool(object: &'static str, source: impl Into<io::Error>) -> Self {
        AttachError::ThreadPoolSetupFailed {
            object,
            source: source.into(),
        }
    }
}
