//! Attach a module to a running process, call into it, and watch the process for exit.
//!
//! The logic in this crate is written against the [`Platform`] traits. The Windows
//! implementation lives in [`nt`]; other hosts get [`platform::Unsupported`].

pub mod error;
pub mod inject;
pub mod invoke;
pub mod lifecycle;
pub mod platform;
pub mod process;
pub mod scoped;
pub mod watch;

#[cfg(windows)]
pub mod nt;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use self::{
    error::AttachError,
    lifecycle::{attach, detach, detach_path, Attached, Detached},
    platform::{native, NativePlatform, Platform},
    process::{locate, ProcessSelector, ProcessSource, RemoteCall, RemoteModule, RemoteProcess},
    watch::{Canceller, ProcessWatcher, WatchOutcome},
};
