use std::{
    io,
    path::{Path, PathBuf},
};

use normpath::PathExt;
use tracing::{debug, info, instrument};

use crate::{
    error::AttachError,
    process::{RemoteModule, RemoteProcess},
};

/// The file name a module is known by once it is mapped into a process.
pub fn module_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}

/// Resolve a module path the way the target's loader should see it.
///
/// Absolute paths are taken as-is. Relative paths are tried against each of `search_dirs` in
/// order. The first candidate that exists is normalized and returned, so that the loader inside
/// the target (whose working directory is unrelated to ours) receives an absolute path and
/// searches the module's own directory for its dependencies.
pub fn resolve_module_path(path: &Path, search_dirs: &[&Path]) -> Result<PathBuf, AttachError> {
    let candidates: Vec<PathBuf> = if path.is_absolute() {
        vec![path.to_path_buf()]
    } else {
        search_dirs.iter().map(|dir| dir.join(path)).collect()
    };

    let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no search directories");

    for candidate in candidates {
        match candidate.normalize() {
            Ok(resolved) if resolved.as_path().is_file() => return Ok(resolved.into_path_buf()),
            Ok(resolved) => {
                last_error = io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is not a file", resolved.as_path().display()),
                )
            }
            Err(error) => last_error = error,
        }
        debug!(?candidate, %last_error, "module path candidate rejected");
    }

    Err(AttachError::ModuleNotFound {
        path: path.to_path_buf(),
        source: last_error,
    })
}

/// Look up a module that is already mapped into `target`.
#[instrument(skip(target), fields(pid = target.pid()), err)]
pub fn find_loaded<P: RemoteProcess>(
    target: &P,
    name: &str,
) -> Result<Option<RemoteModule>, AttachError> {
    // A failed lookup is indistinguishable from "not loaded" for the caller; both mean there is
    // nothing to refer to.
    match target.find_module(name) {
        Ok(module) => Ok(module),
        Err(error) => {
            debug!(%error, "module lookup failed");
            Ok(None)
        }
    }
}

/// Map the module at `path` (already resolved, see [`resolve_module_path`]) into `target`.
///
/// Refuses with [`AttachError::AlreadyInjected`] if a module with the same file name is already
/// mapped, so the module's own initialization never runs twice.
#[instrument(skip(target), fields(pid = target.pid()), err)]
pub fn inject<P: RemoteProcess>(target: &P, path: &Path) -> Result<RemoteModule, AttachError> {
    let name = module_name(path);

    if let Some(module) = find_loaded(target, &name)? {
        return Err(AttachError::AlreadyInjected { name, module });
    }

    let module = target
        .load_module(path)
        .map_err(|source| AttachError::InjectionFailed {
            path: path.to_path_buf(),
            source,
        })?;

    info!(%module, "injected {name}");

    Ok(module)
}

/// Unmap `module` from `target`.
///
/// The module's teardown export must already have returned. A handle that is no longer mapped
/// (for example one left over from an earlier session) is rejected without touching the target.
#[instrument(skip(target), fields(pid = target.pid()), err)]
pub fn eject<P: RemoteProcess>(target: &P, module: RemoteModule) -> Result<(), AttachError> {
    let mapped = target.is_mapped(module).unwrap_or_else(|error| {
        debug!(%error, "module enumeration failed");
        false
    });

    if !mapped {
        return Err(AttachError::NotInjected {
            name: module.to_string(),
        });
    }

    target
        .unload_module(module)
        .map_err(|source| AttachError::EjectFailed {
            module,
            unload: None,
            source,
        })?;

    info!(%module, "ejected module");

    Ok(())
}
