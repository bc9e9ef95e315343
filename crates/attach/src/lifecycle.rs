//! Ordering of injection, hook calls and ejection for a module that exports lifecycle hooks.

use std::path::Path;

use tracing::{info, instrument};

use crate::{
    error::AttachError,
    inject::{self, module_name},
    invoke::call_export,
    process::{RemoteCall, RemoteModule, RemoteProcess},
};

pub const DEFAULT_LOAD_EXPORT: &str = "Load";
pub const DEFAULT_UNLOAD_EXPORT: &str = "Unload";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attached {
    pub module: RemoteModule,
    pub load: RemoteCall,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Detached {
    pub module: RemoteModule,
    pub unload: RemoteCall,
}

/// Inject the module at `path` and run its load hook.
///
/// If the hook is missing or fails the module stays mapped and the error is returned; the caller
/// has to eject explicitly.
#[instrument(skip(target), fields(pid = target.pid()), err)]
pub fn attach<P: RemoteProcess>(
    target: &P,
    path: &Path,
    load_export: &str,
) -> Result<Attached, AttachError> {
    let module = inject::inject(target, path)?;
    let load = call_export(target, module, load_export)?;

    Ok(Attached { module, load })
}

/// Run the unload hook of the module named `name` and unmap it once the hook has returned.
///
/// The module is left mapped if the hook could not be called, since its code may still be
/// running. If the unmap itself fails, the hook's result is carried in
/// [`AttachError::EjectFailed`].
#[instrument(skip(target), fields(pid = target.pid()), err)]
pub fn detach<P: RemoteProcess>(
    target: &P,
    name: &str,
    unload_export: &str,
) -> Result<Detached, AttachError> {
    let module = inject::find_loaded(target, name)?.ok_or_else(|| AttachError::NotInjected {
        name: name.to_owned(),
    })?;

    let unload = call_export(target, module, unload_export)?;
    inject::eject(target, module).map_err(|error| match error {
        AttachError::EjectFailed { module, source, .. } => AttachError::EjectFailed {
            module,
            unload: Some(unload),
            source,
        },
        error => error,
    })?;

    info!(%module, "detached {name}");

    Ok(Detached { module, unload })
}

/// [`detach`] addressed by the path the module was injected from.
pub fn detach_path<P: RemoteProcess>(
    target: &P,
    path: &Path,
    unload_export: &str,
) -> Result<Detached, AttachError> {
    detach(target, &module_name(path), unload_export)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use pretty_assertions::assert_eq;

    use super::{attach, detach, detach_path, DEFAULT_LOAD_EXPORT, DEFAULT_UNLOAD_EXPORT};
    use crate::{error::AttachError, inject::find_loaded, testing::FakeProcess};

    fn target() -> FakeProcess {
        FakeProcess::new(100, "Target.exe")
            .with_export(DEFAULT_LOAD_EXPORT, 1)
            .with_export(DEFAULT_UNLOAD_EXPORT, 2)
    }

    #[test]
    fn attach_injects_then_calls_load() {
        let target = target();

        let attached = attach(&target, Path::new("/mods/mod.so"), DEFAULT_LOAD_EXPORT).unwrap();

        assert_ne!(0, attached.module.base_address());
        assert_eq!(1, attached.load.return_value);
        assert_eq!(vec!["load /mods/mod.so", "call Load"], target.events());
    }

    #[test]
    fn detach_calls_unload_before_unmapping() {
        let target = target();
        let attached = attach(&target, Path::new("/mods/mod.so"), DEFAULT_LOAD_EXPORT).unwrap();

        let detached = detach(&target, "mod.so", DEFAULT_UNLOAD_EXPORT).unwrap();

        assert_eq!(attached.module, detached.module);
        assert_eq!(2, detached.unload.return_value);
        assert_eq!(
            vec!["load /mods/mod.so", "call Load", "call Unload", "unload mod.so"],
            target.events()
        );
        assert_eq!(None, find_loaded(&target, "mod.so").unwrap());
    }

    #[test]
    fn detach_without_attach_is_not_injected_and_does_nothing() {
        let target = target();

        let error = detach_path(&target, Path::new("/mods/mod.so"), DEFAULT_UNLOAD_EXPORT)
            .unwrap_err();

        assert!(matches!(error, AttachError::NotInjected { ref name } if name == "mod.so"));
        assert!(target.events().is_empty());
    }

    #[test]
    fn failed_unload_hook_keeps_the_module_mapped() {
        let target = FakeProcess::new(100, "Target.exe").with_export(DEFAULT_LOAD_EXPORT, 1);
        let attached = attach(&target, Path::new("/mods/mod.so"), DEFAULT_LOAD_EXPORT).unwrap();

        let error = detach(&target, "mod.so", DEFAULT_UNLOAD_EXPORT).unwrap_err();

        assert!(matches!(error, AttachError::ExportNotFound { .. }));
        assert_eq!(Some(attached.module), find_loaded(&target, "mod.so").unwrap());
        assert_eq!(0, target.unload_count());
    }

    #[test]
    fn failed_unmap_reports_the_unload_result() {
        let target = FakeProcess::new(100, "Target.exe")
            .with_export(DEFAULT_LOAD_EXPORT, 1)
            .with_export(DEFAULT_UNLOAD_EXPORT, 42);
        let attached = attach(&target, Path::new("/mods/mod.so"), DEFAULT_LOAD_EXPORT).unwrap();
        target.fail_unloads();

        let error = detach(&target, "mod.so", DEFAULT_UNLOAD_EXPORT).unwrap_err();

        let AttachError::EjectFailed { module, unload, .. } = error else {
            panic!("expected EjectFailed, got {error:?}");
        };
        assert_eq!(attached.module, module);
        assert_eq!(Some(42), unload.map(|call| call.return_value));
        assert_eq!(vec!["Load", "Unload"], target.calls());
        assert_eq!(Some(attached.module), find_loaded(&target, "mod.so").unwrap());
    }

    #[test]
    fn reattach_after_detach_succeeds() {
        let target = target();
        attach(&target, Path::new("/mods/mod.so"), DEFAULT_LOAD_EXPORT).unwrap();
        detach(&target, "mod.so", DEFAULT_UNLOAD_EXPORT).unwrap();

        attach(&target, Path::new("/mods/mod.so"), DEFAULT_LOAD_EXPORT).unwrap();

        assert_eq!(2, target.load_count());
    }
}
