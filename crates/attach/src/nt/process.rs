use std::{os::windows::io::AsRawHandle, path::Path};

use dll_syringe::{
    process::{BorrowedProcessModule, ModuleHandle, OwnedProcess, Process},
    Syringe,
};
use tracing::debug;

use crate::{
    error::BackendError,
    process::{ProcessSource, RemoteCall, RemoteModule, RemoteProcess},
};

/// Remote entry points take no arguments and return a pointer-sized value.
type EntryPoint = extern "system" fn() -> usize;

/// An opened target process. The process handle is closed when this is dropped.
pub struct NtProcess {
    pid: u32,
    syringe: Syringe,
}

impl NtProcess {
    fn new(process: OwnedProcess) -> Result<Self, BackendError> {
        let pid = process.pid()?.get();

        Ok(Self {
            pid,
            syringe: Syringe::for_process(process),
        })
    }

    /// The native process handle, valid for as long as `self` is.
    pub fn raw_handle(&self) -> std::os::windows::io::RawHandle {
        self.syringe.process().as_raw_handle()
    }

    fn borrow_module(&self, module: RemoteModule) -> BorrowedProcessModule<'_> {
        // SAFETY: callers check that `module` is mapped in this process before borrowing it.
        unsafe {
            BorrowedProcessModule::new_unchecked(
                module.base_address() as ModuleHandle,
                self.syringe.process(),
            )
        }
    }
}

impl std::fmt::Debug for NtProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NtProcess").field("pid", &self.pid).finish()
    }
}

fn to_remote(handle: ModuleHandle) -> Result<RemoteModule, BackendError> {
    RemoteModule::from_base_address(handle as usize)
        .ok_or_else(|| "loader returned a null module handle".into())
}

impl RemoteProcess for NtProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn find_module(&self, name: &str) -> Result<Option<RemoteModule>, BackendError> {
        self.syringe
            .process()
            .find_module_by_name(name)?
            .map(|module| to_remote(module.handle()))
            .transpose()
    }

    fn is_mapped(&self, module: RemoteModule) -> Result<bool, BackendError> {
        Ok(self
            .syringe
            .process()
            .modules()?
            .iter()
            .any(|mapped| mapped.handle() as usize == module.base_address()))
    }

    fn load_module(&self, path: &Path) -> Result<RemoteModule, BackendError> {
        let module = self.syringe.inject(path)?;

        to_remote(module.handle())
    }

    fn unload_module(&self, module: RemoteModule) -> Result<(), BackendError> {
        self.syringe.eject(self.borrow_module(module))?;

        Ok(())
    }

    fn call_export(
        &self,
        module: RemoteModule,
        symbol: &str,
    ) -> Result<Option<RemoteCall>, BackendError> {
        // SAFETY: exports called this way are required to match `EntryPoint`.
        let procedure =
            unsafe { self.syringe.get_raw_procedure::<EntryPoint>(self.borrow_module(module), symbol) }?;

        let Some(procedure) = procedure else {
            return Ok(None);
        };

        let return_value = procedure.call()?;

        // The call runs on a thread created for it, whose last-error value is gone by the time
        // the result is read back.
        Ok(Some(RemoteCall {
            return_value,
            last_error: None,
        }))
    }
}

#[derive(Debug, Default)]
pub struct NtProcessSource;

impl ProcessSource for NtProcessSource {
    type Process = NtProcess;

    fn open_pid(&self, pid: u32) -> Result<Self::Process, BackendError> {
        NtProcess::new(OwnedProcess::from_pid(pid)?)
    }

    fn find_by_name(&self, name: &str) -> Result<Option<Self::Process>, BackendError> {
        let Some(process) = OwnedProcess::find_first_by_name(name) else {
            debug!(name, "no process with this name");
            return Ok(None);
        };

        NtProcess::new(process).map(Some)
    }
}
