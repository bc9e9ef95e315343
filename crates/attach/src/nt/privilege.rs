use std::io;

use tracing::{debug, instrument};
use windows::{
    core::PCWSTR,
    Win32::{
        Foundation::{CloseHandle, GetLastError, ERROR_NOT_ALL_ASSIGNED, HANDLE, LUID},
        Security::{
            AdjustTokenPrivileges, LookupPrivilegeValueW, LUID_AND_ATTRIBUTES,
            SE_DEBUG_NAME, SE_PRIVILEGE_ENABLED, TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES,
            TOKEN_QUERY,
        },
        System::Threading::{GetCurrentProcess, OpenProcessToken},
    },
};

use crate::{error::AttachError, scoped::ScopedResource};

fn denied(source: impl Into<io::Error>) -> AttachError {
    AttachError::PrivilegeDenied {
        source: source.into(),
    }
}

/// Enable `SeDebugPrivilege` on the token of the current process.
#[instrument(err)]
pub fn enable_debug_privilege() -> Result<(), AttachError> {
    let mut token = HANDLE::default();
    unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY, &mut token) }
        .map_err(denied)?;

    let token = ScopedResource::new(
        token,
        |token| !token.is_invalid(),
        |token| {
            let _ = unsafe { CloseHandle(token) };
        },
    );

    if !token.is_valid() {
        return Err(denied(io::Error::other("process token handle is invalid")));
    }

    let mut luid = LUID::default();
    unsafe { LookupPrivilegeValueW(PCWSTR::null(), SE_DEBUG_NAME, &mut luid) }.map_err(denied)?;

    let privileges = TOKEN_PRIVILEGES {
        PrivilegeCount: 1,
        Privileges: [LUID_AND_ATTRIBUTES {
            Luid: luid,
            Attributes: SE_PRIVILEGE_ENABLED,
        }],
    };

    unsafe { AdjustTokenPrivileges(*token.get(), false, Some(&raw const privileges), 0, None, None) }
        .map_err(denied)?;

    // AdjustTokenPrivileges reports success when the token lacks the privilege entirely.
    let status = unsafe { GetLastError() };
    if status == ERROR_NOT_ALL_ASSIGNED {
        return Err(denied(io::Error::from_raw_os_error(status.0 as i32)));
    }

    debug!("debug privilege enabled");

    Ok(())
}
