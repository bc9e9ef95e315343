use tracing::{info, instrument};

use crate::{
    error::AttachError,
    process::{RemoteCall, RemoteModule, RemoteProcess},
};

/// Call the zero-argument export `symbol` of `module` inside `target`, blocking until it returns.
///
/// The invoker attaches no meaning to the symbol; lifecycle hooks are just exports that happen to
/// be called `Load` and `Unload` by convention.
#[instrument(skip(target), fields(pid = target.pid()), err)]
pub fn call_export<P: RemoteProcess>(
    target: &P,
    module: RemoteModule,
    symbol: &str,
) -> Result<RemoteCall, AttachError> {
    let call = target
        .call_export(module, symbol)
        .map_err(|source| AttachError::RemoteCallFailed {
            module,
            symbol: symbol.to_owned(),
            source,
        })?
        .ok_or_else(|| AttachError::ExportNotFound {
            module,
            symbol: symbol.to_owned(),
        })?;

    info!(
        return_value = call.return_value,
        last_error = call.last_error,
        "{symbol}() returned"
    );

    Ok(call)
}
