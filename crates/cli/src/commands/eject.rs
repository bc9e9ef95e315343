use color_eyre::{eyre::Report, Section};
use tether_attach::{
    inject::module_name, lifecycle, locate, AttachError, Platform, RemoteProcess,
};

use crate::{commands::ModuleArgs, config::Config, output::OutputBuilder};

pub fn eject<P: Platform>(
    platform: &P,
    config: &Config,
    args: ModuleArgs,
) -> color_eyre::Result<String> {
    let target = locate(platform.processes(), &args.target.selector(config))?;

    // Only the file name matters here; the file itself doesn't have to exist any more.
    let name = module_name(&config.module());
    let detached =
        lifecycle::detach(&target, &name, config.unload_export()).map_err(|error| match error {
            AttachError::EjectFailed {
                unload: Some(unload),
                module,
                ..
            } => {
                let message = format!(
                    "{} returned {} but {name} could not be unmapped from process {} at {module}",
                    config.unload_export(),
                    unload.return_value,
                    target.pid(),
                );

                Report::new(error).wrap_err(message).suggestion(
                    "the unload hook has already run; restart the target to release the module",
                )
            }
            error => Report::new(error),
        })?;

    let mut output = OutputBuilder::new(format!("Ejected {name}"));
    output.property("Process", target.pid());
    output.property("Base address", detached.module);
    output.property(
        format!("{} returned", config.unload_export()),
        detached.unload.return_value,
    );

    if let Some(last_error) = detached.unload.last_error {
        output.property("Last error", last_error);
    }

    Ok(output.build())
}
