use color_eyre::{eyre::Report, Section};
use tether_attach::{
    inject::{module_name, resolve_module_path},
    lifecycle, locate, AttachError, Platform, RemoteProcess,
};

use crate::{commands::ModuleArgs, config::Config, output::OutputBuilder};

pub fn inject<P: Platform>(
    platform: &P,
    config: &Config,
    args: ModuleArgs,
) -> color_eyre::Result<String> {
    let target = locate(platform.processes(), &args.target.selector(config))?;

    let path = resolve_module_path(&config.module(), &config.known_dirs.module_search_dirs())?;
    let name = module_name(&path);

    let attached =
        lifecycle::attach(&target, &path, config.load_export()).map_err(|error| match error {
            AttachError::ExportNotFound { module, .. }
            | AttachError::RemoteCallFailed { module, .. } => {
                let message = format!(
                    "{name} was injected into process {} at {module} but its load hook did not complete",
                    target.pid(),
                );

                Report::new(error)
                    .wrap_err(message)
                    .suggestion("eject it with `tether eject` before injecting it again")
            }
            error => Report::new(error),
        })?;

    let mut output = OutputBuilder::new(format!("Injected {name}"));
    output.property("Process", target.pid());
    output.property("Base address", attached.module);
    output.property(
        format!("{} returned", config.load_export()),
        attached.load.return_value,
    );

    if let Some(last_error) = attached.load.last_error {
        output.property("Last error", last_error);
    }

    Ok(output.build())
}
