use std::{
    fs::File,
    io::{stderr, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{error::ErrorKind, ArgAction, CommandFactory, Parser};
use commands::Commands;
use tether_telemetry::TelemetryConfig;
use tracing::{debug, error, warn};

mod commands;
mod config;
#[cfg(target_os = "windows")]
mod console;
mod logs;
mod output;

use crate::{
    config::{Config, KnownDirs, Options},
    logs::LogsDb,
};

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    version,
    about = "Inject modules into a running process and watch it for exit",
    propagate_version = true,
    flatten_help = true
)]
struct Cli {
    /// Disable console logs. Errors are still printed.
    #[clap(short, long, action = ArgAction::SetTrue)]
    quiet: bool,

    /// Read this configuration file after the default search paths.
    #[clap(long, value_hint = clap::ValueHint::FilePath)]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Exit code for a command line that could not be parsed, or `None` if clap printed help or
/// version information.
fn parse_failure(error: &clap::Error) -> Option<u8> {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => None,
        _ => Some(1),
    }
}

/// Whether the full help should follow the parse error. clap already prints it for a bare
/// invocation.
fn wants_long_help(error: &clap::Error) -> bool {
    error.kind() != ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
}

fn parse() -> Result<Cli, ExitCode> {
    Cli::try_parse().map_err(|error| match parse_failure(&error) {
        None => {
            let _ = error.print();
            ExitCode::SUCCESS
        }
        Some(code) => {
            let _ = error.print();

            if wants_long_help(&error) {
                let mut stderr = stderr();
                let _ = writeln!(stderr);
                let _ = Cli::command().write_long_help(&mut stderr);
            }

            ExitCode::from(code)
        }
    })
}

fn open_log_file(config: &Config, command: &str) -> color_eyre::Result<File> {
    let logs = LogsDb::new(
        config
            .log_dir()
            .unwrap_or(Box::from(Path::new("tether-logs"))),
    );
    let path = logs.create_log_file(command)?;

    Ok(File::create(path)?)
}

fn run(config: &Config, command: Commands) -> color_eyre::Result<String> {
    if let Commands::Info = command {
        return commands::info::info(config);
    }

    let platform = tether_attach::native()?;
    commands::dispatch(&platform, config, command)
}

fn main() -> ExitCode {
    tether_telemetry::install_error_handler();

    // Some Windows terminals do not display ANSI escape codes by default.
    #[cfg(target_os = "windows")]
    let _ = crate::console::enable_ansi();

    let cli = match parse() {
        Ok(cli) => cli,
        Err(code) => return code,
    };

    let known_dirs = KnownDirs::default();
    let config_files = known_dirs
        .config_files()
        .map(PathBuf::from)
        .chain(cli.config_file.clone());

    let (file_options, config_failures) = Options::from_files(config_files);
    let options = file_options.merge(cli.command.options());

    let config = Config {
        known_dirs,
        options,
    };

    let mut telemetry_config = TelemetryConfig::default();

    if !cli.quiet {
        telemetry_config = telemetry_config.with_console_writer(stderr);
    }

    let mut log_file_error = None;

    if config.log_to_file() {
        match open_log_file(&config, cli.command.name()) {
            Ok(file) => telemetry_config = telemetry_config.with_file(file),
            Err(error) => log_file_error = Some(error),
        }
    }

    let _telemetry_guard = tether_telemetry::install(telemetry_config);

    debug!(version = env!("CARGO_PKG_VERSION"), command = cli.command.name());

    for (path, error) in config_failures {
        error!(?path, ?error, "failed to load configuration");
    }

    if let Some(error) = log_file_error {
        warn!(?error, "logging to file is disabled for this run");
    }

    let command = cli.command;
    let result = tether_telemetry::with_root_span(command.name(), || run(&config, command));

    match result {
        Ok(output) => {
            print!("{output}");
            ExitCode::SUCCESS
        }
        Err(report) => {
            eprintln!("Error: {report:?}");
            ExitCode::FAILURE
        }
    }
}
