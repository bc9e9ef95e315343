use std::fs::File;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter, MakeWriter},
    prelude::*,
    EnvFilter,
};

#[derive(Default)]
pub struct TelemetryConfig {
    console_writer: Option<BoxMakeWriter>,
    file: Option<File>,
}

impl TelemetryConfig {
    pub fn with_console_writer<W>(mut self, writer: W) -> Self
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        self.console_writer = Some(BoxMakeWriter::new(writer));
        self
    }

    /// Also write plain-text logs to `file`. Writes happen on a background thread.
    pub fn with_file(mut self, file: File) -> Self {
        self.file = Some(file);
        self
    }
}

/// Flushes buffered file logs when dropped. Keep it alive until the program exits.
pub struct TelemetryGuard {
    _file_guard: Option<WorkerGuard>,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn install(config: TelemetryConfig) -> TelemetryGuard {
    let TelemetryConfig {
        console_writer,
        file,
    } = config;

    let (file_writer, file_guard): (Option<NonBlocking>, _) = match file {
        Some(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(env_filter())
        .with(file_writer.map(|writer| {
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer)
        }))
        .with(console_writer.map(|writer| {
            fmt::layer()
                .compact()
                .with_ansi(true)
                .without_time()
                .with_target(false)
                .with_writer(writer)
        }))
        .try_init();

    if let Err(error) = installed {
        eprintln!("tracing was already initialized: {error}");
    }

    TelemetryGuard {
        _file_guard: file_guard,
    }
}

/// Install the panic and error report hooks.
pub fn install_error_handler() {
    let installed = color_eyre::config::HookBuilder::default()
        .issue_url(concat!(env!("CARGO_PKG_REPOSITORY"), "/issues/new"))
        .add_issue_metadata("version", env!("CARGO_PKG_VERSION"))
        .display_env_section(false)
        .install();

    if let Err(error) = installed {
        eprintln!("failed to install error handler: {error}");
    }
}

/// Run `f` inside a root span named after the command.
pub fn with_root_span<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    tracing::info_span!("command", name).in_scope(f)
}
