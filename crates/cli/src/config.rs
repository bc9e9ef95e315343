use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tether_attach::lifecycle::{DEFAULT_LOAD_EXPORT, DEFAULT_UNLOAD_EXPORT};

use crate::config::known_paths::OptionalPathExt;

pub mod known_paths;

pub use known_paths::KnownDirs;

pub const CONFIG_FILE_NAME: &str = "tether.toml";
pub const DEFAULT_MODULE: &str = "tether_module.dll";
pub const DEFAULT_PROCESS_NAME: &str = "Target.exe";

/// Settings read from `tether.toml` files and overridden by command-line flags.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    /// Module injected or ejected when `--dll` is not given.
    pub(crate) module: Option<PathBuf>,

    /// Process targeted when neither `--pid` nor `--pname` is given.
    pub(crate) process_name: Option<String>,

    pub(crate) load_export: Option<String>,

    pub(crate) unload_export: Option<String>,

    /// Give up watching after this many seconds. Unset means wait until the process exits.
    pub(crate) watch_timeout_secs: Option<u64>,

    pub(crate) log_to_file: Option<bool>,

    pub(crate) debug_privilege: Option<bool>,
}

impl Options {
    /// Combine two layers of options, preferring values set in `other`.
    pub fn merge(self, other: Self) -> Self {
        Self {
            module: other.module.or(self.module),
            process_name: other.process_name.or(self.process_name),
            load_export: other.load_export.or(self.load_export),
            unload_export: other.unload_export.or(self.unload_export),
            watch_timeout_secs: other.watch_timeout_secs.or(self.watch_timeout_secs),
            log_to_file: other.log_to_file.or(self.log_to_file),
            debug_privilege: other.debug_privilege.or(self.debug_privilege),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let encoded_toml = fs::read_to_string(path)?;
        let toml = toml::from_str(&encoded_toml)?;

        Ok(toml)
    }

    /// Load and merge `files` in order. Files that don't exist are skipped silently; files that
    /// can't be read or parsed are skipped and returned alongside the merged options.
    pub fn from_files<P: AsRef<Path>>(
        files: impl IntoIterator<Item = P>,
    ) -> (Options, Vec<(PathBuf, color_eyre::Report)>) {
        let mut config = Options::default();
        let mut failures = vec![];

        for file in files {
            let path = file.as_ref();

            if !path.exists() {
                continue;
            }

            match Options::from_file(path) {
                Ok(item) => config = config.merge(item),
                Err(error) => failures.push((path.to_path_buf(), error)),
            }
        }

        (config, failures)
    }
}

pub struct Config {
    pub options: Options,
    pub known_dirs: KnownDirs,
}

impl Config {
    pub fn log_dir(&self) -> Option<Box<Path>> {
        self.known_dirs.data_dir().join("logs")
    }

    pub fn module(&self) -> PathBuf {
        self.options
            .module
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODULE))
    }

    pub fn process_name(&self) -> &str {
        self.options
            .process_name
            .as_deref()
            .unwrap_or(DEFAULT_PROCESS_NAME)
    }

    pub fn load_export(&self) -> &str {
        self.options
            .load_export
            .as_deref()
            .unwrap_or(DEFAULT_LOAD_EXPORT)
    }

    pub fn unload_export(&self) -> &str {
        self.options
            .unload_export
            .as_deref()
            .unwrap_or(DEFAULT_UNLOAD_EXPORT)
    }

    pub fn watch_timeout(&self) -> Option<Duration> {
        self.options.watch_timeout_secs.map(Duration::from_secs)
    }

    pub fn log_to_file(&self) -> bool {
        self.options.log_to_file.unwrap_or(true)
    }

    pub fn debug_privilege(&self) -> bool {
        self.options.debug_privilege.unwrap_or(true)
    }
}
