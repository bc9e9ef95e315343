use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use super::CONFIG_FILE_NAME;

#[derive(Debug)]
pub struct KnownDirs {
    /// The current working directory we launched from.
    cwd: Option<Box<Path>>,

    /// The directory containing the binary we launched.
    exe_dir: Option<Box<Path>>,

    project_dirs: Option<ProjectDirs>,
}

pub trait OptionalPathExt {
    fn join<P>(&self, path: P) -> Option<Box<Path>>
    where
        P: AsRef<Path>;
}

impl<S: AsRef<Path>> OptionalPathExt for Option<S> {
    fn join<P>(&self, path: P) -> Option<Box<Path>>
    where
        P: AsRef<Path>,
    {
        self.as_ref()
            .map(|parent| parent.as_ref().join(path).into_boxed_path())
    }
}

const PROJECT_QUALIFIER: &str = "io.github";
const PROJECT_ORG: &str = "tether";
const PROJECT_NAME: &str = "tether";

impl Default for KnownDirs {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir()
                .map(|cwd| cwd.into_boxed_path())
                .ok(),
            exe_dir: std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf))
                .map(PathBuf::into_boxed_path),
            project_dirs: ProjectDirs::from(PROJECT_QUALIFIER, PROJECT_ORG, PROJECT_NAME),
        }
    }
}

impl KnownDirs {
    /// Directories that exist nowhere, for tests that must not pick up files from the host.
    #[cfg(test)]
    pub fn empty() -> Self {
        Self {
            cwd: None,
            exe_dir: None,
            project_dirs: None,
        }
    }

    #[cfg(test)]
    pub fn with_dirs(cwd: &Path, exe_dir: &Path) -> Self {
        Self {
            cwd: Some(Box::from(cwd)),
            exe_dir: Some(Box::from(exe_dir)),
            project_dirs: None,
        }
    }

    /// Discover the data directory. This location is used to store log files.
    pub fn data_dir(&self) -> Option<Box<Path>> {
        self.project_dirs
            .as_ref()
            .map(|dirs| Box::from(dirs.data_local_dir()))
            .or(self.cwd.clone())
    }

    /// Discover the candidate paths to tether configuration directories, ordered from least
    /// priority to highest.
    ///
    /// These can be one of the following:
    ///
    /// - $XDG_CONFIG_DIR:=$HOME/.config/tether (Linux)
    /// - %LOCALAPPDATA%/tether/tether/config (Windows)
    /// - the directory containing the tether executable
    /// - the current working directory
    pub fn config_dirs(&self) -> impl Iterator<Item = Box<Path>> {
        let config_dirs = [
            self.project_dirs
                .as_ref()
                .map(|proj| Box::from(proj.config_local_dir())),
            self.exe_dir.clone(),
            self.cwd.clone(),
        ];

        config_dirs.into_iter().flatten()
    }

    /// Candidate `tether.toml` files, ordered from least priority to highest.
    pub fn config_files(&self) -> impl Iterator<Item = Box<Path>> {
        self.config_dirs()
            .map(|dir| dir.join(CONFIG_FILE_NAME).into_boxed_path())
    }

    /// Directories a relative module path is resolved against, in search order.
    pub fn module_search_dirs(&self) -> Vec<&Path> {
        [self.exe_dir.as_deref(), self.cwd.as_deref()]
            .into_iter()
            .flatten()
            .collect()
    }
}
