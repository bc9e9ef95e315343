use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use chrono::Local;

/// Per-command log files, keeping the most recent few.
pub struct LogsDb {
    base_dir: Box<Path>,
    retention: usize,
}

impl LogsDb {
    pub fn new<P: Into<Box<Path>>>(path: P) -> Self {
        Self {
            base_dir: path.into(),
            retention: 5,
        }
    }

    fn existing_logs(dir: &Path) -> Vec<(SystemTime, PathBuf)> {
        fs::read_dir(dir)
            .map(|dir| {
                dir.filter_map(|entry| {
                    let entry = entry.ok()?;
                    let metadata = entry.metadata().ok()?;
                    if metadata.is_file()
                        && entry.path().extension().is_some_and(|ext| ext == "log")
                    {
                        Some((metadata.modified().ok()?, entry.path()))
                    } else {
                        None
                    }
                })
                .collect()
            })
            .unwrap_or_default()
    }

    /// Pick a path for a new log file of `command`, removing the oldest logs so that at most
    /// `retention` remain once it is written.
    pub fn create_log_file(&self, command: &str) -> color_eyre::Result<Box<Path>> {
        let command_log_folder = self.base_dir.join(command);
        fs::create_dir_all(&command_log_folder)?;

        let mut log_files = Self::existing_logs(&command_log_folder);
        log_files.sort_by_key(|(time, _)| *time);

        let excess = (log_files.len() + 1).saturating_sub(self.retention);
        for (_, path_to_delete) in log_files.iter().take(excess) {
            let _ = fs::remove_file(path_to_delete);
        }

        let now = Local::now();
        let log_file_suffix = now.format("%Y-%m-%d_%H-%M-%S%.3f").to_string();
        let log_file_path = command_log_folder.join(format!("{log_file_suffix}.log"));

        Ok(log_file_path.into_boxed_path())
    }
}
