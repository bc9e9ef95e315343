use color_eyre::owo_colors::OwoColorize;

use crate::{config::Config, output::OutputBuilder};

fn format_path<P: AsRef<std::path::Path>>(path: Option<P>) -> String {
    match path {
        None => "<none>".red().to_string(),
        Some(path) => path.as_ref().to_string_lossy().to_string(),
    }
}

fn format_status(status: bool) -> String {
    if status {
        "Found".green().to_string()
    } else {
        "Not found".red().to_string()
    }
}

pub fn info(config: &Config) -> color_eyre::Result<String> {
    let mut output = OutputBuilder::new("Configuration");

    output.property("Module", config.module().display());
    output.property("Process name", config.process_name());
    output.property("Load export", config.load_export());
    output.property("Unload export", config.unload_export());
    output.property(
        "Watch timeout",
        config
            .watch_timeout()
            .map(|timeout| format!("{}s", timeout.as_secs()))
            .unwrap_or_else(|| "none".to_owned()),
    );
    output.property("Debug privilege", config.debug_privilege());
    output.property("Log to file", config.log_to_file());
    output.property("Logs directory", format_path(config.log_dir()));

    output.section("Configuration search paths", |builder| {
        for (index, file) in config.known_dirs.config_files().enumerate() {
            builder.property(
                format!("{index}"),
                format!("{} ({})", file.display(), format_status(file.is_file())),
            );
        }
    });

    output.section("Module search paths", |builder| {
        for (index, dir) in config.known_dirs.module_search_dirs().iter().enumerate() {
            builder.property(format!("{index}"), dir.display());
        }
    });

    Ok(output.build())
}

#[cfg(test)]
mod tests {
    use assert_fs::{
        prelude::{FileWriteStr, PathChild, PathCreateDir},
        TempDir,
    };

    use super::info;
    use crate::config::{Config, KnownDirs, Options};

    #[test]
    fn shows_effective_options_and_search_paths() -> color_eyre::Result<()> {
        let dir = TempDir::new()?;
        let exe_dir = dir.child("bin");
        exe_dir.create_dir_all()?;
        let cwd = dir.child("work");
        cwd.create_dir_all()?;
        cwd.child("tether.toml").write_str("process_name = \"Other.exe\"\n")?;

        let known_dirs = KnownDirs::with_dirs(cwd.path(), exe_dir.path());
        let (options, failures) = Options::from_files(known_dirs.config_files());
        assert!(failures.is_empty());

        let output = info(&Config {
            options,
            known_dirs,
        })?;

        assert!(output.starts_with("● Configuration\n"));
        assert!(output.contains("Process name: Other.exe"));
        assert!(output.contains("Module: tether_module.dll"));
        assert!(output.contains("Watch timeout: none"));
        assert!(output.contains("● Configuration search paths"));
        assert!(output.contains(&cwd.child("tether.toml").path().display().to_string()));
        assert!(output.contains("● Module search paths"));
        assert!(output.contains(&exe_dir.path().display().to_string()));

        Ok(())
    }
}
