use clap::*;
use tether_attach::{Platform, ProcessSelector};
use tracing::warn;

use crate::config::{Config, Options};

pub mod eject;
pub mod info;
pub mod inject;
pub mod watch;

#[derive(Subcommand, Debug)]
#[command(flatten_help = true)]
pub enum Commands {
    /// Inject a module into a running process and call its load hook.
    #[clap(disable_version_flag = true)]
    Inject(ModuleArgs),

    /// Call the unload hook of an injected module, then eject it.
    #[clap(disable_version_flag = true)]
    Eject(ModuleArgs),

    /// Block until a process exits.
    #[clap(disable_version_flag = true)]
    Watch(WatchArgs),

    /// Show the effective configuration and search paths.
    #[clap(disable_version_flag = true)]
    Info,
}

/// Selects the target process. Without either flag the configured process name is used.
#[derive(Args, Debug, Default, PartialEq, Eq)]
#[group(multiple = false)]
pub struct TargetArgs {
    /// Id of the target process.
    #[clap(short, long)]
    pub pid: Option<u32>,

    /// Executable name of the target process.
    #[clap(short = 'n', long)]
    pub pname: Option<String>,
}

#[derive(Args, Debug, PartialEq, Eq)]
pub struct ModuleArgs {
    /// Path to the module. Relative paths are looked up next to tether, then in the current
    /// directory.
    #[clap(short, long, value_hint = clap::ValueHint::FilePath)]
    pub dll: Option<std::path::PathBuf>,

    #[clap(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug, PartialEq, Eq)]
pub struct WatchArgs {
    #[clap(flatten)]
    pub target: TargetArgs,

    /// Stop watching after this many seconds.
    #[clap(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl TargetArgs {
    pub fn selector(&self, config: &Config) -> ProcessSelector {
        match self.pid {
            Some(pid) => ProcessSelector::Pid(pid),
            None => ProcessSelector::Name(config.process_name().to_owned()),
        }
    }

    fn options(&self) -> Options {
        Options {
            process_name: self.pname.clone(),
            ..Default::default()
        }
    }
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Inject(_) => "inject",
            Commands::Eject(_) => "eject",
            Commands::Watch(_) => "watch",
            Commands::Info => "info",
        }
    }

    /// Whether the command opens a target process.
    pub fn targets_process(&self) -> bool {
        !matches!(self, Commands::Info)
    }

    /// Settings given on the command line, layered over the configuration files.
    pub fn options(&self) -> Options {
        match self {
            Commands::Inject(args) | Commands::Eject(args) => Options {
                module: args.dll.clone(),
                ..args.target.options()
            },
            Commands::Watch(args) => Options {
                watch_timeout_secs: args.timeout,
                ..args.target.options()
            },
            Commands::Info => Options::default(),
        }
    }
}

/// Run `command` against `platform`, returning what should be printed on success.
///
/// Debug privilege is requested once, before any process is opened. Failing to get it is not
/// fatal: the target may well be accessible without it.
pub fn dispatch<P: Platform>(
    platform: &P,
    config: &Config,
    command: Commands,
) -> color_eyre::Result<String> {
    if command.targets_process() && config.debug_privilege() {
        if let Err(error) = platform.enable_debug_privilege() {
            warn!(%error, "continuing without debug privilege");
        }
    }

    match command {
        Commands::Inject(args) => inject::inject(platform, config, args),
        Commands::Eject(args) => eject::eject(platform, config, args),
        Commands::Watch(args) => watch::watch(platform, config, args, watch::cancel_on_interrupt),
        Commands::Info => info::info(config),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use tether_attach::{
        testing::{FakePlatform, FakeProcess},
        Platform, ProcessSelector,
    };

    use super::{dispatch, Commands, TargetArgs};
    use crate::{
        config::{Config, KnownDirs},
        Cli,
    };

    pub fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    pub fn config_for(command: &Commands) -> Config {
        Config {
            options: command.options(),
            known_dirs: KnownDirs::empty(),
        }
    }

    #[test]
    fn pid_and_pname_are_mutually_exclusive() {
        let error =
            Cli::try_parse_from(["tether", "inject", "-p", "4242", "-n", "Target.exe"]).unwrap_err();

        assert_eq!(clap::error::ErrorKind::ArgumentConflict, error.kind());
    }

    #[test]
    fn short_flags_select_module_and_process() {
        let cli = parse(&["tether", "eject", "-d", "mods/mod.dll", "-p", "4242"]);

        let Commands::Eject(args) = cli.command else {
            panic!("tether eject produced incorrect command");
        };

        assert_eq!(Some("mods/mod.dll".into()), args.dll);
        assert_eq!(
            TargetArgs {
                pid: Some(4242),
                pname: None
            },
            args.target
        );
    }

    #[test]
    fn target_defaults_to_the_configured_process_name() {
        let cli = parse(&["tether", "watch"]);
        let config = config_for(&cli.command);

        let Commands::Watch(args) = cli.command else {
            panic!("tether watch produced incorrect command");
        };

        assert_eq!(
            ProcessSelector::Name("Target.exe".into()),
            args.target.selector(&config)
        );
    }

    #[test]
    fn pname_overrides_the_configured_process_name() {
        let cli = parse(&["tether", "watch", "--pname", "Other.exe", "--timeout", "3"]);
        let config = config_for(&cli.command);

        let Commands::Watch(args) = cli.command else {
            panic!("tether watch produced incorrect command");
        };

        assert_eq!(
            ProcessSelector::Name("Other.exe".into()),
            args.target.selector(&config)
        );
        assert_eq!(Some(std::time::Duration::from_secs(3)), config.watch_timeout());
    }

    #[test]
    fn privilege_is_requested_once_per_command() {
        let platform = FakePlatform::with_process(FakeProcess::new(4242, "Target.exe"));
        let cli = parse(&["tether", "eject", "-p", "4242"]);
        let config = config_for(&cli.command);

        let _ = dispatch(&platform, &config, cli.command);

        assert_eq!(1, platform.privilege_requests());
    }

    #[test]
    fn denied_privilege_does_not_stop_the_command() {
        let target = FakeProcess::new(4242, "Target.exe");
        target.exit();

        let platform = FakePlatform::with_process(target).denying_privilege();
        let cli = parse(&["tether", "watch", "-p", "4242"]);
        let config = config_for(&cli.command);

        let output = dispatch(&platform, &config, cli.command).unwrap();

        assert_eq!(1, platform.privilege_requests());
        assert!(output.contains("exited"));
    }

    #[test]
    fn info_does_not_request_privilege() {
        let platform = FakePlatform::default();
        let cli = parse(&["tether", "info"]);
        let config = config_for(&cli.command);

        dispatch(&platform, &config, cli.command).unwrap();

        assert_eq!(0, platform.privilege_requests());
    }

    #[test]
    fn missing_process_is_reported_without_creating_resources() {
        let platform = FakePlatform::default();
        let cli = parse(&["tether", "watch", "--pname", "Target.exe"]);
        let config = config_for(&cli.command);

        let report = dispatch(&platform, &config, cli.command).unwrap_err();

        assert_eq!("process not running: Target.exe", report.to_string());
        assert!(platform.recorder().events().is_empty());
        assert_eq!(0, platform.processes().opened());
    }
}
