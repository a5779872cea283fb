use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use crate::backup::dump::{Dumper, DEFAULT_TOOL};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long, global = true)]
    pub verbose: Option<LevelFilter>,

    /// Dump tool to run, looked up in PATH if relative.
    #[arg(long, global = true, env = "BACKUP_DUMP_TOOL", default_value = DEFAULT_TOOL)]
    pub dump_tool: PathBuf,

    /// Argument placed before the dump flags, e.g. for wrappers like `docker exec`.
    /// May be given multiple times.
    #[arg(long = "dump-arg", global = true, allow_hyphen_values = true)]
    pub dump_args: Vec<String>,

    #[command(subcommand)]
    pub action: Action,
}

impl Cli {
    /// The [Dumper] configured on the command line.
    pub fn dumper(&self) -> Dumper {
        Dumper::new(&self.dump_tool).with_leading_args(&self.dump_args)
    }
}

#[derive(Subcommand, Debug)]
pub enum Action {
    /// Back up a plan once and print the result as JSON.
    Run(RunArgs),
    /// Print the version of the dump tool.
    Check,
    /// List the plans in a directory.
    List {
        /// Directory containing `*.toml` plan files.
        #[arg(long, short = 'p', env = "BACKUP_PLANS", default_value = "/config")]
        plans: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Plan file to back up.
    #[arg(long, short = 'p')]
    pub plan: PathBuf,

    /// Directory the dump is written to before being moved into storage.
    #[arg(long, short = 't', env = "BACKUP_TMP", default_value = "/tmp")]
    pub tmp: PathBuf,

    /// Root of the backup storage, every plan gets a subdirectory.
    #[arg(long, short = 's', env = "BACKUP_STORAGE", default_value = "/storage")]
    pub storage: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_arguments() {
        let cli = Cli::try_parse_from([
            "plan_backup",
            "--verbose",
            "debug",
            "run",
            "--plan",
            "/config/orders.toml",
            "--tmp",
            "/tmp/x",
            "--storage",
            "/data",
        ])
        .unwrap();

        assert_eq!(cli.verbose, Some(LevelFilter::Debug));
        let Action::Run(args) = cli.action else {
            panic!("expected run action");
        };
        assert_eq!(args.plan, PathBuf::from("/config/orders.toml"));
        assert_eq!(args.tmp, PathBuf::from("/tmp/x"));
        assert_eq!(args.storage, PathBuf::from("/data"));
    }

    #[test]
    fn dump_wrapper_arguments() {
        let cli = Cli::try_parse_from([
            "plan_backup",
            "check",
            "--dump-tool",
            "docker",
            "--dump-arg",
            "exec",
            "--dump-arg",
            "mongo",
            "--dump-arg",
            "mongodump",
        ])
        .unwrap();

        assert!(matches!(cli.action, Action::Check));
        assert_eq!(cli.dump_tool, PathBuf::from("docker"));
        assert_eq!(cli.dump_args, ["exec", "mongo", "mongodump"]);
    }
}
