use std::process::ExitCode;

use clap::Parser;
use plan_backup_lib::backup;
use plan_backup_lib::cli::{Action, Cli, RunArgs};
use plan_backup_lib::plan::Plan;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    env_logger.try_init().expect("env_logger should not fail");

    let dumper = cli.dumper();

    match cli.action {
        Action::Run(RunArgs { plan, tmp, storage }) => {
            let plan = match Plan::load(&plan) {
                Ok(plan) => plan,
                Err(e) => {
                    log::error!("{e}");
                    return ExitCode::FAILURE;
                }
            };

            let (result, code) = match backup::run(&dumper, &plan, &tmp, &storage) {
                Ok(result) => (result, ExitCode::SUCCESS),
                // already logged by the run
                Err(failure) => (failure.result, ExitCode::FAILURE),
            };

            match serde_json::to_string_pretty(&result) {
                Ok(json) => println!("{json}"),
                Err(e) => log::error!("Serializing the backup result failed: {e}"),
            }
            code
        }
        Action::Check => match dumper.version() {
            Ok(version) => {
                println!("{version}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!(target: "backup::dump", "{e}");
                ExitCode::FAILURE
            }
        },
        Action::List { plans } => match Plan::load_dir(&plans) {
            Ok(plans) => {
                for plan in plans {
                    let retention = match plan.scheduler.retention {
                        0 => "all".to_string(),
                        keep => keep.to_string(),
                    };
                    println!(
                        "{}: {}@{}:{} (timeout {}m, keep {retention})",
                        plan.name,
                        plan.target.database,
                        plan.target.host,
                        plan.target.port,
                        plan.scheduler.timeout,
                    );
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!("{e}");
                ExitCode::FAILURE
            }
        },
    }
}
