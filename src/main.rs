use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use kube_nc_backup_lib::cli::{BackupConfig, Cli};
use kube_nc_backup_lib::process::{self, Outcome, ProcessStatus};

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            return exit_code(Outcome::from(ProcessStatus::default()));
        }
    };

    // init logger
    let mut env_logger = env_logger::builder();
    env_logger.filter_level(cli.log_level());
    if let Err(e) = env_logger.try_init() {
        eprintln!("Initializing the logger failed: {e}");
    }

    log::info!(target: "config", "Retrieving the configuration");
    let config = match BackupConfig::try_from(cli) {
        Ok(config) => config,
        Err(e) => {
            log::error!(target: "config", "Invalid configuration: {e}");
            return exit_code(Outcome::from(ProcessStatus::default()));
        }
    };
    log::debug!(target: "config", "{config:?}");

    let outcome = Outcome::from(process::backup(&config));
    if outcome.is_success() {
        log::info!(target: "process", "{outcome}");
    } else {
        log::error!(target: "process", "{outcome}");
    }
    exit_code(outcome)
}

fn exit_code(outcome: Outcome) -> ExitCode {
    ExitCode::from(outcome.exit_code())
}
