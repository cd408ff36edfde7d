//! `framebroker <PORT NUMBER> [options]`
//!
//! Runs the broker until Ctrl-C. Startup failures are reported on stderr and
//! in `execution_error_log.txt` in the working directory, with exit status 1.

use clap::error::ErrorKind;
use clap::Parser;
use compio::runtime::Runtime;
use framebroker::{logging, Broker, BrokerConfig, Cli, ConfigError};
use futures::{pin_mut, select, FutureExt};
use std::process::ExitCode;
use tracing::{error, info, warn};

const ERROR_LOG: &str = "execution_error_log.txt";

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => return startup_failure(&usage_error(&ConfigError::Usage(e.to_string()))),
    };

    let config = match BrokerConfig::try_from(cli) {
        Ok(config) => config,
        Err(e) => return startup_failure(&usage_error(&e)),
    };

    logging::init_binary_tracing();

    let handle = match Broker::new(config).spawn() {
        Ok(handle) => handle,
        Err(e) => return startup_failure(&e.to_string()),
    };
    info!(addr = %handle.local_addr(), "framebroker running, Ctrl-C to stop");

    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "cannot wait for Ctrl-C, stopping broker");
            return match handle.join() {
                Ok(_) => ExitCode::FAILURE,
                Err(e) => startup_failure(&e.to_string()),
            };
        }
    };

    runtime.block_on(async {
        let interrupt = compio::signal::ctrl_c().fuse();
        let finished = handle.finished().fuse();
        pin_mut!(interrupt, finished);

        select! {
            res = interrupt => match res {
                Ok(()) => info!("interrupt received, shutting down"),
                Err(e) => warn!(error = %e, "signal handler failed, shutting down"),
            },
            () = finished => warn!("broker stopped on its own"),
        }
    });

    match handle.join() {
        Ok(report) => {
            info!(
                received = report.dispatch.received,
                replied = report.dispatch.replied,
                rejected_in_flight = report.dispatch.rejected_in_flight,
                workers_faulted = report.pool.faulted,
                "framebroker exited"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "framebroker failed");
            ExitCode::FAILURE
        }
    }
}

fn usage_error(err: &ConfigError) -> String {
    let program = std::env::args()
        .next()
        .unwrap_or_else(|| "framebroker".to_string());
    format!("Usage: {program} <PORT NUMBER>\n{err}")
}

/// Report on stderr and in the error log, then fail.
fn startup_failure(message: &str) -> ExitCode {
    if let Err(e) = std::fs::write(ERROR_LOG, message) {
        eprintln!("could not write {ERROR_LOG}: {e}");
    }
    eprintln!("{message}");
    ExitCode::FAILURE
}
