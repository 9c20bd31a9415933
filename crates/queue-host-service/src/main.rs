//! # Queue Host Service
//!
//! Binary entry point. Parses arguments, initializes logging and runs the
//! host until the queue is drained (job mode) or ctrl-c (listen mode).

use clap::Parser;
use queue_host_service::{initialize_logging, run, Cli};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    initialize_logging(cli.json_logs);

    info!("Starting queue host service");

    match run(cli).await {
        Ok(summary) => {
            info!(
                batches = summary.batches,
                fetched = summary.fetched,
                deleted = summary.deleted,
                requeued = summary.requeued,
                dead_lettered = summary.dead_lettered,
                unsettled = summary.unsettled,
                "Queue host service stopped"
            );
        }
        Err(e) => {
            error!(error = %e, "Queue host service failed; aborting");
            std::process::exit(e.exit_code());
        }
    }
}
