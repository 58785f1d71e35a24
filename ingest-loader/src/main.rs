//! Ingestion loader binary.
//!
//! Reads one batch file per configured table, merges every batch into Postgres and reports
//! failed tables through Slack. Exits with a non-zero status when any table failed.

use std::process::ExitCode;

use crate::config::load_loader_config;
use crate::core::start_loader_with_config;
use crate::error::LoaderResult;

use ingest_config::shared::LoaderConfig;
use ingest_telemetry::tracing::init_tracing;
use tracing::error;

mod batch_file;
mod config;
mod core;
mod error;
mod notification;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

fn run() -> LoaderResult<()> {
    let loader_config = load_loader_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(error::LoaderError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(loader_config))
}

async fn async_main(loader_config: LoaderConfig) -> LoaderResult<()> {
    if let Err(err) = start_loader_with_config(loader_config).await {
        error!("{err}");
        return Err(err);
    }

    Ok(())
}
