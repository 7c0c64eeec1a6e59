//! Stress run against the in-memory reference store.
//!
//! ```text
//! racetrack-stress [CONFIG.json] [RESULTS.jsonl]
//! ```
//!
//! Without a configuration the defaults are used. With a results file, worker
//! results go to that shared JSON-lines file instead of memory.
//!
//! Exit codes: 0 pass, 1 fail, 2 inconclusive, 3 error.

use std::process;
use std::sync::Arc;

use racetrack::{
    FileCollection, InMemoryStore, PhaseCoordinator, RunReport, StressConfig, StressError,
    Verdict,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => match StressConfig::from_json_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("ERROR: {path}: {e}");
                process::exit(3);
            }
        },
        None => StressConfig::default(),
    };

    match run(config, args.next()).await {
        Ok(Some(report)) => {
            eprintln!("{report}");
            process::exit(match report.verdict {
                Verdict::Pass => 0,
                Verdict::Fail => 1,
                Verdict::Inconclusive { .. } => 2,
            });
        }
        Ok(None) => eprintln!("Run finished; verification left to the verifying process."),
        Err(e) => {
            eprintln!("ERROR: {e}");
            process::exit(3);
        }
    }
}

async fn run(
    config: StressConfig,
    results_file: Option<String>,
) -> Result<Option<RunReport>, StressError> {
    let seed = config.seed.unwrap_or(0);
    let faults_enabled = config.store_faults.is_enabled();
    if faults_enabled {
        tracing::info!(faults = ?config.store_faults, "store fault injection enabled");
    }
    let store = Arc::new(InMemoryStore::with_faults(config.store_faults.clone(), seed));
    let mut coordinator = PhaseCoordinator::new(config, store.clone());
    if let Some(path) = results_file {
        coordinator = coordinator.with_collection(Arc::new(FileCollection::new(path)));
    }

    let shutdown = coordinator.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, stopping workers");
            shutdown.cancel();
        }
    });

    let report = coordinator.run().await?;
    if faults_enabled {
        let faults = store.fault_counts();
        tracing::info!(?faults, "store faults injected");
    }
    Ok(report)
}
