//! Run the jobs described in a job file against a Girder server.
//!
//! Run with:
//! ```bash
//! GIRDER_API_URL=https://dsa.example.org/api/v1 GIRDER_TOKEN=... \
//!     cargo run --example run_sequence -- jobs.json
//! ```
//!
//! Without `GIRDER_TOKEN`, `GIRDER_USERNAME` and `GIRDER_PASSWORD` are used to log in.

use std::{error::Error, sync::Arc, time::Duration};

use girder_job_sequence::{
    GirderClient, GirderConfig, LogScope, RunOptions, SharedApi, Workload, load_job_file,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .ok_or("usage: run_sequence <job-file.json>")?;

    let cfg = GirderConfig::from_env();
    let client = if cfg.token.is_some() {
        GirderClient::new(cfg)?
    } else {
        let username = std::env::var("GIRDER_USERNAME")?;
        let password = std::env::var("GIRDER_PASSWORD")?;
        GirderClient::login(cfg, &username, &password)?
    };
    let api: SharedApi = Arc::new(client);

    let specs = load_job_file(&path)?;
    let mut sequence = Workload::from_specs(api, &specs)?.into_sequence();
    println!("sequence {} with {} job(s)", sequence.id(), sequence.len());

    let options = RunOptions::default()
        .with_poll_interval(Duration::from_secs(5))
        .with_verbose(true)
        .with_tag_metadata(sequence.len() > 1);
    let report = sequence.run(&options)?;

    for (job, outcome) in sequence.jobs().iter().zip(&report.outcomes) {
        println!("{:<40} {:?}", job.title(), outcome);
    }

    if !report.succeeded() {
        for logs in sequence.logs(LogScope::Finished) {
            println!("=== {} ===", logs.title);
            for line in logs.lines.iter().flatten() {
                println!("{line}");
            }
        }
        return Err("sequence did not complete successfully".into());
    }
    Ok(())
}
