// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use clap::Parser;
use pingpongd::agent::run_job;
use pingpongd::checkpoint::MemorySink;
use pingpongd::config::{AgentConfig, Role};
use pingpongd::job::Job;
use pingpongd_tests::worker_log::WorkerLog;

#[derive(Debug, Parser)]
struct Args {
    #[arg(long, value_enum)]
    role: Role,

    /// Job descriptor (JSON)
    #[arg(long)]
    job: String,

    #[arg(long, default_value_t = 1)]
    seed: u64,

    #[arg(long)]
    density_threshold: Option<f64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let job = Job::from_json(&args.job)?;
    let mut config = AgentConfig::new(args.role)
        .with_seed(args.seed)
        .with_poll_interval(Duration::from_micros(10));
    if let Some(threshold) = args.density_threshold {
        config = config.with_density_threshold(threshold);
    }

    let mut sink = MemorySink::default();
    let report = run_job(&job, &config, &mut sink)?;

    let log = WorkerLog {
        report,
        progress: sink.progress.iter().map(|(_, iteration)| *iteration).collect(),
        completed: sink.completed.into_iter().next().map(|(_, _, data)| data),
    };
    println!("{}", serde_json::to_string(&log)?);
    Ok(())
}
