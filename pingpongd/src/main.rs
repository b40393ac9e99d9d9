// SPDX-License-Identifier: MIT
// pingpongd: a worker pair that paints a canvas one pixel at a time
//
// - Runs one side (ping or pong) of a job's worker pair.
// - Provisions a job's segment or reports its status on request.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::io;
use std::time::Duration;

use clap::Parser;
use log::info;

use pingpongd::checkpoint::{CheckpointSink, HttpCheckpointSink, LogSink};
use pingpongd::config::{AgentConfig, DensityProfile, Role};
use pingpongd::job::{Job, JobSource, LineJobSource, SingleJob};
use pingpongd::monitor::{self, StatusReport};
use pingpongd::segment::Segment;
use pingpongd::worker;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Side of the worker pair this process plays
    #[arg(long, value_enum)]
    role: Option<Role>,

    /// Job descriptor (JSON). Without it, descriptors are read line by line from stdin.
    #[arg(long, value_name = "JSON")]
    job: Option<String>,

    /// Job descriptor (base64-encoded JSON).
    #[arg(long = "job-base64", value_name = "BASE64")]
    job_base64: Option<String>,

    #[arg(
        long,
        help = "Create the segment of the given job and exit.",
        long_help = "Create and initialize the shared memory segment of the given job, then exit.\n\
                 This is the control plane's side: the segment must exist before the job\n\
                 descriptor is handed to the workers."
    )]
    provision: bool,

    /// Print the progress of a job as JSON and exit
    #[arg(long, value_name = "JOB_ID")]
    status: Option<String>,

    /// With --status: keep polling until the job is complete
    #[arg(long)]
    watch: bool,

    /// Base URL of the control plane receiving checkpoints
    #[arg(long, env = "PINGPONG_CONTROL_PLANE", value_name = "URL")]
    control_plane: Option<String>,

    /// When to switch from rejection sampling to a rank pass
    #[arg(long, value_enum, default_value_t)]
    density_profile: DensityProfile,

    /// Explicit switch-over threshold, overrides --density-profile
    #[arg(long, value_name = "FRACTION")]
    density_threshold: Option<f64>,

    /// Sleep between two polls of the turn flag
    #[arg(long, default_value_t = 50)]
    poll_interval_us: u64,

    /// Report progress every this many iterations
    #[arg(long, default_value_t = 100)]
    checkpoint_every: u32,

    /// Delivery attempts per checkpoint
    #[arg(long, default_value_t = 3)]
    checkpoint_attempts: u32,

    /// Warn after waiting this long for a turn
    #[arg(long, default_value_t = 30)]
    stall_warning_secs: u64,

    /// Seed for the random number generator
    #[arg(long)]
    seed: Option<u64>,
}

fn validate_args(args: &Args) -> Result<(), String> {
    if args.job.is_some() && args.job_base64.is_some() {
        return Err("--job and --job-base64 may not be used together".into());
    }
    let has_job = args.job.is_some() || args.job_base64.is_some();

    match (&args.status, args.provision) {
        (Some(_), true) => {
            return Err("--status and --provision may not be used together".into());
        }
        (Some(_), false) => {
            if has_job || args.role.is_some() {
                return Err("--status must not be combined with --job, --job-base64 or --role".into());
            }
        }
        (None, true) => {
            if !has_job {
                return Err("--provision requires --job or --job-base64".into());
            }
            if args.role.is_some() {
                return Err("--provision must not be combined with --role".into());
            }
        }
        (None, false) => {
            if args.role.is_none() {
                return Err("--role is required to work on jobs".into());
            }
        }
    }

    if args.watch && args.status.is_none() {
        return Err("--watch requires --status".into());
    }

    if let Some(threshold) = args.density_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err("--density-threshold must be within [0, 1]".into());
        }
    }

    Ok(())
}

fn parse_job(args: &Args) -> anyhow::Result<Option<Job>> {
    match (&args.job, &args.job_base64) {
        (Some(json), None) => Ok(Some(Job::from_json(json)?)),
        (None, Some(b64)) => Ok(Some(Job::from_base64(b64)?)),
        (None, None) => Ok(None),
        _ => unreachable!("validate_args enforces mutual exclusion"),
    }
}

fn agent_config(args: &Args, role: Role) -> AgentConfig {
    let mut config = AgentConfig::new(role)
        .with_density_threshold(
            args.density_threshold
                .unwrap_or_else(|| args.density_profile.threshold()),
        )
        .with_poll_interval(Duration::from_micros(args.poll_interval_us));
    config.checkpoint_every = args.checkpoint_every;
    config.checkpoint_attempts = args.checkpoint_attempts;
    config.stall_warning = Duration::from_secs(args.stall_warning_secs);
    config.seed = args.seed;
    config
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    if let Some(job_id) = &args.status {
        let print = |status| -> anyhow::Result<()> {
            println!("{}", serde_json::to_string(&StatusReport::new(job_id, status))?);
            Ok(())
        };
        if args.watch {
            let mut printed = Ok(());
            monitor::watch(job_id, Duration::from_millis(100), |status| {
                if printed.is_ok() {
                    printed = print(status);
                }
            })?;
            printed?;
        } else {
            print(monitor::read_status(job_id)?)?;
        }
        return Ok(());
    }

    let job = parse_job(&args)?;

    if args.provision {
        let job = job.expect("validate_args requires a job for --provision");
        Segment::create(&job)?.release();
        return Ok(());
    }

    let role = args.role.expect("validate_args requires --role");
    let config = agent_config(&args, role);

    let mut sink: Box<dyn CheckpointSink> = match &args.control_plane {
        Some(url) => Box::new(HttpCheckpointSink::new(url.as_str())?),
        None => Box::new(LogSink),
    };

    info!("Starting pingpongd as {}", role);
    let reports = match job {
        Some(job) => worker::serve(&mut SingleJob::new(job), &config, sink.as_mut())?,
        None => {
            let mut source: Box<dyn JobSource> =
                Box::new(LineJobSource::new(io::stdin().lock(), io::stdout()));
            worker::serve(source.as_mut(), &config, sink.as_mut())?
        }
    };
    info!("Stopping pingpongd after {} jobs", reports.len());

    Ok(())
}
