// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use log::{error, info, warn};

use crate::agent::{self, WorkerReport};
use crate::checkpoint::CheckpointSink;
use crate::config::AgentConfig;
use crate::job::JobSource;

/// Consumes jobs one after another. A job is acknowledged once this worker
/// is done with it, including when the job turns out to be finished already.
/// A broken invariant stops the worker without acknowledging.
pub fn serve(
    source: &mut dyn JobSource,
    config: &AgentConfig,
    sink: &mut dyn CheckpointSink,
) -> anyhow::Result<Vec<WorkerReport>> {
    let mut reports = Vec::new();
    while let Some(job) = source.next_job()? {
        info!("received job {} ({}x{})", job.job_id, job.width, job.height);
        match agent::run_job(&job, config, sink) {
            Ok(report) => {
                info!("job {}: {} left as {:?}", job.job_id, report.role, report.outcome);
                reports.push(report);
            }
            Err(e) if e.is_already_complete() => {
                warn!("job {}: already complete, nothing to do", job.job_id);
            }
            Err(e) if e.is_fatal() => {
                error!("job {}: stuck, {} stops participating: {}", job.job_id, config.role, e);
                return Err(e.into());
            }
            Err(e) => {
                error!("job {}: could not run: {}", job.job_id, e);
                return Err(e.into());
            }
        }
        source.ack(&job)?;
    }
    info!("no more jobs");
    Ok(reports)
}
