// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicU32, Ordering};

use pingpongd::job::Job;
use pingpongd::segment::Segment;

static JOB_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A job id nobody else uses, so tests can run in parallel.
pub fn unique_job(tag: &str, width: u32, height: u32) -> Job {
    let n = JOB_COUNTER.fetch_add(1, Ordering::SeqCst);
    Job::new(
        format!("it-{}-{}-{}", tag, std::process::id(), n),
        width,
        height,
    )
}

/// Creates the segment of a job, like the control plane does before
/// publishing it. Whatever is left of it is removed on drop.
pub struct ProvisionedJob {
    pub job: Job,
}

impl ProvisionedJob {
    pub fn new(tag: &str, width: u32, height: u32) -> Self {
        let job = unique_job(tag, width, height);
        Segment::create(&job)
            .unwrap_or_else(|e| panic!("failed to provision {}: {e}", job.job_id))
            .release();
        Self { job }
    }

    /// True as long as nobody destroyed the segment.
    pub fn segment_exists(&self) -> bool {
        match Segment::attach(&self.job) {
            Ok(segment) => {
                segment.release();
                true
            }
            Err(e) if e.is_already_complete() => false,
            Err(e) => panic!("unexpected attach error: {e}"),
        }
    }
}

impl Drop for ProvisionedJob {
    fn drop(&mut self) {
        // normally the cleaner already did this
        let _ = Segment::unlink(&self.job.job_id);
    }
}
