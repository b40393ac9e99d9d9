// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::thread;
use std::time::Duration;

use log::debug;
use serde::Serialize;

use crate::error::CoordError;
use crate::segment::Segment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running {
        iteration: u32,
        width: u32,
        height: u32,
    },
    /// The segment is gone; the result is with the control plane.
    Complete,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub job_id: String,
    pub iteration: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub complete: bool,
}

impl StatusReport {
    pub fn new(job_id: &str, status: JobStatus) -> Self {
        match status {
            JobStatus::Running {
                iteration,
                width,
                height,
            } => Self {
                job_id: job_id.to_string(),
                iteration: Some(iteration),
                width: Some(width),
                height: Some(height),
                complete: false,
            },
            JobStatus::Complete => Self {
                job_id: job_id.to_string(),
                iteration: None,
                width: None,
                height: None,
                complete: true,
            },
        }
    }
}

/// Holds the lock flag for as long as it lives, so the cleaner leaves the
/// segment in place while it is being read.
struct ReadLock<'a> {
    segment: &'a Segment,
}

impl<'a> ReadLock<'a> {
    fn acquire(segment: &'a Segment) -> Self {
        segment.set_lock_flag(true);
        Self { segment }
    }
}

impl Drop for ReadLock<'_> {
    fn drop(&mut self) {
        self.segment.set_lock_flag(false);
    }
}

/// One look at a job's progress.
pub fn read_status(job_id: &str) -> Result<JobStatus, CoordError> {
    let segment = match Segment::attach_by_id(job_id) {
        Ok(segment) => segment,
        Err(e) if e.is_already_complete() => return Ok(JobStatus::Complete),
        Err(e) => return Err(e),
    };
    let iteration = {
        let _lock = ReadLock::acquire(&segment);
        segment.iteration()
    };
    Ok(JobStatus::Running {
        iteration,
        width: segment.width(),
        height: segment.height(),
    })
}

/// Polls `read_status` every `interval` and hands each result to
/// `on_status`, until the job is complete.
pub fn watch<F>(job_id: &str, interval: Duration, mut on_status: F) -> Result<(), CoordError>
where
    F: FnMut(JobStatus),
{
    loop {
        let status = read_status(job_id)?;
        on_status(status);
        if status == JobStatus::Complete {
            debug!("stopped watching job {}", job_id);
            return Ok(());
        }
        thread::sleep(interval);
    }
}
