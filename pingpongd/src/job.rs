// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::io::{BufRead, Write};

use base64::prelude::BASE64_STANDARD;
use base64::Engine as _;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::allocator::COLOR_DOMAIN;
use crate::error::CoordError;

const JOB_ID_MAX_LEN: usize = 200;

/// Job descriptor as handed to a worker pair. Immutable for the job's lifetime.
///
/// The control plane publishes more fields than these (iteration, data);
/// they are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub width: u32,
    pub height: u32,
}

impl Job {
    pub fn new(job_id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            job_id: job_id.into(),
            width,
            height,
        }
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let job: Job = serde_json::from_str(json)?;
        job.validate()?;
        Ok(job)
    }

    pub fn from_base64(b64: &str) -> anyhow::Result<Self> {
        let decoded = BASE64_STANDARD.decode(b64)?;
        let decoded = String::from_utf8(decoded)?;
        Self::from_json(&decoded)
    }

    /// Number of pixels, which is also the number of iterations of the job.
    pub fn pixel_count(&self) -> Result<u32, CoordError> {
        self.width
            .checked_mul(self.height)
            .ok_or_else(|| CoordError::InvalidJob(format!("{}x{} overflows", self.width, self.height)))
    }

    pub fn validate(&self) -> Result<(), CoordError> {
        if self.job_id.is_empty() || self.job_id.len() > JOB_ID_MAX_LEN {
            return Err(CoordError::InvalidJob(format!(
                "job id must have between 1 and {} bytes",
                JOB_ID_MAX_LEN
            )));
        }
        // the id ends up in a shm name
        if !self
            .job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CoordError::InvalidJob(format!(
                "job id {:?} may only contain [A-Za-z0-9_-]",
                self.job_id
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(CoordError::InvalidJob(format!(
                "canvas {}x{} is empty",
                self.width, self.height
            )));
        }
        let pixels = self.pixel_count()?;
        if pixels > COLOR_DOMAIN {
            return Err(CoordError::InvalidJob(format!(
                "{} pixels cannot get distinct colors out of {}",
                pixels, COLOR_DOMAIN
            )));
        }
        Ok(())
    }
}

/// Anything that hands job descriptors to a worker. Delivery is at least once;
/// a job is acknowledged only after the worker is done with it.
pub trait JobSource {
    fn next_job(&mut self) -> anyhow::Result<Option<Job>>;

    fn ack(&mut self, job: &Job) -> anyhow::Result<()>;
}

/// A single descriptor given on the command line.
pub struct SingleJob {
    job: Option<Job>,
}

impl SingleJob {
    pub fn new(job: Job) -> Self {
        Self { job: Some(job) }
    }
}

impl JobSource for SingleJob {
    fn next_job(&mut self) -> anyhow::Result<Option<Job>> {
        Ok(self.job.take())
    }

    fn ack(&mut self, job: &Job) -> anyhow::Result<()> {
        debug!("job {} done", job.job_id);
        Ok(())
    }
}

/// Newline-delimited JSON descriptors in, `{"ack":"<jobId>"}` lines out.
pub struct LineJobSource<R: BufRead, W: Write> {
    input: R,
    acks: W,
}

#[derive(Serialize)]
struct Ack<'a> {
    ack: &'a str,
}

impl<R: BufRead, W: Write> LineJobSource<R, W> {
    pub fn new(input: R, acks: W) -> Self {
        Self { input, acks }
    }
}

impl<R: BufRead, W: Write> JobSource for LineJobSource<R, W> {
    fn next_job(&mut self) -> anyhow::Result<Option<Job>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match Job::from_json(trimmed) {
                Ok(job) => return Ok(Some(job)),
                Err(e) => warn!("skipping malformed job descriptor {:?}: {}", trimmed, e),
            }
        }
    }

    fn ack(&mut self, job: &Job) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.acks, &Ack { ack: &job.job_id })?;
        self.acks.write_all(b"\n")?;
        self.acks.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_control_plane_body() {
        let job = Job::from_json(
            r#"{"width": 3, "height": 2, "jobId": "5f1c-aa", "iteration": 0, "data": []}"#,
        )
        .unwrap();
        assert_eq!(job, Job::new("5f1c-aa", 3, 2));
        assert_eq!(job.pixel_count().unwrap(), 6);
    }

    #[test]
    fn parses_base64() {
        let b64 = BASE64_STANDARD.encode(r#"{"jobId":"j1","width":2,"height":2}"#);
        assert_eq!(Job::from_base64(&b64).unwrap(), Job::new("j1", 2, 2));
    }

    #[test]
    fn rejects_bad_jobs() {
        assert!(Job::new("", 1, 1).validate().is_err());
        assert!(Job::new("a/b", 1, 1).validate().is_err());
        assert!(Job::new("ok", 0, 5).validate().is_err());
        assert!(Job::new("ok", 4097, 4097).validate().is_err());
        assert!(Job::new("ok", u32::MAX, 2).validate().is_err());
        assert!(Job::new("ok", 4096, 4096).validate().is_ok());
    }

    #[test]
    fn line_source_skips_garbage_and_acks() {
        let input = "\n{\"jobId\":\"a\",\"width\":1,\"height\":1}\nnot json\n{\"jobId\":\"b\",\"width\":2,\"height\":1}\n";
        let mut acks = Vec::new();
        {
            let mut source = LineJobSource::new(input.as_bytes(), &mut acks);
            let a = source.next_job().unwrap().unwrap();
            assert_eq!(a.job_id, "a");
            source.ack(&a).unwrap();
            let b = source.next_job().unwrap().unwrap();
            assert_eq!(b.job_id, "b");
            assert!(source.next_job().unwrap().is_none());
        }
        assert_eq!(String::from_utf8(acks).unwrap(), "{\"ack\":\"a\"}\n");
    }

    #[test]
    fn single_job_is_delivered_once() {
        let mut source = SingleJob::new(Job::new("x", 1, 1));
        assert!(source.next_job().unwrap().is_some());
        assert!(source.next_job().unwrap().is_none());
    }
}
