// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

/// Where progress and the final pixel data go. Delivery is fire-and-forget
/// from the allocation loop's point of view.
pub trait CheckpointSink {
    fn progress(&mut self, job_id: &str, iteration: u32) -> anyhow::Result<()>;

    /// Called exactly once per job, by the worker that committed the last pixel.
    fn complete(&mut self, job_id: &str, iteration: u32, data: &[(u32, u32)])
        -> anyhow::Result<()>;
}

/// Body of `POST /pingpong/update/<jobId>/`.
#[derive(Debug, Serialize)]
pub struct UpdateRequest {
    pub iteration: u32,
    /// JSON encoded `[[position, color], ...]`; the control plane stores it as text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl UpdateRequest {
    pub fn progress(iteration: u32) -> Self {
        Self {
            iteration,
            data: None,
        }
    }

    pub fn complete(iteration: u32, data: &[(u32, u32)]) -> anyhow::Result<Self> {
        let pairs: Vec<[u32; 2]> = data.iter().map(|&(p, c)| [p, c]).collect();
        Ok(Self {
            iteration,
            data: Some(serde_json::to_string(&pairs)?),
        })
    }
}

/// Posts updates to the control plane's REST API.
pub struct HttpCheckpointSink {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpCheckpointSink {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn update_url(&self, job_id: &str) -> String {
        format!("{}/pingpong/update/{}/", self.base_url, job_id)
    }

    fn post(&self, job_id: &str, body: &UpdateRequest) -> anyhow::Result<()> {
        self.client
            .post(self.update_url(job_id))
            .json(body)
            .send()?
            .error_for_status()?;
        Ok(())
    }
}

impl CheckpointSink for HttpCheckpointSink {
    fn progress(&mut self, job_id: &str, iteration: u32) -> anyhow::Result<()> {
        self.post(job_id, &UpdateRequest::progress(iteration))
    }

    fn complete(
        &mut self,
        job_id: &str,
        iteration: u32,
        data: &[(u32, u32)],
    ) -> anyhow::Result<()> {
        self.post(job_id, &UpdateRequest::complete(iteration, data)?)
    }
}

/// Used when no control plane is configured.
pub struct LogSink;

impl CheckpointSink for LogSink {
    fn progress(&mut self, job_id: &str, iteration: u32) -> anyhow::Result<()> {
        info!("job {}: iteration {}", job_id, iteration);
        Ok(())
    }

    fn complete(
        &mut self,
        job_id: &str,
        iteration: u32,
        data: &[(u32, u32)],
    ) -> anyhow::Result<()> {
        info!(
            "job {}: complete after {} iterations ({} pixels)",
            job_id,
            iteration,
            data.len()
        );
        Ok(())
    }
}

/// Keeps every call in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub progress: Vec<(String, u32)>,
    pub completed: Vec<(String, u32, Vec<(u32, u32)>)>,
}

impl CheckpointSink for MemorySink {
    fn progress(&mut self, job_id: &str, iteration: u32) -> anyhow::Result<()> {
        self.progress.push((job_id.to_string(), iteration));
        Ok(())
    }

    fn complete(
        &mut self,
        job_id: &str,
        iteration: u32,
        data: &[(u32, u32)],
    ) -> anyhow::Result<()> {
        self.completed
            .push((job_id.to_string(), iteration, data.to_vec()));
        Ok(())
    }
}

/// Tries `f` up to `attempts` times. Failures are logged, never returned:
/// the allocation loop must not stall on the control plane.
pub fn deliver<F>(what: &str, attempts: u32, backoff: Duration, mut f: F) -> bool
where
    F: FnMut() -> anyhow::Result<()>,
{
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match f() {
            Ok(()) => {
                debug!("delivered {}", what);
                return true;
            }
            Err(e) if attempt < attempts => {
                warn!("delivering {} failed (attempt {}/{}): {}", what, attempt, attempts, e);
                thread::sleep(backoff);
            }
            Err(e) => {
                warn!("giving up on {} after {} attempts: {}", what, attempts, e);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_body_has_no_data() {
        let body = serde_json::to_string(&UpdateRequest::progress(300)).unwrap();
        assert_eq!(body, r#"{"iteration":300}"#);
    }

    #[test]
    fn completion_body_encodes_pairs_as_text() {
        let body = UpdateRequest::complete(2, &[(1, 0xabcdef), (0, 7)]).unwrap();
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"iteration":2,"data":"[[1,11259375],[0,7]]"}"#
        );
    }

    #[test]
    fn update_url_is_normalized() {
        let sink = HttpCheckpointSink::new("http://localhost:8000/").unwrap();
        assert_eq!(
            sink.update_url("abc"),
            "http://localhost:8000/pingpong/update/abc/"
        );
    }

    #[test]
    fn deliver_retries_then_gives_up() {
        let mut calls = 0;
        let ok = deliver("progress", 3, Duration::ZERO, || {
            calls += 1;
            anyhow::bail!("control plane down")
        });
        assert!(!ok);
        assert_eq!(calls, 3);

        let mut calls = 0;
        let ok = deliver("progress", 3, Duration::ZERO, || {
            calls += 1;
            if calls < 2 {
                anyhow::bail!("flaky");
            }
            Ok(())
        });
        assert!(ok);
        assert_eq!(calls, 2);
    }

    #[cfg(feature = "requires-control-plane")]
    #[test]
    fn posts_to_running_control_plane() {
        let base = std::env::var("PINGPONG_CONTROL_PLANE")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());
        let job_id = std::env::var("PINGPONG_TEST_JOB").expect("PINGPONG_TEST_JOB must name an existing job");
        let mut sink = HttpCheckpointSink::new(base).unwrap();
        sink.progress(&job_id, 100).unwrap();
    }
}
