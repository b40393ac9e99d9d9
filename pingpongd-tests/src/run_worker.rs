// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::{
    io::Read,
    process::{Child, Command, Stdio},
    thread,
    time::Duration,
};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use pingpongd::config::Role;
use pingpongd::job::Job;

use crate::worker_log::WorkerLog;

/// A `test-worker` process. Killed on drop if it is still running.
pub struct WorkerProcess {
    child: Option<Child>,
}

impl WorkerProcess {
    pub fn start(binary: &str, role: Role, job: &Job, seed: u64) -> Self {
        let job_json = serde_json::to_string(job).expect("job serializes");
        let child = Command::new(binary)
            .args([
                "--role",
                &role.to_string(),
                "--job",
                &job_json,
                "--seed",
                &seed.to_string(),
            ])
            .stdout(Stdio::piped())
            .spawn()
            .unwrap_or_else(|e| panic!("failed to start {binary}: {e}"));
        Self { child: Some(child) }
    }

    /// Waits for the worker and parses the log it printed.
    pub fn wait_for_log(mut self) -> WorkerLog {
        let mut child = self.child.take().expect("worker already collected");
        let mut stdout = String::new();
        child
            .stdout
            .take()
            .expect("stdout is piped")
            .read_to_string(&mut stdout)
            .expect("failed to read worker output");
        let status = child.wait().expect("failed to wait for worker");
        assert!(status.success(), "worker exited with {status}");
        serde_json::from_str(stdout.trim())
            .unwrap_or_else(|e| panic!("worker printed invalid log {stdout:?}: {e}"))
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = Pid::from_raw(child.id() as i32);

        // First: SIGTERM
        let _ = signal::kill(pid, Signal::SIGTERM);

        for _ in 0..10 {
            if let Ok(Some(_)) = child.try_wait() {
                return;
            }
            thread::sleep(Duration::from_millis(100));
        }

        let _ = signal::kill(pid, Signal::SIGKILL);
        let _ = child.wait();
    }
}
