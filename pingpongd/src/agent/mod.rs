// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Agent loop
//!
//! Drives one worker through one job:
//!
//! 1. attach to the job's segment (created by the control plane beforehand)
//! 2. poll the turn flag; on our turn allocate a position and a color,
//!    write them at index `iteration`, bump the iteration and hand over
//! 3. report progress every `checkpoint_every` iterations
//! 4. whoever commits the last pixel publishes the result and leaves the
//!    segment alone; the partner sees the finished flag and destroys it
//!
//! There is no blocking primitive between the two processes, waiting is a
//! sleep between polls.

pub mod teardown;

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::allocator::{Domain, UniqueAllocator};
use crate::checkpoint::{deliver, CheckpointSink};
use crate::config::{AgentConfig, Role};
use crate::error::CoordError;
use crate::job::Job;
use crate::scheduler::{self, Handover, Turn, TurnState};
use crate::segment::{Segment, SegmentView};
use teardown::Outcome;

/// What a worker did for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    pub job_id: String,
    pub role: Role,
    pub outcome: Outcome,
    /// Iteration indices committed by this worker, ascending.
    pub acted: Vec<u32>,
}

enum Step {
    Wait,
    Clean,
    Committed(u32, Handover),
}

/// Everything one job needs while it runs. Nothing survives the job.
pub struct JobContext<'a> {
    job: &'a Job,
    config: &'a AgentConfig,
    sink: &'a mut dyn CheckpointSink,
    rng: StdRng,
    acted: Vec<u32>,
    waiting_since: Option<Instant>,
    next_stall_warning: Duration,
}

impl<'a> JobContext<'a> {
    pub fn new(job: &'a Job, config: &'a AgentConfig, sink: &'a mut dyn CheckpointSink) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(u64::from(config.role.expected()))),
            None => StdRng::from_entropy(),
        };
        Self {
            job,
            config,
            sink,
            rng,
            acted: Vec::new(),
            waiting_since: None,
            next_stall_warning: config.stall_warning,
        }
    }

    /// One allocation: a free position and a free color for iteration `k`.
    /// Returns the new iteration count.
    fn step(&mut self, turn: &mut Turn<'_>) -> Result<u32, CoordError> {
        let k = turn.iteration();
        let threshold = self.config.density_threshold;
        let SegmentView {
            positions,
            colors,
            position_mask,
            color_mask,
        } = turn.view();

        let position = UniqueAllocator::new(Domain::Position, &mut *position_mask, k, threshold)
            .allocate(&mut self.rng)?;
        let color = match UniqueAllocator::new(Domain::Color, color_mask, k, threshold)
            .allocate(&mut self.rng)
        {
            Ok(color) => color,
            Err(e) => {
                // iteration is not bumped, so the position must be free again
                position_mask[position as usize] = 1;
                return Err(e);
            }
        };

        positions[k as usize] = position;
        colors[k as usize] = color;
        self.acted.push(k);
        trace!(
            "job {}: {} iteration {} -> position {} color #{:06x}",
            self.job.job_id,
            turn.role(),
            k,
            position,
            color
        );
        Ok(k + 1)
    }

    fn note_waiting(&mut self, segment: &Segment) {
        let since = *self.waiting_since.get_or_insert_with(Instant::now);
        let waited = since.elapsed();
        if waited >= self.next_stall_warning {
            warn!(
                "job {}: {} waited {:?} for its turn (turn={}, iteration={}, lock={})",
                self.job.job_id,
                self.config.role,
                waited,
                segment.turn(),
                segment.iteration(),
                segment.lock_flag()
            );
            self.next_stall_warning += self.config.stall_warning;
        }
    }

    fn note_acted(&mut self) {
        self.waiting_since = None;
        self.next_stall_warning = self.config.stall_warning;
    }

    fn checkpoint_progress(&mut self, iteration: u32) {
        let job_id = self.job.job_id.as_str();
        let sink = &mut *self.sink;
        deliver(
            &format!("progress {} of job {}", iteration, job_id),
            self.config.checkpoint_attempts,
            self.config.checkpoint_backoff,
            || sink.progress(job_id, iteration),
        );
    }

    fn checkpoint_complete(&mut self, iteration: u32, data: &[(u32, u32)]) {
        let job_id = self.job.job_id.as_str();
        let sink = &mut *self.sink;
        let delivered = deliver(
            &format!("result of job {}", job_id),
            self.config.checkpoint_attempts,
            self.config.checkpoint_backoff,
            || sink.complete(job_id, iteration, data),
        );
        if !delivered {
            error!("job {}: final pixel data could not be delivered", job_id);
        }
    }

    fn into_report(self, outcome: Outcome) -> WorkerReport {
        WorkerReport {
            job_id: self.job.job_id.clone(),
            role: self.config.role,
            outcome,
            acted: self.acted,
        }
    }
}

/// Runs this worker's part of `job` until the job is finished and this
/// worker's share of the teardown is done.
pub fn run_job(
    job: &Job,
    config: &AgentConfig,
    sink: &mut dyn CheckpointSink,
) -> Result<WorkerReport, CoordError> {
    let mut segment = Segment::attach(job)?;
    let role = config.role;
    info!(
        "job {}: {} attached ({}x{}, iteration {})",
        job.job_id,
        role,
        segment.width(),
        segment.height(),
        segment.iteration()
    );

    let mut ctx = JobContext::new(job, config, sink);
    let started = Instant::now();
    loop {
        let step = match scheduler::poll(&mut segment, role) {
            TurnState::Waiting => Step::Wait,
            TurnState::Finished => Step::Clean,
            TurnState::ActsNow(mut turn) => {
                let iteration = ctx.step(&mut turn).map_err(|e| {
                    error!(
                        "job {}: {} aborting, coordination invariant broken: {}",
                        job.job_id, role, e
                    );
                    e
                })?;
                Step::Committed(iteration, turn.hand_over(iteration))
            }
        };

        match step {
            Step::Wait => {
                ctx.note_waiting(&segment);
                thread::sleep(config.poll_interval);
            }
            Step::Committed(iteration, Handover::Partner) => {
                ctx.note_acted();
                if config.checkpoint_every > 0 && iteration % config.checkpoint_every == 0 {
                    debug!("job {}: checkpoint at iteration {}", job.job_id, iteration);
                    ctx.checkpoint_progress(iteration);
                }
            }
            Step::Committed(iteration, Handover::Completed) => {
                info!(
                    "job {}: {} committed the last pixel after {:?}",
                    job.job_id,
                    role,
                    started.elapsed()
                );
                // turn is already 2 here; the data may reach the control plane
                // after a monitor has seen the job complete
                let data = segment.snapshot();
                ctx.checkpoint_complete(iteration, &data);
                return Ok(ctx.into_report(teardown::complete(segment)));
            }
            Step::Clean => {
                info!("job {}: {} saw the job finish", job.job_id, role);
                let outcome = teardown::clean(segment)?;
                return Ok(ctx.into_report(outcome));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemorySink;
    use std::collections::HashSet;

    fn fast(role: Role, seed: u64) -> AgentConfig {
        AgentConfig::new(role)
            .with_seed(seed)
            .with_poll_interval(Duration::from_micros(10))
    }

    #[test]
    fn two_by_two_race_between_threads() {
        let job = Job::new(format!("agent-2x2-{}", std::process::id()), 2, 2);
        Segment::create(&job).unwrap().release();

        let ping_job = job.clone();
        let ping = thread::spawn(move || {
            let mut sink = MemorySink::default();
            let report = run_job(&ping_job, &fast(Role::Ping, 7), &mut sink).unwrap();
            (report, sink)
        });
        let pong_job = job.clone();
        let pong = thread::spawn(move || {
            let mut sink = MemorySink::default();
            let report = run_job(&pong_job, &fast(Role::Pong, 7), &mut sink).unwrap();
            (report, sink)
        });
        let (ping_report, ping_sink) = ping.join().unwrap();
        let (pong_report, pong_sink) = pong.join().unwrap();

        assert_eq!(ping_report.acted, vec![0, 2]);
        assert_eq!(pong_report.acted, vec![1, 3]);
        // pong commits iteration 3, the last one
        assert_eq!(pong_report.outcome, Outcome::Completer);
        assert_eq!(ping_report.outcome, Outcome::Cleaner);
        assert!(ping_sink.completed.is_empty());
        assert_eq!(pong_sink.completed.len(), 1);

        let (_, iteration, data) = &pong_sink.completed[0];
        assert_eq!(*iteration, 4);
        let positions: HashSet<u32> = data.iter().map(|&(p, _)| p).collect();
        assert_eq!(positions, (0..4).collect());
        let colors: HashSet<u32> = data.iter().map(|&(_, c)| c).collect();
        assert_eq!(colors.len(), 4);
        assert!(colors.iter().all(|&c| c < 16_777_216));

        assert!(Segment::attach(&job).unwrap_err().is_already_complete());
    }

    #[test]
    fn progress_is_reported_every_hundred() {
        let job = Job::new(format!("agent-progress-{}", std::process::id()), 25, 10);
        Segment::create(&job).unwrap().release();

        let pong_job = job.clone();
        let pong = thread::spawn(move || {
            let mut sink = MemorySink::default();
            run_job(&pong_job, &fast(Role::Pong, 3), &mut sink).unwrap();
            sink
        });
        let mut ping_sink = MemorySink::default();
        let ping_report = run_job(&job, &fast(Role::Ping, 3), &mut ping_sink).unwrap();
        let pong_sink = pong.join().unwrap();

        let mut reported: Vec<u32> = ping_sink
            .progress
            .iter()
            .chain(pong_sink.progress.iter())
            .map(|(_, iteration)| *iteration)
            .collect();
        reported.sort();
        assert_eq!(reported, vec![100, 200]);
        // 250 pixels: ping commits index 248, pong commits 249 and completes
        assert_eq!(ping_report.outcome, Outcome::Cleaner);
        assert_eq!(pong_sink.completed.len(), 1);
    }

    #[test]
    fn failed_color_allocation_keeps_position_free() {
        let job = Job::new(format!("agent-nocolor-{}", std::process::id()), 2, 2);
        let mut segment = Segment::create(&job).unwrap();
        segment.view_mut().color_mask.fill(0);

        let config = fast(Role::Ping, 9);
        let mut sink = MemorySink::default();
        let mut ctx = JobContext::new(&job, &config, &mut sink);
        let err = match scheduler::poll(&mut segment, Role::Ping) {
            TurnState::ActsNow(mut turn) => ctx.step(&mut turn).unwrap_err(),
            _ => panic!("ping should act first"),
        };
        assert!(matches!(
            err,
            CoordError::MaskCorruption {
                domain: Domain::Color,
                ..
            }
        ));
        assert!(err.is_fatal());
        assert_eq!(segment.available_positions(), 4);
        assert_eq!(segment.iteration(), 0);
        assert_eq!(segment.turn(), 0);
        segment.destroy().unwrap();
    }

    #[test]
    fn masks_match_committed_pairs_mid_run() {
        let job = Job::new(format!("agent-midrun-{}", std::process::id()), 5, 5);
        let mut segment = Segment::create(&job).unwrap();

        let config = fast(Role::Ping, 4);
        let mut sink = MemorySink::default();
        let mut ctx = JobContext::new(&job, &config, &mut sink);
        for i in 0..10 {
            let role = if i % 2 == 0 { Role::Ping } else { Role::Pong };
            match scheduler::poll(&mut segment, role) {
                TurnState::ActsNow(mut turn) => {
                    let iteration = ctx.step(&mut turn).unwrap();
                    assert_eq!(turn.hand_over(iteration), Handover::Partner);
                }
                _ => panic!("{} should act at iteration {}", role, i),
            }
            assert_eq!(
                segment.available_positions() + segment.iteration() as usize,
                25
            );
        }

        let pairs = segment.snapshot();
        assert_eq!(pairs.len(), 10);
        let view = segment.view_mut();
        for (position, color) in pairs {
            assert_eq!(view.position_mask[position as usize], 0);
            assert_eq!(view.color_mask[color as usize], 0);
        }
        assert_eq!(view.color_mask.iter().filter(|&&flag| flag == 0).count(), 10);
        segment.destroy().unwrap();
    }

    #[test]
    fn attaching_after_cleanup_means_done() {
        let job = Job::new(format!("agent-gone-{}", std::process::id()), 1, 1);
        let mut sink = MemorySink::default();
        let err = run_job(&job, &fast(Role::Ping, 1), &mut sink).unwrap_err();
        assert!(err.is_already_complete());
    }
}
