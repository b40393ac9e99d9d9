// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which side of the pair a worker plays. Each role owns one turn value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Acts on turn value 0, i.e. on even iterations.
    Ping,
    /// Acts on turn value 1, i.e. on odd iterations.
    Pong,
}

impl Role {
    pub fn expected(&self) -> u8 {
        match self {
            Role::Ping => 0,
            Role::Pong => 1,
        }
    }

    pub fn partner(&self) -> Role {
        match self {
            Role::Ping => Role::Pong,
            Role::Pong => Role::Ping,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Ping => write!(f, "ping"),
            Role::Pong => write!(f, "pong"),
        }
    }
}

/// Occupancy above which allocation switches from rejection sampling to a
/// rank pass over the mask.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Default)]
pub enum DensityProfile {
    /// Switch for the last 0.1%
    Simple,
    #[default]
    /// Switch for the last 0.001%
    Production,
}

impl DensityProfile {
    pub fn threshold(&self) -> f64 {
        match self {
            DensityProfile::Simple => 0.999,
            DensityProfile::Production => 0.99999,
        }
    }
}

/// Immutable per-worker settings, passed to every job explicitly.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub role: Role,
    pub density_threshold: f64,
    pub poll_interval: Duration,
    /// Progress is reported every this many committed iterations.
    pub checkpoint_every: u32,
    pub checkpoint_attempts: u32,
    pub checkpoint_backoff: Duration,
    /// Waiting longer than this for a turn is logged (and logged again after
    /// every further interval). Nothing else happens.
    pub stall_warning: Duration,
    pub seed: Option<u64>,
}

impl AgentConfig {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            density_threshold: DensityProfile::default().threshold(),
            poll_interval: Duration::from_micros(50),
            checkpoint_every: 100,
            checkpoint_attempts: 3,
            checkpoint_backoff: Duration::from_millis(100),
            stall_warning: Duration::from_secs(30),
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_density_threshold(mut self, threshold: f64) -> Self {
        self.density_threshold = threshold;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}
