// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::HashSet;

use pingpongd::agent::WorkerReport;
use serde::{Deserialize, Serialize};

/// What `test-worker` prints to stdout when its job is done.
#[derive(Serialize, Deserialize, Debug)]
pub struct WorkerLog {
    pub report: WorkerReport,

    pub progress: Vec<u32>,

    /// Final `(position, color)` pairs, only present for the completer.
    pub completed: Option<Vec<(u32, u32)>>,
}

/// Panics unless `data` assigns every pixel once and no color twice.
pub fn assert_valid_painting(data: &[(u32, u32)], pixels: u32) {
    assert_eq!(data.len(), pixels as usize);
    let positions: HashSet<u32> = data.iter().map(|&(p, _)| p).collect();
    assert_eq!(positions, (0..pixels).collect::<HashSet<u32>>());
    let colors: HashSet<u32> = data.iter().map(|&(_, c)| c).collect();
    assert_eq!(colors.len(), data.len(), "a color was used twice");
    assert!(colors.iter().all(|&c| c < 256 * 256 * 256));
}
