// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::CoordError;
use crate::segment::Segment;

/// How a worker left a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Committed the last pixel and published the result. Never destroys.
    Completer,
    /// Observed the finished flag (unlocked) and destroyed the segment.
    Cleaner,
}

/// The completer only drops its own mapping; the partner may still be
/// polling the segment.
pub fn complete(segment: Segment) -> Outcome {
    info!("job {}: completer releasing its handle", segment.job_id());
    segment.release();
    Outcome::Completer
}

/// Only called after the finished flag was observed with the lock clear.
pub fn clean(segment: Segment) -> Result<Outcome, CoordError> {
    info!("job {}: cleaner destroying the segment", segment.job_id());
    let job_id = segment.job_id().to_string();
    segment.destroy().map_err(|e| {
        warn!("job {}: cleaner could not destroy the segment: {}", job_id, e);
        e
    })?;
    Ok(Outcome::Cleaner)
}
