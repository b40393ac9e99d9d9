// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use thiserror::Error;

use crate::allocator::Domain;

/// Everything that can go wrong while coordinating a job over its segment.
#[derive(Debug, Error)]
pub enum CoordError {
    /// The allocator was asked for a value although none is left.
    #[error("{domain} allocation exhausted: nothing left out of {size}")]
    AllocationExhausted { domain: Domain, size: u32 },

    /// A mask entry disagrees with the committed iteration count.
    #[error("{domain} mask corrupted at index {index}")]
    MaskCorruption { domain: Domain, index: u32 },

    /// The segment is gone. For anyone attaching by job id this means the
    /// job has already been completed and cleaned up.
    #[error("segment for job {job_id} not found")]
    SegmentNotFound { job_id: String },

    #[error("segment for job {job_id} already exists")]
    SegmentExists { job_id: String },

    #[error("segment for job {job_id} has not been initialized")]
    SegmentUninitialized { job_id: String },

    #[error("segment for job {job_id} does not match its job: {reason}")]
    SegmentLayoutMismatch { job_id: String, reason: String },

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("{op} failed for segment of job {job_id}: {source}")]
    Os {
        op: &'static str,
        job_id: String,
        #[source]
        source: nix::errno::Errno,
    },
}

impl CoordError {
    /// Broken invariants. The worker must stop participating in the job.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoordError::AllocationExhausted { .. } | CoordError::MaskCorruption { .. }
        )
    }

    /// True if the error just says the job has been finished by someone else.
    pub fn is_already_complete(&self) -> bool {
        matches!(self, CoordError::SegmentNotFound { .. })
    }
}
