// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Unique-value allocation
//!
//! Picks a uniformly random index out of an availability mask (`1` = free,
//! `0` = claimed) and claims it. Two strategies are used depending on how
//! full the mask is:
//!
//! - **Rejection sampling** while the mask is mostly free: draw from
//!   `[0, N)` until a free slot is hit. O(1) expected.
//! - **Rank selection** once `(claimed + 1) / N` exceeds the density
//!   threshold: draw `r` from `[0, remaining)` and take the `r`-th free slot
//!   in index order. One O(N) pass that always terminates.
//!
//! The same allocator runs over the position domain (`width * height`) and
//! the color domain (`256^3`). The threshold is evaluated against each
//! domain's own size, so for a typical canvas the color side never leaves
//! rejection sampling.

use std::fmt;

use log::trace;
use rand::Rng;

use crate::error::CoordError;

/// Size of the 24 bit RGB space.
pub const COLOR_DOMAIN: u32 = 256 * 256 * 256;

/// Upper bound for rejection draws before falling back to a rank pass.
const REJECTION_TRIAL_LIMIT: u32 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Position,
    Color,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Position => write!(f, "position"),
            Domain::Color => write!(f, "color"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Rejection,
    RankSelection,
}

/// Decides how the next value out of a domain of `size` is drawn.
pub fn choose_strategy(claimed: u32, size: u32, threshold: f64) -> Strategy {
    let density = (f64::from(claimed) + 1.0) / f64::from(size);
    if density > threshold {
        Strategy::RankSelection
    } else {
        Strategy::Rejection
    }
}

/// Allocator over one mask. `claimed` must equal the number of `0` entries;
/// the caller owns the mask exclusively while the allocator lives.
pub struct UniqueAllocator<'m> {
    domain: Domain,
    mask: &'m mut [u8],
    claimed: u32,
    threshold: f64,
}

impl<'m> UniqueAllocator<'m> {
    pub fn new(domain: Domain, mask: &'m mut [u8], claimed: u32, threshold: f64) -> Self {
        Self {
            domain,
            mask,
            claimed,
            threshold,
        }
    }

    pub fn size(&self) -> u32 {
        self.mask.len() as u32
    }

    pub fn claimed(&self) -> u32 {
        self.claimed
    }

    pub fn remaining(&self) -> u32 {
        self.size().saturating_sub(self.claimed)
    }

    pub fn strategy(&self) -> Strategy {
        choose_strategy(self.claimed, self.size(), self.threshold)
    }

    /// Draws a free index, marks it claimed and returns it.
    pub fn allocate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<u32, CoordError> {
        if self.remaining() == 0 {
            return Err(CoordError::AllocationExhausted {
                domain: self.domain,
                size: self.size(),
            });
        }

        let index = match self.strategy() {
            Strategy::Rejection => match self.reject_sample(rng) {
                Some(index) => index,
                None => {
                    trace!(
                        "{} rejection sampling gave up after {} draws",
                        self.domain,
                        REJECTION_TRIAL_LIMIT
                    );
                    self.rank_select(rng)?
                }
            },
            Strategy::RankSelection => self.rank_select(rng)?,
        };

        self.claim(index)?;
        Ok(index)
    }

    fn reject_sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u32> {
        let size = self.size();
        for _ in 0..REJECTION_TRIAL_LIMIT {
            let candidate = rng.gen_range(0..size);
            if self.mask[candidate as usize] != 0 {
                return Some(candidate);
            }
        }
        None
    }

    fn rank_select<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<u32, CoordError> {
        let rank = rng.gen_range(0..self.remaining());
        let mut seen = 0u32;
        for (index, &flag) in self.mask.iter().enumerate() {
            if flag == 0 {
                continue;
            }
            if seen == rank {
                return Ok(index as u32);
            }
            seen += 1;
        }
        // fewer free slots than the iteration count promises
        Err(CoordError::MaskCorruption {
            domain: self.domain,
            index: self.size(),
        })
    }

    fn claim(&mut self, index: u32) -> Result<(), CoordError> {
        let slot = &mut self.mask[index as usize];
        if *slot == 0 {
            return Err(CoordError::MaskCorruption {
                domain: self.domain,
                index,
            });
        }
        *slot = 0;
        self.claimed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
