// SPDX-License-Identifier: MIT
// pingpongd: a worker pair that paints a canvas one pixel at a time
//
// - Both workers attach to a per-job shared memory segment.
// - A turn flag in the segment lets exactly one of them commit a
//   (position, color) pair at a time; neither value is ever handed out twice.
// - Whoever commits the last pixel publishes the result, the other one
//   removes the segment.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod agent;
pub mod allocator;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod job;
pub mod monitor;
pub mod scheduler;
pub mod segment;
pub mod worker;
