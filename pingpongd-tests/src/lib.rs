// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod provision;
pub mod run_worker;
pub mod worker_log;
