// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Turn scheduling
//!
//! A single byte in the segment decides who may act:
//!
//! ```text
//!            ping commits                 pong commits
//!   turn=0 --------------> turn=1 ----------------------> turn=0 ...
//!      |                      |
//!      +--- last pixel ---+---+--- last pixel
//!                         v
//!                      turn=2  (finished; never leaves this state)
//! ```
//!
//! Only the worker whose role matches the flag gets a [`Turn`], and a `Turn`
//! is the only way to get write access to the segment.

use log::trace;

use crate::config::Role;
use crate::segment::layout::TURN_FINISHED;
use crate::segment::{Segment, SegmentView};

/// Result of one poll of the turn flag.
pub enum TurnState<'a> {
    /// Partner's turn, or finished while a reader holds the lock.
    Waiting,
    /// Exactly one allocation step may be performed through the turn.
    ActsNow(Turn<'a>),
    /// Finished and unlocked; this worker is the one to clean up.
    Finished,
}

/// What `hand_over` wrote into the turn flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handover {
    Partner,
    Completed,
}

pub fn poll(segment: &mut Segment, role: Role) -> TurnState<'_> {
    let turn = segment.turn();
    if turn == TURN_FINISHED {
        if segment.lock_flag() {
            trace!("{}: job finished but segment is locked by a reader", role);
            return TurnState::Waiting;
        }
        return TurnState::Finished;
    }
    if turn == role.expected() {
        return TurnState::ActsNow(Turn { segment, role });
    }
    TurnState::Waiting
}

/// Exclusive write access to the segment for the duration of one step.
pub struct Turn<'a> {
    segment: &'a mut Segment,
    role: Role,
}

impl<'a> Turn<'a> {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn iteration(&self) -> u32 {
        self.segment.iteration()
    }

    pub(crate) fn view(&mut self) -> SegmentView<'_> {
        self.segment.view_mut()
    }

    /// Publishes `iteration` and passes the turn on: to the partner, or to
    /// the finished state once every pixel is assigned.
    pub(crate) fn hand_over(self, iteration: u32) -> Handover {
        self.segment.set_iteration(iteration);
        if iteration >= self.segment.pixel_count() {
            self.segment.set_turn(TURN_FINISHED);
            Handover::Completed
        } else {
            self.segment.set_turn(self.role.partner().expected());
            Handover::Partner
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;

    fn segment(tag: &str, width: u32, height: u32) -> Segment {
        let job = Job::new(format!("sched-{}-{}", tag, std::process::id()), width, height);
        Segment::create(&job).unwrap()
    }

    #[test]
    fn only_the_expected_role_acts() {
        let mut seg = segment("roles", 2, 1);
        assert!(matches!(poll(&mut seg, Role::Pong), TurnState::Waiting));
        match poll(&mut seg, Role::Ping) {
            TurnState::ActsNow(turn) => assert_eq!(turn.hand_over(1), Handover::Partner),
            _ => panic!("ping should act first"),
        }
        assert_eq!(seg.turn(), 1);
        assert!(matches!(poll(&mut seg, Role::Ping), TurnState::Waiting));
        match poll(&mut seg, Role::Pong) {
            TurnState::ActsNow(turn) => assert_eq!(turn.hand_over(2), Handover::Completed),
            _ => panic!("pong should act second"),
        }
        assert_eq!(seg.turn(), TURN_FINISHED);
        assert_eq!(seg.iteration(), 2);
        seg.destroy().unwrap();
    }

    #[test]
    fn locked_finish_keeps_waiting() {
        let mut seg = segment("locked", 1, 1);
        seg.set_turn(TURN_FINISHED);
        seg.set_lock_flag(true);
        assert!(matches!(poll(&mut seg, Role::Pong), TurnState::Waiting));
        assert!(matches!(poll(&mut seg, Role::Ping), TurnState::Waiting));
        seg.set_lock_flag(false);
        assert!(matches!(poll(&mut seg, Role::Pong), TurnState::Finished));
        seg.destroy().unwrap();
    }
}
