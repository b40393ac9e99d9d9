// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use super::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

fn rng() -> StdRng {
    StdRng::seed_from_u64(1)
}

/// Mask of `size` entries where only `free` (spread out) are available.
fn sparse_mask(size: usize, free: usize) -> Vec<u8> {
    let mut mask = vec![0u8; size];
    let stride = size / free;
    for i in 0..free {
        mask[i * stride + stride / 2] = 1;
    }
    mask
}

#[test]
fn strategy_switches_at_threshold() {
    assert_eq!(choose_strategy(0, 1000, 0.999), Strategy::Rejection);
    assert_eq!(choose_strategy(998, 1000, 0.999), Strategy::Rejection);
    assert_eq!(choose_strategy(999, 1000, 0.999), Strategy::RankSelection);
    // the color domain stays on rejection for any realistic canvas
    assert_eq!(
        choose_strategy(4096 * 4096 / 2, COLOR_DOMAIN, 0.99999),
        Strategy::Rejection
    );
    assert_eq!(
        choose_strategy(COLOR_DOMAIN - 1, COLOR_DOMAIN, 0.99999),
        Strategy::RankSelection
    );
}

#[test]
fn full_run_is_a_permutation() {
    for threshold in [0.0, 0.5, 0.999, 1.0] {
        let mut mask = vec![1u8; 1000];
        let mut rng = rng();
        let mut allocator = UniqueAllocator::new(Domain::Position, &mut mask, 0, threshold);
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let index = allocator.allocate(&mut rng).unwrap();
            assert!(index < 1000);
            assert!(seen.insert(index), "index {index} handed out twice");
        }
        assert_eq!(allocator.claimed(), 1000);
        assert_eq!(allocator.remaining(), 0);
        assert!(mask.iter().all(|&flag| flag == 0));
    }
}

#[test]
fn rank_selection_near_exhaustion_on_a_million() {
    const SIZE: usize = 1_000_000;
    const FREE: usize = 400;
    let mut mask = sparse_mask(SIZE, FREE);
    let expected: HashSet<u32> = mask
        .iter()
        .enumerate()
        .filter(|(_, &flag)| flag == 1)
        .map(|(i, _)| i as u32)
        .collect();

    let mut rng = rng();
    let mut allocator =
        UniqueAllocator::new(Domain::Position, &mut mask, (SIZE - FREE) as u32, 0.999);
    let mut got = HashSet::new();
    for _ in 0..FREE {
        assert_eq!(allocator.strategy(), Strategy::RankSelection);
        let index = allocator.allocate(&mut rng).unwrap();
        assert!(expected.contains(&index), "{index} was not available");
        assert!(got.insert(index));
    }
    assert_eq!(got, expected);
}

#[test]
fn rejection_sampling_only_returns_free_slots() {
    const SIZE: usize = 1_000_000;
    let mut mask = vec![1u8; SIZE];
    // claim every odd slot
    for i in (1..SIZE).step_by(2) {
        mask[i] = 0;
    }
    let mut rng = rng();
    let mut allocator =
        UniqueAllocator::new(Domain::Color, &mut mask, (SIZE / 2) as u32, 0.999);
    for _ in 0..10_000 {
        assert_eq!(allocator.strategy(), Strategy::Rejection);
        let index = allocator.allocate(&mut rng).unwrap();
        assert_eq!(index % 2, 0);
    }
}

#[test]
fn exhausted_allocator_reports_error() {
    let mut mask = vec![0u8; 4];
    let mut allocator = UniqueAllocator::new(Domain::Position, &mut mask, 4, 0.999);
    let err = allocator.allocate(&mut rng()).unwrap_err();
    assert!(matches!(
        err,
        CoordError::AllocationExhausted {
            domain: Domain::Position,
            size: 4
        }
    ));
    assert!(err.is_fatal());
}

#[test]
fn inconsistent_count_is_mask_corruption() {
    // claims one entry is still free but none is
    let mut mask = vec![0u8; 8];
    let mut allocator = UniqueAllocator::new(Domain::Color, &mut mask, 7, 0.5);
    let err = allocator.allocate(&mut rng()).unwrap_err();
    assert!(matches!(err, CoordError::MaskCorruption { domain: Domain::Color, .. }));
}

#[test]
fn rejection_falls_back_to_rank_pass() {
    // claimed = 0 keeps rejection selected although the mask is empty
    let mut mask = vec![0u8; 16];
    let mut allocator = UniqueAllocator::new(Domain::Position, &mut mask, 0, 1.0);
    let err = allocator.allocate(&mut rng()).unwrap_err();
    assert!(matches!(err, CoordError::MaskCorruption { .. }));
}
