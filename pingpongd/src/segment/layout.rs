// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU8};

use crate::allocator::COLOR_DOMAIN;
use crate::error::CoordError;

pub const SEGMENT_MAGIC: u32 = 0x5049_4e47; // "PING"

pub const HEADER_SIZE: usize = 64;

/// Value of the turn flag once every pixel has been assigned.
pub const TURN_FINISHED: u8 = 2;

/// Fixed-size header at offset 0 of every segment.
#[repr(C)]
pub struct SegmentHeader {
    /// Written last by the creator; zero until the segment is fully initialized.
    pub magic: AtomicU32,
    pub width: u32,
    pub height: u32,
    pub iteration: AtomicU32,
    pub turn: AtomicU8,
    pub lock: AtomicU8,
    pub _reserved: [u8; 46],
}

const _: () = assert!(size_of::<SegmentHeader>() == HEADER_SIZE);

/// Byte offsets of the regions inside a segment.
///
/// ```text
/// +--------+-----------------+-----------------+---------------+------------+
/// | header | position buffer |  color buffer   | position mask | color mask |
/// | 64 B   | N x u32         | N x u32         | N x u8        | 256^3 x u8 |
/// +--------+-----------------+-----------------+---------------+------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    pub pixels: usize,
    pub position_buffer: usize,
    pub color_buffer: usize,
    pub position_mask: usize,
    pub color_mask: usize,
    pub total_len: usize,
}

impl SegmentLayout {
    pub fn for_dimensions(width: u32, height: u32) -> Result<Self, CoordError> {
        let pixels = width.checked_mul(height).ok_or_else(|| {
            CoordError::InvalidJob(format!("{}x{} overflows", width, height))
        })? as usize;

        let position_buffer = HEADER_SIZE;
        let color_buffer = position_buffer + pixels * size_of::<u32>();
        let position_mask = color_buffer + pixels * size_of::<u32>();
        let color_mask = position_mask + pixels;
        let total_len = color_mask + COLOR_DOMAIN as usize;

        Ok(Self {
            pixels,
            position_buffer,
            color_buffer,
            position_mask,
            color_mask,
            total_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_for_two_by_two() {
        let layout = SegmentLayout::for_dimensions(2, 2).unwrap();
        assert_eq!(layout.pixels, 4);
        assert_eq!(layout.position_buffer, 64);
        assert_eq!(layout.color_buffer, 80);
        assert_eq!(layout.position_mask, 96);
        assert_eq!(layout.color_mask, 100);
        assert_eq!(layout.total_len, 100 + 16_777_216);
    }

    #[test]
    fn buffers_stay_aligned() {
        let layout = SegmentLayout::for_dimensions(7, 3).unwrap();
        assert_eq!(layout.position_buffer % 4, 0);
        assert_eq!(layout.color_buffer % 4, 0);
    }
}
