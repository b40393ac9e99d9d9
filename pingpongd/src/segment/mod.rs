// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Coordination segment
//!
//! One POSIX shared memory object per job, holding every piece of mutable
//! state the worker pair shares. The control plane creates and initializes it
//! before the job descriptor is published, so workers only ever attach.
//!
//! Who may write is decided by the turn flag alone (see `scheduler`). This
//! module only knows how the bytes are laid out and how a handle is released:
//! `release` drops the mapping, `destroy` additionally unlinks the object.
//! Both consume the handle.

pub mod layout;

use std::ffi::c_void;
use std::fs::File;
use std::num::NonZeroUsize;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::atomic::{fence, Ordering};

use log::{debug, info, warn};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use nix::sys::stat::Mode;

use crate::error::CoordError;
use crate::job::Job;
use layout::{SegmentHeader, SegmentLayout, HEADER_SIZE, SEGMENT_MAGIC};

pub fn shm_name(job_id: &str) -> String {
    format!("/pingpong-{}", job_id)
}

/// Mutable regions of a segment. Only handed out to the current turn holder.
pub(crate) struct SegmentView<'a> {
    pub positions: &'a mut [u32],
    pub colors: &'a mut [u32],
    pub position_mask: &'a mut [u8],
    pub color_mask: &'a mut [u8],
}

/// A process-local handle onto a job's coordination segment.
pub struct Segment {
    job_id: String,
    _file: File,
    base: NonNull<c_void>,
    layout: SegmentLayout,
    width: u32,
    height: u32,
}

// SAFETY: the mapping is only dereferenced through &self/&mut self, and writes
// to shared regions are serialized across processes by the turn flag.
unsafe impl Send for Segment {}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("job_id", &self.job_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("iteration", &self.iteration())
            .field("turn", &self.turn())
            .field("lock", &self.lock_flag())
            .finish()
    }
}

fn os_error(op: &'static str, job_id: &str, source: Errno) -> CoordError {
    CoordError::Os {
        op,
        job_id: job_id.to_string(),
        source,
    }
}

fn io_error(op: &'static str, job_id: &str, source: std::io::Error) -> CoordError {
    os_error(
        op,
        job_id,
        Errno::from_raw(source.raw_os_error().unwrap_or(libc::EIO)),
    )
}

unsafe fn map_shared(file: &File, len: usize, job_id: &str) -> Result<NonNull<c_void>, CoordError> {
    let length = NonZeroUsize::new(len)
        .ok_or_else(|| CoordError::SegmentUninitialized {
            job_id: job_id.to_string(),
        })?;
    mman::mmap(
        None,
        length,
        ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
        MapFlags::MAP_SHARED,
        file,
        0,
    )
    .map_err(|e| os_error("mmap", job_id, e))
}

impl Segment {
    /// Creates and initializes the segment for `job`: masks all available,
    /// counters and flags zero. The magic number is published last.
    pub fn create(job: &Job) -> Result<Self, CoordError> {
        job.validate()?;
        let layout = SegmentLayout::for_dimensions(job.width, job.height)?;
        let name = shm_name(&job.job_id);

        let fd = mman::shm_open(
            name.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|e| match e {
            Errno::EEXIST => CoordError::SegmentExists {
                job_id: job.job_id.clone(),
            },
            e => os_error("shm_open", &job.job_id, e),
        })?;
        let file = File::from(fd);

        let base = match file
            .set_len(layout.total_len as u64)
            .map_err(|e| io_error("ftruncate", &job.job_id, e))
            .and_then(|_| unsafe { map_shared(&file, layout.total_len, &job.job_id) })
        {
            Ok(base) => base,
            Err(e) => {
                let _ = mman::shm_unlink(name.as_str());
                return Err(e);
            }
        };

        let segment = Self {
            job_id: job.job_id.clone(),
            _file: file,
            base,
            layout,
            width: job.width,
            height: job.height,
        };

        unsafe {
            // both masks are contiguous
            ptr::write_bytes(
                segment.byte_ptr(layout.position_mask),
                1,
                layout.total_len - layout.position_mask,
            );
            let header = segment.base.cast::<SegmentHeader>().as_ptr();
            ptr::addr_of_mut!((*header).width).write(job.width);
            ptr::addr_of_mut!((*header).height).write(job.height);
        }
        let header = segment.header();
        header.iteration.store(0, Ordering::Relaxed);
        header.turn.store(0, Ordering::Relaxed);
        header.lock.store(0, Ordering::Relaxed);
        fence(Ordering::Release);
        header.magic.store(SEGMENT_MAGIC, Ordering::Release);

        info!(
            "created segment {} ({}x{}, {} bytes)",
            name, job.width, job.height, layout.total_len
        );
        Ok(segment)
    }

    /// Attaches to the segment of `job`. Its size must match the job's
    /// dimensions exactly.
    ///
    /// Returns `SegmentNotFound` once the job has been completed and cleaned
    /// up; callers should treat that as "done", not retry.
    pub fn attach(job: &Job) -> Result<Self, CoordError> {
        job.validate()?;
        let segment = Self::attach_by_id(&job.job_id)?;
        if segment.width != job.width || segment.height != job.height {
            return Err(CoordError::SegmentLayoutMismatch {
                job_id: job.job_id.clone(),
                reason: format!(
                    "segment is {}x{}, job is {}x{}",
                    segment.width, segment.height, job.width, job.height
                ),
            });
        }
        Ok(segment)
    }

    /// Attaches to a segment knowing only the job id; dimensions are taken
    /// from the header.
    pub fn attach_by_id(job_id: &str) -> Result<Self, CoordError> {
        let name = shm_name(job_id);
        let fd = mman::shm_open(name.as_str(), OFlag::O_RDWR, Mode::empty()).map_err(|e| match e {
            Errno::ENOENT => CoordError::SegmentNotFound {
                job_id: job_id.to_string(),
            },
            e => os_error("shm_open", job_id, e),
        })?;
        let file = File::from(fd);
        let len = file
            .metadata()
            .map_err(|e| io_error("fstat", job_id, e))?
            .len() as usize;
        if len < HEADER_SIZE {
            return Err(CoordError::SegmentUninitialized {
                job_id: job_id.to_string(),
            });
        }

        let base = unsafe { map_shared(&file, len, job_id)? };
        let unmap_with = |e: CoordError| {
            let _ = unsafe { mman::munmap(base, len) };
            e
        };

        let header = unsafe { base.cast::<SegmentHeader>().as_ref() };
        if header.magic.load(Ordering::Acquire) != SEGMENT_MAGIC {
            return Err(unmap_with(CoordError::SegmentUninitialized {
                job_id: job_id.to_string(),
            }));
        }
        let (width, height) = (header.width, header.height);
        let layout = match SegmentLayout::for_dimensions(width, height) {
            Ok(layout) if layout.total_len == len => layout,
            Ok(layout) => {
                return Err(unmap_with(CoordError::SegmentLayoutMismatch {
                    job_id: job_id.to_string(),
                    reason: format!(
                        "{}x{} needs {} bytes, object has {}",
                        width, height, layout.total_len, len
                    ),
                }))
            }
            Err(e) => return Err(unmap_with(e)),
        };

        debug!("attached to segment {} ({}x{})", name, width, height);
        Ok(Self {
            job_id: job_id.to_string(),
            _file: file,
            base,
            layout,
            width,
            height,
        })
    }

    /// Removes the shared memory object of a job without attaching.
    pub fn unlink(job_id: &str) -> Result<(), CoordError> {
        mman::shm_unlink(shm_name(job_id).as_str()).map_err(|e| match e {
            Errno::ENOENT => CoordError::SegmentNotFound {
                job_id: job_id.to_string(),
            },
            e => os_error("shm_unlink", job_id, e),
        })
    }

    fn header(&self) -> &SegmentHeader {
        unsafe { self.base.cast::<SegmentHeader>().as_ref() }
    }

    fn byte_ptr(&self, offset: usize) -> *mut u8 {
        unsafe { self.base.cast::<u8>().as_ptr().add(offset) }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> u32 {
        self.layout.pixels as u32
    }

    pub fn iteration(&self) -> u32 {
        self.header().iteration.load(Ordering::Acquire)
    }

    pub(crate) fn set_iteration(&self, iteration: u32) {
        self.header().iteration.store(iteration, Ordering::Release);
    }

    pub fn turn(&self) -> u8 {
        self.header().turn.load(Ordering::Acquire)
    }

    pub(crate) fn set_turn(&self, turn: u8) {
        self.header().turn.store(turn, Ordering::Release);
    }

    pub fn lock_flag(&self) -> bool {
        self.header().lock.load(Ordering::Acquire) != 0
    }

    /// Reader hint: while set, the segment must not be destroyed.
    pub fn set_lock_flag(&self, locked: bool) {
        self.header()
            .lock
            .store(u8::from(locked), Ordering::Release);
    }

    pub(crate) fn view_mut(&mut self) -> SegmentView<'_> {
        let pixels = self.layout.pixels;
        unsafe {
            SegmentView {
                positions: slice::from_raw_parts_mut(
                    self.byte_ptr(self.layout.position_buffer) as *mut u32,
                    pixels,
                ),
                colors: slice::from_raw_parts_mut(
                    self.byte_ptr(self.layout.color_buffer) as *mut u32,
                    pixels,
                ),
                position_mask: slice::from_raw_parts_mut(
                    self.byte_ptr(self.layout.position_mask),
                    pixels,
                ),
                color_mask: slice::from_raw_parts_mut(
                    self.byte_ptr(self.layout.color_mask),
                    self.layout.total_len - self.layout.color_mask,
                ),
            }
        }
    }

    /// The committed `(position, color)` pairs, in iteration order.
    pub fn snapshot(&self) -> Vec<(u32, u32)> {
        let committed = (self.iteration() as usize).min(self.layout.pixels);
        let (positions, colors) = unsafe {
            (
                slice::from_raw_parts(
                    self.byte_ptr(self.layout.position_buffer) as *const u32,
                    committed,
                ),
                slice::from_raw_parts(
                    self.byte_ptr(self.layout.color_buffer) as *const u32,
                    committed,
                ),
            )
        };
        positions.iter().copied().zip(colors.iter().copied()).collect()
    }

    /// Number of still available entries in the position mask.
    pub fn available_positions(&self) -> usize {
        let mask = unsafe {
            slice::from_raw_parts(self.byte_ptr(self.layout.position_mask), self.layout.pixels)
        };
        mask.iter().filter(|&&flag| flag != 0).count()
    }

    /// Drops this process' mapping. The shared object stays.
    pub fn release(self) {
        debug!("releasing handle on {}", shm_name(&self.job_id));
    }

    /// Unlinks the shared object, then drops the mapping. Must happen exactly
    /// once per job across all processes.
    pub fn destroy(self) -> Result<(), CoordError> {
        Segment::unlink(&self.job_id)?;
        info!("destroyed segment {}", shm_name(&self.job_id));
        Ok(())
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Err(e) = unsafe { mman::munmap(self.base, self.layout.total_len) } {
            warn!("munmap of {} failed: {}", shm_name(&self.job_id), e);
        }
    }
}
