//! # Latency probe
//!
//! Times a pointer-chasing walk over `blocks` memory blocks spaced `stride` bytes apart. The
//! blocks are linked in a uniformly random cyclic order so every block is visited exactly once
//! per cycle while defeating spatial and stride prefetchers. Each call builds a fresh
//! permutation in a freshly allocated buffer, and the buffer is released before the call
//! returns.
use crate::error::{ConfigError, Error, Result};
use log::trace;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::alloc::{self, Layout};
use std::hint::black_box;
use std::ptr::{self, NonNull};
use std::time::{Duration, Instant};

/// Width of a native pointer, the smallest usable stride
pub const POINTER_WIDTH: usize = std::mem::size_of::<*const u8>();

/// Alignment of every probe buffer
pub const PAGE_ALIGN: usize = 4096;

/// Shape of one pointer-chase working set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChaseLayout {
    stride: usize,
    blocks: usize,
}

impl ChaseLayout {
    /// Validate and build a layout. Strides below the pointer width are rejected, never rounded.
    pub fn new(stride: usize, blocks: usize) -> Result<Self, ConfigError> {
        if stride < POINTER_WIDTH {
            return Err(ConfigError::StrideBelowPointerWidth {
                stride,
                pointer_width: POINTER_WIDTH,
            });
        }
        if stride % POINTER_WIDTH != 0 {
            return Err(ConfigError::MisalignedStride {
                stride,
                pointer_width: POINTER_WIDTH,
            });
        }
        if blocks == 0 {
            return Err(ConfigError::EmptyWorkingSet);
        }
        if stride.checked_mul(blocks).is_none() {
            return Err(ConfigError::BufferTooLarge { stride, blocks });
        }
        Ok(ChaseLayout { stride, blocks })
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// Bytes spanned by the working set, `stride * blocks`
    pub fn buffer_size(&self) -> usize {
        self.stride * self.blocks
    }
}

/// Anything that can time a pointer-chase walk over a layout.
///
/// Probes must not overlap: implementations are driven from a single thread, one walk at a time.
pub trait LatencyProbe {
    /// Elapsed time of `iterations` dependent loads over a fresh permutation of `layout`
    fn measure(&mut self, layout: ChaseLayout, iterations: u64) -> Result<Duration>;
}

impl<P: LatencyProbe + ?Sized> LatencyProbe for &mut P {
    fn measure(&mut self, layout: ChaseLayout, iterations: u64) -> Result<Duration> {
        (**self).measure(layout, iterations)
    }
}

/// Owned, page-aligned probe buffer, freed on drop
struct ChaseBuffer {
    base: NonNull<u8>,
    alloc_layout: Layout,
    stride: usize,
}

impl ChaseBuffer {
    fn allocate(chase: ChaseLayout) -> Result<Self, ConfigError> {
        let size = chase.buffer_size();
        let failed = ConfigError::AllocationFailed {
            size,
            align: PAGE_ALIGN,
        };
        let alloc_layout = Layout::from_size_align(size, PAGE_ALIGN).map_err(|_| failed.clone())?;
        // SAFETY: `ChaseLayout` guarantees a non-zero size (stride >= pointer width, blocks >= 1)
        let raw = unsafe { alloc::alloc(alloc_layout) };
        let base = NonNull::new(raw).ok_or(failed)?;
        Ok(ChaseBuffer {
            base,
            alloc_layout,
            stride: chase.stride,
        })
    }

    /// Address of block `index`
    fn block(&self, index: usize) -> *mut *mut u8 {
        // SAFETY: callers only pass indices below the block count, so the offset stays in bounds
        unsafe { self.base.as_ptr().add(index * self.stride).cast() }
    }

    /// Store forward pointers so that following them walks `order` as one closed cycle
    fn link(&mut self, order: &[usize]) {
        for (pos, &current) in order.iter().enumerate() {
            let next = order[(pos + 1) % order.len()];
            // SAFETY: stride is a multiple of the pointer width and the base is page aligned, so
            // every block start is aligned for a pointer write and lies inside the allocation
            unsafe { ptr::write(self.block(current), self.block(next).cast::<u8>()) };
        }
    }
}

impl Drop for ChaseBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `allocate` with exactly this layout
        unsafe { alloc::dealloc(self.base.as_ptr(), self.alloc_layout) };
    }
}

/// Timed pointer chase, returning elapsed time and the final pointer
#[inline(never)]
fn chase(start: *mut u8, iterations: u64) -> (Duration, *mut u8) {
    let mut cursor = start;
    let begin = Instant::now();
    for _ in 0..iterations {
        // SAFETY: every block holds a pointer to another block of the same live buffer
        cursor = unsafe { *(cursor as *const *mut u8) };
    }
    let elapsed = begin.elapsed();

    // Prevent dead code elimination
    (elapsed, black_box(cursor))
}

/// Real hardware probe: random cyclic permutation over an aligned heap buffer.
pub struct PointerChaseProbe<R = StdRng> {
    rng: R,
}

impl PointerChaseProbe<StdRng> {
    /// Probe with permutations seeded from OS entropy
    pub fn new() -> Self {
        PointerChaseProbe {
            rng: StdRng::from_entropy(),
        }
    }

    /// Probe with reproducible permutations
    pub fn with_seed(seed: u64) -> Self {
        PointerChaseProbe {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for PointerChaseProbe<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> PointerChaseProbe<R> {
    pub fn with_rng(rng: R) -> Self {
        PointerChaseProbe { rng }
    }
}

impl<R: Rng> LatencyProbe for PointerChaseProbe<R> {
    fn measure(&mut self, layout: ChaseLayout, iterations: u64) -> Result<Duration> {
        let mut buffer = ChaseBuffer::allocate(layout)?;

        let mut order: Vec<usize> = (0..layout.blocks).collect();
        order.shuffle(&mut self.rng);
        buffer.link(&order);

        let (elapsed, last) = chase(buffer.block(order[0]).cast(), iterations);
        if last.is_null() {
            return Err(Error::BrokenChain);
        }
        trace!(
            "stride {} B x {} blocks: {:?} for {} loads",
            layout.stride, layout.blocks, elapsed, iterations
        );
        Ok(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_below_pointer_width_is_a_configuration_error() {
        let err = ChaseLayout::new(POINTER_WIDTH / 2, 4).unwrap_err();
        assert_eq!(
            err,
            ConfigError::StrideBelowPointerWidth {
                stride: POINTER_WIDTH / 2,
                pointer_width: POINTER_WIDTH,
            }
        );
        let err: Error = err.into();
        assert!(err.is_fatal());
    }

    #[test]
    fn rejects_empty_and_misaligned_layouts() {
        assert_eq!(ChaseLayout::new(64, 0), Err(ConfigError::EmptyWorkingSet));
        assert!(matches!(
            ChaseLayout::new(POINTER_WIDTH + 1, 4),
            Err(ConfigError::MisalignedStride { .. })
        ));
        assert!(matches!(
            ChaseLayout::new(64, usize::MAX),
            Err(ConfigError::BufferTooLarge { .. })
        ));
    }

    #[test]
    fn non_power_of_two_strides_are_accepted() {
        let layout = ChaseLayout::new(24, 10).unwrap();
        assert_eq!(layout.buffer_size(), 240);
    }

    #[test]
    fn linked_buffer_is_one_closed_cycle() {
        let layout = ChaseLayout::new(64, 37).unwrap();
        let mut buffer = ChaseBuffer::allocate(layout).unwrap();
        let mut order: Vec<usize> = (0..37).collect();
        order.shuffle(&mut StdRng::seed_from_u64(7));
        buffer.link(&order);

        let start = buffer.block(order[0]).cast::<u8>();
        let mut cursor = start;
        let mut seen = std::collections::HashSet::new();
        for _ in 0..37 {
            assert!(seen.insert(cursor as usize));
            cursor = unsafe { *(cursor as *const *mut u8) };
        }
        assert_eq!(cursor, start);
    }

    #[test]
    fn measures_a_small_walk() {
        let mut probe = PointerChaseProbe::with_seed(1);
        let layout = ChaseLayout::new(64, 16).unwrap();
        let elapsed = probe.measure(layout, 10_000).unwrap();
        assert!(elapsed > Duration::ZERO);
    }
}
