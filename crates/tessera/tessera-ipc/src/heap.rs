//! First-fit allocator over the arena heap.
//!
//! Blocks are laid out back to back between `heap_start` and `heap_end`,
//! each starting with a [`BlockHeader`]. Allocation walks the blocks and
//! takes the first free one that fits, splitting off the tail when the
//! remainder can hold a block of its own. Releasing a block marks it free
//! and merges runs of adjacent free blocks, so a full drain always returns
//! the heap to a single block.
//!
//! The heap carries no lock of its own; callers hold the arena lock.

use crate::shm_layout::{BLOCK_ALIGN, BLOCK_HEADER_SIZE, BlockHeader, MIN_BLOCK, align_up};

pub(crate) struct Heap {
    base: *mut u8,
    start: usize,
    end: usize,
}

impl Heap {
    /// # Safety
    /// `base..base + end` must be a writable mapping and `start..end` must
    /// be reserved for this heap.
    pub unsafe fn new(base: *mut u8, start: usize, end: usize) -> Self {
        Self { base, start, end }
    }

    /// Turn the whole range into one free block.
    pub fn format(&mut self) {
        let b = self.block(self.start);
        unsafe {
            (*b).size = (self.end - self.start) as u64;
            (*b).free = 1;
        }
    }

    #[inline(always)]
    fn block(&self, off: usize) -> *mut BlockHeader {
        debug_assert!(off % BLOCK_ALIGN == 0);
        // SAFETY: callers only pass offsets inside start..end (see `checked_size`)
        unsafe { self.base.add(off) as *mut BlockHeader }
    }

    /// Size of the block at `off`, rejecting headers that would walk off the
    /// heap or loop forever.
    fn checked_size(&self, off: usize) -> Result<usize, &'static str> {
        let size = unsafe { (*self.block(off)).size } as usize;
        if size < BLOCK_HEADER_SIZE || size % BLOCK_ALIGN != 0 || off + size > self.end {
            return Err("heap block header out of bounds");
        }
        Ok(size)
    }

    /// Reserve `payload` bytes. Returns the payload offset from the arena base,
    /// or `None` when no free block is large enough.
    pub fn alloc(&mut self, payload: usize) -> Result<Option<usize>, &'static str> {
        let need = BLOCK_HEADER_SIZE + align_up(payload.max(1), BLOCK_ALIGN);
        let mut off = self.start;
        while off < self.end {
            let size = self.checked_size(off)?;
            let b = self.block(off);
            if unsafe { (*b).free } != 0 && size >= need {
                if size - need >= MIN_BLOCK {
                    let tail = self.block(off + need);
                    unsafe {
                        (*tail).size = (size - need) as u64;
                        (*tail).free = 1;
                        (*b).size = need as u64;
                    }
                }
                unsafe { (*b).free = 0 };
                return Ok(Some(off + BLOCK_HEADER_SIZE));
            }
            off += size;
        }
        Ok(None)
    }

    /// Release the block whose payload starts at `payload_off`.
    pub fn free(&mut self, payload_off: usize) -> Result<(), &'static str> {
        if payload_off < self.start + BLOCK_HEADER_SIZE
            || payload_off >= self.end
            || payload_off % BLOCK_ALIGN != 0
        {
            return Err("payload offset outside heap");
        }
        let off = payload_off - BLOCK_HEADER_SIZE;
        self.checked_size(off)?;
        let b = self.block(off);
        if unsafe { (*b).free } != 0 {
            return Err("double free");
        }
        unsafe { (*b).free = 1 };
        self.coalesce()
    }

    fn coalesce(&mut self) -> Result<(), &'static str> {
        let mut off = self.start;
        while off < self.end {
            let mut size = self.checked_size(off)?;
            let b = self.block(off);
            if unsafe { (*b).free } != 0 {
                while off + size < self.end {
                    let next = off + size;
                    let next_size = self.checked_size(next)?;
                    if unsafe { (*self.block(next)).free } == 0 {
                        break;
                    }
                    size += next_size;
                    unsafe { (*b).size = size as u64 };
                }
            }
            off += size;
        }
        Ok(())
    }

    /// Sum of payload bytes available across free blocks.
    pub fn free_bytes(&self) -> Result<usize, &'static str> {
        self.fold_free(0, |acc, payload| acc + payload)
    }

    /// Payload capacity of the largest free block.
    pub fn largest_free(&self) -> Result<usize, &'static str> {
        self.fold_free(0, usize::max)
    }

    fn fold_free(&self, init: usize, f: impl Fn(usize, usize) -> usize) -> Result<usize, &'static str> {
        let mut acc = init;
        let mut off = self.start;
        while off < self.end {
            let size = self.checked_size(off)?;
            if unsafe { (*self.block(off)).free } != 0 {
                acc = f(acc, size - BLOCK_HEADER_SIZE);
            }
            off += size;
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: usize = 64;
    const END: usize = 1024;

    fn with_heap<R>(f: impl FnOnce(&mut Heap) -> R) -> R {
        let mut buf = vec![0u128; END / 16];
        let mut heap = unsafe { Heap::new(buf.as_mut_ptr() as *mut u8, START, END) };
        heap.format();
        f(&mut heap)
    }

    #[test]
    fn fresh_heap_is_one_free_block() {
        with_heap(|heap| {
            let all = END - START - BLOCK_HEADER_SIZE;
            assert_eq!(heap.free_bytes(), Ok(all));
            assert_eq!(heap.largest_free(), Ok(all));
        });
    }

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        with_heap(|heap| {
            let a = heap.alloc(12).unwrap().unwrap();
            let b = heap.alloc(40).unwrap().unwrap();
            assert_eq!(a % BLOCK_ALIGN, 0);
            assert_eq!(b % BLOCK_ALIGN, 0);
            assert!(b >= a + 16, "blocks overlap");
            assert_eq!(a, START + BLOCK_HEADER_SIZE);
        });
    }

    #[test]
    fn exhausted_heap_returns_none() {
        with_heap(|heap| {
            let all = END - START - BLOCK_HEADER_SIZE;
            assert!(heap.alloc(all + 1).unwrap().is_none());
            assert!(heap.alloc(all).unwrap().is_some());
            assert!(heap.alloc(1).unwrap().is_none());
            assert_eq!(heap.free_bytes(), Ok(0));
        });
    }

    #[test]
    fn freeing_everything_coalesces_back() {
        with_heap(|heap| {
            let before = heap.free_bytes().unwrap();
            let a = heap.alloc(100).unwrap().unwrap();
            let b = heap.alloc(100).unwrap().unwrap();
            let c = heap.alloc(100).unwrap().unwrap();

            // Free out of order so merging must look both ways.
            heap.free(b).unwrap();
            heap.free(a).unwrap();
            heap.free(c).unwrap();

            assert_eq!(heap.free_bytes(), Ok(before));
            assert_eq!(heap.largest_free(), Ok(before));
        });
    }

    #[test]
    fn hole_is_reused_first_fit() {
        with_heap(|heap| {
            let a = heap.alloc(64).unwrap().unwrap();
            let _b = heap.alloc(64).unwrap().unwrap();
            heap.free(a).unwrap();
            let c = heap.alloc(32).unwrap().unwrap();
            assert_eq!(c, a);
        });
    }

    #[test]
    fn double_free_is_detected() {
        with_heap(|heap| {
            let a = heap.alloc(8).unwrap().unwrap();
            let _b = heap.alloc(8).unwrap().unwrap();
            heap.free(a).unwrap();
            assert_eq!(heap.free(a), Err("double free"));
            assert_eq!(heap.free(END + 16), Err("payload offset outside heap"));
        });
    }

    #[test]
    fn corrupt_header_stops_the_walk() {
        let mut buf = vec![0u128; END / 16];
        let base = buf.as_mut_ptr() as *mut u8;
        let mut heap = unsafe { Heap::new(base, START, END) };
        // Zeroed header: size 0 would never advance.
        assert_eq!(heap.alloc(8), Err("heap block header out of bounds"));
    }
}
