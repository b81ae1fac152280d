//! Shared memory layout of a named value arena.
//!
//! Everything stored in the arena is addressed by byte offsets from the
//! start of the mapping, never by pointers, so each process can map the
//! object at a different address.
//!
//! # Memory Layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        ArenaHeader (64B)                       │
//! │  magic │ version │ capacity │ slots │ heap_start │ heap_end │  │
//! │  live (atomic) │ lock (atomic)                                 │
//! ├────────────────────────────────────────────────────────────────┤
//! │                     DirEntry[0] (96B)                          │
//! │  state │ kind │ key_len │ offset │ len │ key[64]               │
//! ├────────────────────────────────────────────────────────────────┤
//! │                          ...                                   │
//! ├────────────────────────────────────────────────────────────────┤
//! │                  DirEntry[DIRECTORY_SLOTS-1]                   │
//! ├────────────────────────────────────────────────────────────────┤
//! │                 Heap (heap_start .. heap_end)                  │
//! │  ┌─────────────────────┬───────────────────────────────────┐   │
//! │  │ BlockHeader (16B)   │ payload (16B aligned)             │   │
//! │  └─────────────────────┴───────────────────────────────────┘   │
//! │  ...                                                           │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Magic number identifying a formatted arena.
///
/// ASCII encoding of "TESSERAA": `0x5445_5353_4552_4141`.
pub const ARENA_MAGIC: u64 = 0x5445_5353_4552_4141;

/// Increment on any incompatible change to the structures below.
pub const ARENA_VERSION: u64 = 1;

/// Default arena size, 64 KiB.
pub const DEFAULT_CAPACITY: usize = 1 << 16;

/// Number of keys that can be live at the same time.
pub const DIRECTORY_SLOTS: usize = 64;

/// Longest key, in bytes.
pub const MAX_KEY_LEN: usize = 64;

/// Alignment of every heap block and payload.
pub const BLOCK_ALIGN: usize = 16;

pub const ENTRY_FREE: u32 = 0;
pub const ENTRY_LIVE: u32 = 1;

#[repr(C)]
pub struct ArenaHeader {
    /// Written last during formatting; attachers treat anything else as
    /// "not ready yet".
    pub magic: AtomicU64,
    pub version: u64,
    /// Size of the whole mapping in bytes.
    pub capacity: u64,
    /// Number of directory entries following the header.
    pub slots: u64,
    pub heap_start: u64,
    pub heap_end: u64,
    /// Count of live directory entries.
    pub live: AtomicU64,
    /// 0 = unlocked, 1 = held. Guards the directory and the heap.
    pub lock: AtomicU32,
    _pad: u32,
}

/// One directory slot. Only meaningful while `state == ENTRY_LIVE`.
#[repr(C)]
pub struct DirEntry {
    pub state: u32,
    pub kind: u32,
    pub key_len: u32,
    _pad: u32,
    /// Payload offset from the arena base; 0 for empty sequences.
    pub offset: u64,
    /// Element count.
    pub len: u64,
    pub key: [u8; MAX_KEY_LEN],
}

impl DirEntry {
    #[inline]
    pub fn is_live(&self) -> bool {
        self.state == ENTRY_LIVE
    }

    #[inline]
    pub fn key_bytes(&self) -> &[u8] {
        let n = (self.key_len as usize).min(MAX_KEY_LEN);
        &self.key[..n]
    }

    pub fn set_key(&mut self, key: &[u8]) {
        self.key = [0; MAX_KEY_LEN];
        self.key[..key.len()].copy_from_slice(key);
        self.key_len = key.len() as u32;
    }

    pub fn clear(&mut self) {
        self.state = ENTRY_FREE;
        self.kind = 0;
        self.key_len = 0;
        self.offset = 0;
        self.len = 0;
    }
}

/// In-band header preceding every heap block.
#[repr(C)]
pub struct BlockHeader {
    /// Total block size including this header. Multiple of `BLOCK_ALIGN`.
    pub size: u64,
    /// Non-zero when the block is free.
    pub free: u64,
}

pub const BLOCK_HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Smallest block worth splitting off: a header plus one aligned payload unit.
pub const MIN_BLOCK: usize = BLOCK_HEADER_SIZE + BLOCK_ALIGN;

#[inline]
pub const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Byte offset where the heap starts.
pub const fn heap_start() -> usize {
    align_up(
        size_of::<ArenaHeader>() + DIRECTORY_SLOTS * size_of::<DirEntry>(),
        BLOCK_ALIGN,
    )
}

/// Smallest arena that can hold one minimal block.
pub const fn min_capacity() -> usize {
    heap_start() + MIN_BLOCK
}

/// Usable heap end for a given capacity (rounded down to block alignment).
pub const fn heap_end(capacity: usize) -> usize {
    capacity & !(BLOCK_ALIGN - 1)
}

impl ArenaHeader {
    /// Writes a fresh header. `magic` is published last with `Release`.
    ///
    /// # Safety
    /// `base` must point to a writable, zeroed mapping of at least
    /// `capacity` bytes that no other process is using yet.
    pub unsafe fn format(base: *mut u8, capacity: usize) {
        let h = base as *mut ArenaHeader;
        unsafe {
            (*h).version = ARENA_VERSION;
            (*h).capacity = capacity as u64;
            (*h).slots = DIRECTORY_SLOTS as u64;
            (*h).heap_start = heap_start() as u64;
            (*h).heap_end = heap_end(capacity) as u64;
            (*h).live.store(0, Ordering::Relaxed);
            (*h).lock.store(0, Ordering::Relaxed);
            (*h).magic.store(ARENA_MAGIC, Ordering::Release);
        }
    }

    /// Validates the header against the mapping it was found in.
    pub fn validate(&self, mapped_len: usize) -> Result<(), &'static str> {
        if self.magic.load(Ordering::Acquire) != ARENA_MAGIC {
            return Err("bad magic");
        }
        if self.version != ARENA_VERSION {
            return Err("wrong version");
        }
        if self.capacity as usize != mapped_len {
            return Err("capacity does not match mapped length");
        }
        if self.slots as usize != DIRECTORY_SLOTS {
            return Err("directory size mismatch");
        }
        if self.heap_start as usize != heap_start()
            || self.heap_end as usize != heap_end(mapped_len)
        {
            return Err("heap bounds mismatch");
        }
        Ok(())
    }
}
