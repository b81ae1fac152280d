//! Named value store: a fixed-capacity shared arena holding typed sequences
//! under string keys.
//!
//! One process creates the arena with [`NamedValueStore::open_or_create`]
//! and owns its OS name; the peer attaches with [`NamedValueStore::attach`].
//! Both sides may insert and take values. Every directory or heap mutation
//! runs under the arena lock word in the header, which keeps the arena's own
//! bookkeeping consistent across processes. It does not order sends against
//! receives; that is the job of a [`SharedSemaphore`](crate::SharedSemaphore)
//! hand-off.

use crate::element::{Element, ElementKind};
use crate::error::StoreError;
use crate::heap::Heap;
use crate::shm_layout::{
    ArenaHeader, DIRECTORY_SLOTS, DirEntry, ENTRY_LIVE, MAX_KEY_LEN, heap_end, heap_start,
    min_capacity,
};
use std::mem::size_of;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use tessera_shm::ShmSegment;
use tessera_tensor::TensorData;
use tracing::{debug, info, warn};

/// Spins before falling back to `yield_now` while waiting for the arena lock.
const SPIN_LIMIT: u32 = 128;

/// Metadata of one live entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: String,
    pub kind: ElementKind,
    /// Element count.
    pub len: usize,
}

pub struct NamedValueStore {
    segment: ShmSegment,
}

/// Holds the arena lock word; released on drop.
struct ArenaGuard<'a> {
    lock: &'a AtomicU32,
}

impl<'a> ArenaGuard<'a> {
    fn acquire(lock: &'a AtomicU32) -> Self {
        let mut spins = 0u32;
        while lock
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            if spins < SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
        Self { lock }
    }
}

impl Drop for ArenaGuard<'_> {
    fn drop(&mut self) {
        self.lock.store(0, Ordering::Release);
    }
}

impl NamedValueStore {
    /// Creates a new arena of `capacity` bytes under `name`.
    ///
    /// A stale object left under the same name by a crashed process is
    /// removed and replaced (see [`ShmSegment::create`]). The returned store
    /// owns the name and unlinks it when dropped.
    pub fn open_or_create(name: &str, capacity: usize) -> Result<Self, StoreError> {
        let minimum = min_capacity();
        if capacity < minimum {
            return Err(StoreError::InvalidCapacity { capacity, minimum });
        }

        let segment = ShmSegment::create(name, capacity)?;
        let base = segment.as_ptr();
        // SAFETY: the mapping is fresh, zeroed and `capacity` bytes long.
        // Attachers ignore it until the header publishes its magic.
        unsafe {
            Heap::new(base, heap_start(), heap_end(capacity)).format();
            ArenaHeader::format(base, capacity);
        }

        info!(name = segment.name(), capacity, "created named value store");
        Ok(Self { segment })
    }

    /// Attaches to an arena created by another process. Never reformats.
    pub fn attach(name: &str) -> Result<Self, StoreError> {
        let segment = ShmSegment::open(name)?;
        let corrupt = |reason| StoreError::Corrupt {
            name: segment.name().to_string(),
            reason,
        };
        if segment.len() < min_capacity() {
            return Err(corrupt("mapping is smaller than an empty arena"));
        }
        // SAFETY: the mapping is at least header-sized (checked above)
        let header = unsafe { &*(segment.as_ptr() as *const ArenaHeader) };
        header.validate(segment.len()).map_err(corrupt)?;

        debug!(name = segment.name(), capacity = segment.len(), "attached named value store");
        Ok(Self { segment })
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }

    pub fn capacity(&self) -> usize {
        self.segment.len()
    }

    pub fn is_owner(&self) -> bool {
        self.segment.is_owner()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.header().live.load(Ordering::Acquire) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store `values` under `key`.
    ///
    /// Fails with [`StoreError::DuplicateKey`] while any sequence is live
    /// under `key`, leaving it untouched. The payload is fully copied before
    /// the directory entry is marked live, so a failed insert is never
    /// visible to readers.
    pub fn insert<T: Element>(&mut self, key: &str, values: &[T]) -> Result<(), StoreError> {
        let key_bytes = validate_key(key)?;
        let bytes = values
            .len()
            .checked_mul(size_of::<T>())
            .ok_or(StoreError::ArenaFull {
                requested: usize::MAX,
                available: 0,
            })?;

        let _guard = self.lock();

        if let Some(idx) = self.find(key_bytes) {
            let stored = self.kind_at(idx)?;
            return Err(StoreError::DuplicateKey {
                key: key.to_string(),
                stored,
            });
        }

        let slot = (0..DIRECTORY_SLOTS)
            .find(|&i| !self.entry(i).is_live())
            .ok_or(StoreError::DirectoryFull {
                slots: DIRECTORY_SLOTS,
            })?;

        let offset = if bytes == 0 {
            0
        } else {
            let mut heap = self.heap();
            match heap.alloc(bytes).map_err(|r| self.corrupt(r))? {
                Some(offset) => offset,
                None => {
                    let available = heap.largest_free().map_err(|r| self.corrupt(r))?;
                    return Err(StoreError::ArenaFull {
                        requested: bytes,
                        available,
                    });
                }
            }
        };

        // SAFETY: `offset..offset + bytes` was just reserved inside the heap,
        // and `slot` is a free entry; both are covered by the arena lock.
        unsafe {
            ptr::copy_nonoverlapping(
                values.as_ptr() as *const u8,
                self.segment.as_ptr().add(offset),
                bytes,
            );
            let e = &mut *self.entry_ptr(slot);
            e.kind = T::KIND as u32;
            e.set_key(key_bytes);
            e.offset = offset as u64;
            e.len = values.len() as u64;
            // Publish last.
            e.state = ENTRY_LIVE;
        }
        self.header().live.fetch_add(1, Ordering::AcqRel);

        debug!(store = self.name(), key, kind = %T::KIND, len = values.len(), "stored sequence");
        Ok(())
    }

    /// Remove and return the sequence under `key`.
    ///
    /// Returns `Ok(None)` when nothing is stored. A sequence of a different
    /// kind is reported as [`StoreError::KindMismatch`] and left in place.
    pub fn take<T: Element>(&mut self, key: &str) -> Result<Option<Vec<T>>, StoreError> {
        let key_bytes = validate_key(key)?;
        let _guard = self.lock();

        let Some(idx) = self.find(key_bytes) else {
            return Ok(None);
        };
        let found = self.kind_at(idx)?;
        if found != T::KIND {
            return Err(StoreError::KindMismatch {
                key: key.to_string(),
                expected: T::KIND,
                found,
            });
        }

        let values = self.copy_out::<T>(idx)?;
        self.release(idx)?;
        debug!(store = self.name(), key, kind = %found, len = values.len(), "took sequence");
        Ok(Some(values))
    }

    /// Like [`take`](Self::take), but uses the stored kind instead of a
    /// requested one.
    pub fn take_any(&mut self, key: &str) -> Result<Option<TensorData>, StoreError> {
        let key_bytes = validate_key(key)?;
        let _guard = self.lock();

        let Some(idx) = self.find(key_bytes) else {
            return Ok(None);
        };
        let data = match self.kind_at(idx)? {
            ElementKind::Int32 => TensorData::Int32(self.copy_out::<i32>(idx)?),
            ElementKind::Float32 => TensorData::Float32(self.copy_out::<f32>(idx)?),
        };
        self.release(idx)?;
        debug!(store = self.name(), key, dtype = %data.dtype(), len = data.len(), "took sequence");
        Ok(Some(data))
    }

    /// Metadata of the entry under `key`, without consuming it.
    pub fn peek(&self, key: &str) -> Result<Option<EntryInfo>, StoreError> {
        let key_bytes = validate_key(key)?;
        let _guard = self.lock();
        self.find(key_bytes).map(|idx| self.info_at(idx)).transpose()
    }

    pub fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.peek(key)?.is_some())
    }

    /// Snapshot of every live entry, in directory order.
    pub fn keys(&self) -> Result<Vec<EntryInfo>, StoreError> {
        let _guard = self.lock();
        (0..DIRECTORY_SLOTS)
            .filter(|&i| self.entry(i).is_live())
            .map(|i| self.info_at(i))
            .collect()
    }

    /// Payload bytes still available in the heap, summed over free blocks.
    pub fn free_bytes(&self) -> Result<usize, StoreError> {
        let _guard = self.lock();
        self.heap().free_bytes().map_err(|r| self.corrupt(r))
    }

    /// Drop the handle now. The owner unlinks the OS name whether or not
    /// values remain.
    pub fn close(self) {
        drop(self);
    }

    // ─── Internals (call with the arena lock held) ─────────────────────────

    #[inline(always)]
    fn header(&self) -> &ArenaHeader {
        // SAFETY: base points to a header validated in open_or_create/attach
        unsafe { &*(self.segment.as_ptr() as *const ArenaHeader) }
    }

    fn lock(&self) -> ArenaGuard<'_> {
        ArenaGuard::acquire(&self.header().lock)
    }

    #[inline(always)]
    fn entry_ptr(&self, idx: usize) -> *mut DirEntry {
        debug_assert!(idx < DIRECTORY_SLOTS);
        // SAFETY: the directory directly follows the header and idx is in range
        unsafe {
            let dir = self.segment.as_ptr().add(size_of::<ArenaHeader>()) as *mut DirEntry;
            dir.add(idx)
        }
    }

    #[inline(always)]
    fn entry(&self, idx: usize) -> &DirEntry {
        unsafe { &*self.entry_ptr(idx) }
    }

    fn heap(&self) -> Heap {
        // SAFETY: heap bounds come from the validated layout of this mapping
        unsafe { Heap::new(self.segment.as_ptr(), heap_start(), heap_end(self.capacity())) }
    }

    fn find(&self, key: &[u8]) -> Option<usize> {
        (0..DIRECTORY_SLOTS).find(|&i| {
            let e = self.entry(i);
            e.is_live() && e.key_bytes() == key
        })
    }

    fn corrupt(&self, reason: &'static str) -> StoreError {
        StoreError::Corrupt {
            name: self.name().to_string(),
            reason,
        }
    }

    fn kind_at(&self, idx: usize) -> Result<ElementKind, StoreError> {
        ElementKind::from_raw(self.entry(idx).kind).ok_or_else(|| self.corrupt("unknown element kind"))
    }

    fn info_at(&self, idx: usize) -> Result<EntryInfo, StoreError> {
        let e = self.entry(idx);
        Ok(EntryInfo {
            key: String::from_utf8_lossy(e.key_bytes()).into_owned(),
            kind: self.kind_at(idx)?,
            len: e.len as usize,
        })
    }

    fn copy_out<T: Element>(&self, idx: usize) -> Result<Vec<T>, StoreError> {
        let e = self.entry(idx);
        let len = e.len as usize;
        let offset = e.offset as usize;
        let bytes = len
            .checked_mul(size_of::<T>())
            .ok_or_else(|| self.corrupt("entry length overflows"))?;
        if bytes > 0 && (offset < heap_start() || offset + bytes > heap_end(self.capacity())) {
            return Err(self.corrupt("entry points outside the heap"));
        }

        let mut out = Vec::<T>::with_capacity(len);
        // SAFETY: source range checked above; `T: Element` accepts any bit pattern
        unsafe {
            ptr::copy_nonoverlapping(
                self.segment.as_ptr().add(offset) as *const u8,
                out.as_mut_ptr() as *mut u8,
                bytes,
            );
            out.set_len(len);
        }
        Ok(out)
    }

    fn release(&self, idx: usize) -> Result<(), StoreError> {
        let (offset, len) = {
            let e = self.entry(idx);
            (e.offset as usize, e.len)
        };
        if len > 0 {
            self.heap().free(offset).map_err(|r| self.corrupt(r))?;
        }
        // SAFETY: the entry is live and we hold the arena lock
        unsafe { (*self.entry_ptr(idx)).clear() };
        self.header().live.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }
}

impl Drop for NamedValueStore {
    fn drop(&mut self) {
        if !self.is_owner() {
            return;
        }
        let live = self.len();
        if live > 0 {
            warn!(name = self.name(), live, "closing store with unconsumed values");
        }
        debug!(name = self.name(), "closing named value store");
    }
}

impl std::fmt::Debug for NamedValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedValueStore")
            .field("name", &self.name())
            .field("capacity", &self.capacity())
            .field("owner", &self.is_owner())
            .field("live", &self.len())
            .finish()
    }
}

fn validate_key(key: &str) -> Result<&[u8], StoreError> {
    let invalid = |reason| StoreError::InvalidKey {
        key: key.to_string(),
        reason,
    };
    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(invalid("key is longer than 64 bytes"));
    }
    Ok(key.as_bytes())
}
