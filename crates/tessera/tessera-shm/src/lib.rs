//! Named POSIX shared-memory objects mapped read-write.
//!
//! A [`ShmSegment`] is either the *owner* of an OS name (it created the
//! object and unlinks the name when dropped) or an *attached* view of an
//! object someone else created (dropping it only unmaps).

mod error;

pub use error::ShmError;

use memmap2::MmapMut;
use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd};
use tracing::{debug, warn};

/// Longest name accepted after the leading `/` (`NAME_MAX` on Linux).
pub const MAX_NAME_LEN: usize = 255;

pub struct ShmSegment {
    _file: File,
    mmap: MmapMut,
    /// Start of the mapping, captured once while we hold `&mut mmap`.
    base: *mut u8,
    name: String,
    c_name: CString,
    owner: bool,
}

// The raw base pointer only aliases `mmap`, which is itself `Send`.
unsafe impl Send for ShmSegment {}

impl ShmSegment {
    /// Create a new object of `size_bytes`, map it read-write and zero it.
    ///
    /// An existing object under the same name is treated as a leftover from a
    /// process that died without cleaning up: it is unlinked and creation is
    /// retried once. The new segment owns the name.
    pub fn create(name: &str, size_bytes: usize) -> Result<Self, ShmError> {
        let (name, c_name) = os_name(name)?;
        if size_bytes == 0 {
            return Err(ShmError::InvalidSize { name, size: 0 });
        }

        let flags = libc::O_CREAT | libc::O_EXCL | libc::O_RDWR;
        let file = match shm_open(&c_name, flags) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!(%name, "stale shared memory object found, unlinking and recreating");
                match shm_unlink(&c_name) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(source) => return Err(ShmError::os("shm_unlink", &name, source)),
                }
                shm_open(&c_name, flags).map_err(|source| {
                    if source.kind() == io::ErrorKind::AlreadyExists {
                        ShmError::AlreadyExists { name: name.clone() }
                    } else {
                        ShmError::os("shm_open", &name, source)
                    }
                })?
            }
            Err(source) => return Err(ShmError::os("shm_open", &name, source)),
        };

        // From here on the name exists in the OS; every failure must unlink it.
        let mut mmap = match map_sized(&file, size_bytes) {
            Ok(mmap) => mmap,
            Err((op, source)) => {
                if let Err(e) = shm_unlink(&c_name) {
                    warn!(%name, error = %e, "failed to unlink partially created object");
                }
                return Err(ShmError::os(op, &name, source));
            }
        };
        mmap.fill(0);
        let base = mmap.as_mut_ptr();

        debug!(%name, size_bytes, "created shared memory object");
        Ok(Self {
            _file: file,
            mmap,
            base,
            name,
            c_name,
            owner: true,
        })
    }

    /// Attach to an existing object, mapping its current length.
    ///
    /// The returned segment never unlinks the name.
    pub fn open(name: &str) -> Result<Self, ShmError> {
        let (name, c_name) = os_name(name)?;
        let file = shm_open(&c_name, libc::O_RDWR).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ShmError::NotFound { name: name.clone() }
            } else {
                ShmError::os("shm_open", &name, source)
            }
        })?;

        let size = file
            .metadata()
            .map_err(|source| ShmError::os("fstat", &name, source))?
            .len();
        // The creator may not have sized the object yet.
        if size == 0 {
            return Err(ShmError::InvalidSize { name, size });
        }

        // SAFETY: the object is only ever accessed through raw pointers by
        // cooperating processes; no Rust reference outlives a single call.
        let mut mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|source| ShmError::os("mmap", &name, source))?;
        let base = mmap.as_mut_ptr();

        debug!(%name, size, "attached to shared memory object");
        Ok(Self {
            _file: file,
            mmap,
            base,
            name,
            c_name,
            owner: false,
        })
    }

    /// Remove an OS name. Existing mappings stay valid until unmapped.
    pub fn unlink(name: &str) -> Result<(), ShmError> {
        let (name, c_name) = os_name(name)?;
        shm_unlink(&c_name).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ShmError::NotFound { name: name.clone() }
            } else {
                ShmError::os("shm_unlink", &name, source)
            }
        })
    }

    /// Whether an object is currently registered under `name`.
    pub fn exists(name: &str) -> Result<bool, ShmError> {
        let (name, c_name) = os_name(name)?;
        match shm_open(&c_name, libc::O_RDONLY) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ShmError::os("shm_open", &name, source)),
        }
    }

    /// Canonical OS name, always with a leading `/`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Return raw pointer to start of the mapped object
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        match shm_unlink(&self.c_name) {
            Ok(()) => debug!(name = %self.name, "unlinked shared memory object"),
            // Someone already replaced or removed it; nothing left to clean.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(name = %self.name, error = %e, "failed to unlink shared memory object"),
        }
    }
}

impl std::fmt::Debug for ShmSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmSegment")
            .field("name", &self.name)
            .field("len", &self.mmap.len())
            .field("owner", &self.owner)
            .finish()
    }
}

/// Normalise a user-supplied name into the `/name` form `shm_open` expects.
fn os_name(name: &str) -> Result<(String, CString), ShmError> {
    let invalid = |reason| ShmError::InvalidName {
        name: name.to_string(),
        reason,
    };
    let bare = name.strip_prefix('/').unwrap_or(name);
    if bare.is_empty() {
        return Err(invalid("name is empty"));
    }
    if bare.contains('/') {
        return Err(invalid("name contains '/' after the leading slash"));
    }
    if bare.len() > MAX_NAME_LEN {
        return Err(invalid("name is too long"));
    }
    let canonical = format!("/{bare}");
    let c_name = CString::new(canonical.clone()).map_err(|_| invalid("name contains NUL"))?;
    Ok((canonical, c_name))
}

fn shm_open(name: &CString, flags: libc::c_int) -> io::Result<File> {
    let fd = unsafe { libc::shm_open(name.as_ptr(), flags, 0o600 as libc::mode_t) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: shm_open just handed us this descriptor and nobody else owns it
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    Ok(File::from(fd))
}

fn shm_unlink(name: &CString) -> io::Result<()> {
    if unsafe { libc::shm_unlink(name.as_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn map_sized(file: &File, size_bytes: usize) -> Result<MmapMut, (&'static str, io::Error)> {
    file.set_len(size_bytes as u64)
        .map_err(|e| ("ftruncate", e))?;
    // SAFETY: we just created and sized the object; see `open` for aliasing rules.
    unsafe { MmapMut::map_mut(file) }.map_err(|e| ("mmap", e))
}
