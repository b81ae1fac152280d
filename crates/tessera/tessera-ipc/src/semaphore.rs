//! Counting semaphore living in its own named shared-memory region.
//!
//! The region is exactly `size_of::<sem_t>()` bytes. The creating process
//! runs `sem_init` once with `pshared = 1`; every other process attaches and
//! uses the already-initialised object in place. The handle keeps only the
//! mapping and re-derives the `sem_t` pointer from its base on every call.

use crate::error::SemaphoreError;
use std::io;
use std::mem::size_of;
use std::time::Duration;
use tessera_shm::ShmSegment;
use tracing::{debug, error};

pub struct SharedSemaphore {
    region: ShmSegment,
}

impl SharedSemaphore {
    /// Create the region under `name` and initialise the semaphore with
    /// `initial_count`. The returned handle owns the name.
    pub fn create(name: &str, initial_count: u32) -> Result<Self, SemaphoreError> {
        let region = ShmSegment::create(name, size_of::<libc::sem_t>()).inspect_err(
            |e| error!(name, error = %e, "failed to create semaphore region"),
        )?;

        // SAFETY: the region is fresh, zeroed and sized for one sem_t
        let rc = unsafe { libc::sem_init(region.as_ptr() as *mut libc::sem_t, 1, initial_count) };
        if rc != 0 {
            let source = io::Error::last_os_error();
            error!(name = region.name(), error = %source, "sem_init failed");
            // `region` drops here and unlinks the name.
            return Err(SemaphoreError::Os {
                op: "sem_init",
                name: region.name().to_string(),
                source,
            });
        }

        debug!(name = region.name(), initial_count, "created shared semaphore");
        Ok(Self { region })
    }

    /// Attach to a semaphore created by another process. The initializer is
    /// never run again.
    pub fn attach(name: &str) -> Result<Self, SemaphoreError> {
        let region = ShmSegment::open(name)?;
        let expected = size_of::<libc::sem_t>();
        if region.len() < expected {
            return Err(SemaphoreError::RegionSize {
                name: region.name().to_string(),
                expected,
                found: region.len(),
            });
        }
        debug!(name = region.name(), "attached shared semaphore");
        Ok(Self { region })
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }

    pub fn is_owner(&self) -> bool {
        self.region.is_owner()
    }

    #[inline(always)]
    fn sem(&self) -> *mut libc::sem_t {
        self.region.as_ptr() as *mut libc::sem_t
    }

    /// Increment the count, waking one blocked waiter if any.
    pub fn post(&self) -> Result<(), SemaphoreError> {
        if unsafe { libc::sem_post(self.sem()) } != 0 {
            return Err(self.os_error("sem_post"));
        }
        Ok(())
    }

    /// Block until the count is positive, then decrement it.
    pub fn wait(&self) -> Result<(), SemaphoreError> {
        loop {
            if unsafe { libc::sem_wait(self.sem()) } == 0 {
                return Ok(());
            }
            let source = io::Error::last_os_error();
            if source.kind() != io::ErrorKind::Interrupted {
                return Err(self.wrap("sem_wait", source));
            }
        }
    }

    /// Decrement if the count is positive. Returns `false` instead of
    /// blocking.
    pub fn try_wait(&self) -> Result<bool, SemaphoreError> {
        loop {
            if unsafe { libc::sem_trywait(self.sem()) } == 0 {
                return Ok(true);
            }
            let source = io::Error::last_os_error();
            match source.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(self.wrap("sem_trywait", source)),
            }
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning
    /// `false`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, SemaphoreError> {
        let deadline = realtime_deadline(timeout);
        loop {
            if unsafe { libc::sem_timedwait(self.sem(), &deadline) } == 0 {
                return Ok(true);
            }
            let source = io::Error::last_os_error();
            match source.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(self.wrap("sem_timedwait", source)),
            }
        }
    }

    /// Current count. Racy by nature; useful for diagnostics and tests.
    pub fn value(&self) -> Result<i32, SemaphoreError> {
        let mut value: libc::c_int = 0;
        if unsafe { libc::sem_getvalue(self.sem(), &mut value) } != 0 {
            return Err(self.os_error("sem_getvalue"));
        }
        Ok(value)
    }

    fn os_error(&self, op: &'static str) -> SemaphoreError {
        self.wrap(op, io::Error::last_os_error())
    }

    fn wrap(&self, op: &'static str, source: io::Error) -> SemaphoreError {
        SemaphoreError::Os {
            op,
            name: self.name().to_string(),
            source,
        }
    }
}

impl std::fmt::Debug for SharedSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSemaphore")
            .field("name", &self.name())
            .field("owner", &self.is_owner())
            .finish()
    }
}

/// Absolute `CLOCK_REALTIME` time `timeout` from now, as `sem_timedwait` wants.
fn realtime_deadline(timeout: Duration) -> libc::timespec {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut now);
    }
    let mut tv_sec = now
        .tv_sec
        .saturating_add(timeout.as_secs().min(i32::MAX as u64) as libc::time_t);
    let mut tv_nsec = now.tv_nsec + timeout.subsec_nanos() as libc::c_long;
    if tv_nsec >= 1_000_000_000 {
        tv_sec = tv_sec.saturating_add(1);
        tv_nsec -= 1_000_000_000;
    }
    libc::timespec { tv_sec, tv_nsec }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(label: &str) -> String {
        format!("/tessera_sem_{label}_{}", std::process::id())
    }

    #[test]
    fn initial_count_is_honoured() {
        let sem = SharedSemaphore::create(&unique("initial"), 2).unwrap();
        assert_eq!(sem.value().unwrap(), 2);
        assert!(sem.try_wait().unwrap());
        assert!(sem.try_wait().unwrap());
        assert!(!sem.try_wait().unwrap());
    }

    #[test]
    fn attach_does_not_reinitialise() {
        let name = unique("attach");
        let owner = SharedSemaphore::create(&name, 0).unwrap();
        owner.post().unwrap();
        owner.post().unwrap();

        let peer = SharedSemaphore::attach(&name).unwrap();
        assert!(!peer.is_owner());
        assert_eq!(peer.value().unwrap(), 2);
        peer.wait().unwrap();
        assert_eq!(owner.value().unwrap(), 1);
    }

    #[test]
    fn wait_timeout_expires_without_post() {
        let sem = SharedSemaphore::create(&unique("timeout"), 0).unwrap();
        let start = std::time::Instant::now();
        assert!(!sem.wait_timeout(Duration::from_millis(50)).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(40));

        sem.post().unwrap();
        assert!(sem.wait_timeout(Duration::from_millis(50)).unwrap());
    }

    #[test]
    fn deadline_normalises_nanoseconds() {
        let d = realtime_deadline(Duration::from_nanos(999_999_999));
        assert!(d.tv_nsec < 1_000_000_000);
    }

    #[test]
    fn attach_missing_region_fails() {
        let err = SharedSemaphore::attach(&unique("missing")).unwrap_err();
        assert!(matches!(
            err,
            SemaphoreError::Shm(tessera_shm::ShmError::NotFound { .. })
        ));
    }
}
