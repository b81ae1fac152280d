use crate::element::ElementKind;
use std::io;
use tessera_shm::ShmError;
use tessera_tensor::{DType, Device};

/// Broad category of a [`StoreError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself is wrong; retrying it unchanged cannot succeed
    /// (except `DuplicateKey`, which clears once the receiver consumes).
    Validation,
    /// The arena or the OS could not satisfy a valid request.
    Resource,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("key '{key}' already holds an unconsumed {stored} sequence")]
    DuplicateKey { key: String, stored: ElementKind },

    #[error("key '{key}' holds {found} data, requested {expected}")]
    KindMismatch {
        key: String,
        expected: ElementKind,
        found: ElementKind,
    },

    #[error("unsupported element type {0}, expected int32 or float32")]
    UnsupportedKind(DType),

    #[error("expected a 1-D tensor, got {ndim} dimensions")]
    Dimensionality { ndim: usize },

    #[error("tensor lives on {device}, expected host memory")]
    NotHostResident { device: Device },

    #[error("arena capacity {capacity} bytes is below the minimum of {minimum}")]
    InvalidCapacity { capacity: usize, minimum: usize },

    #[error("arena full: need {requested} bytes, largest free block holds {available}")]
    ArenaFull { requested: usize, available: usize },

    #[error("directory full: {slots} keys already live")]
    DirectoryFull { slots: usize },

    #[error("arena '{name}' is corrupt: {reason}")]
    Corrupt { name: String, reason: &'static str },

    #[error(transparent)]
    Shm(#[from] ShmError),
}

impl StoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::InvalidKey { .. }
            | StoreError::DuplicateKey { .. }
            | StoreError::KindMismatch { .. }
            | StoreError::UnsupportedKind(_)
            | StoreError::Dimensionality { .. }
            | StoreError::NotHostResident { .. }
            | StoreError::InvalidCapacity { .. } => ErrorClass::Validation,
            StoreError::ArenaFull { .. }
            | StoreError::DirectoryFull { .. }
            | StoreError::Corrupt { .. }
            | StoreError::Shm(_) => ErrorClass::Resource,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SemaphoreError {
    #[error(transparent)]
    Shm(#[from] ShmError),

    #[error("semaphore region '{name}' is {found} bytes, expected at least {expected}")]
    RegionSize {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("{op} failed on semaphore '{name}'")]
    Os {
        op: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },
}
