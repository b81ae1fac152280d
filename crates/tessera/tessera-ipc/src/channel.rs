//! Tensor send/receive over a [`NamedValueStore`].
//!
//! A channel moves 1-D host tensors of `int32` or `float32` through named
//! keys. Each key holds at most one value in flight: `send` refuses an
//! occupied key and `receive` frees the key again.
//!
//! Typical hand-off, one semaphore per direction:
//!
//! ```text
//!  producer                               consumer
//!  ────────                               ────────
//!  send("obs", x)
//!  ready.post()  ───────────────────────▶ ready.wait()
//!                                         receive("obs") -> Some(x)
//!                                         send("action", a)
//!  free.wait()   ◀─────────────────────── free.post()
//!  receive("action") -> Some(a)
//! ```

use crate::element::Element;
use crate::error::{ErrorClass, StoreError};
use crate::store::{EntryInfo, NamedValueStore};
use tessera_tensor::{Tensor, TensorData};
use tracing::{error, warn};

pub struct TensorChannel {
    store: NamedValueStore,
}

impl TensorChannel {
    /// Create the arena backing this channel. See
    /// [`NamedValueStore::open_or_create`].
    pub fn create(name: &str, capacity: usize) -> Result<Self, StoreError> {
        NamedValueStore::open_or_create(name, capacity)
            .map(Self::from_store)
            .inspect_err(|e| error!(name, error = %e, "failed to create channel arena"))
    }

    /// Attach to an arena created by the peer.
    pub fn attach(name: &str) -> Result<Self, StoreError> {
        NamedValueStore::attach(name).map(Self::from_store)
    }

    pub fn from_store(store: NamedValueStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &NamedValueStore {
        &self.store
    }

    pub fn into_store(self) -> NamedValueStore {
        self.store
    }

    /// Send `values` under `key`.
    ///
    /// [`StoreError::DuplicateKey`] means the previous value under `key` has
    /// not been received yet; wait for the peer and try again.
    pub fn send<T: Element>(&mut self, key: &str, values: &[T]) -> Result<(), StoreError> {
        self.store
            .insert(key, values)
            .inspect_err(|e| self.log_failure("send", key, e))
    }

    /// Validate a tensor and send its data under `key`.
    ///
    /// The tensor must live in host memory, have exactly one dimension and
    /// hold `int32` or `float32` elements. Checks run before the arena is
    /// touched.
    pub fn send_tensor(&mut self, key: &str, tensor: &Tensor) -> Result<(), StoreError> {
        if !tensor.is_host() {
            return Err(StoreError::NotHostResident {
                device: tensor.device(),
            });
        }
        if tensor.ndim() != 1 {
            return Err(StoreError::Dimensionality {
                ndim: tensor.ndim(),
            });
        }
        match tensor.data() {
            TensorData::Int32(values) => self.send(key, values.as_slice()),
            TensorData::Float32(values) => self.send(key, values.as_slice()),
            other => Err(StoreError::UnsupportedKind(other.dtype())),
        }
    }

    /// Receive and consume the value under `key`.
    ///
    /// `Ok(None)` means nothing has been sent yet. Errors are real failures
    /// (wrong kind, corrupt arena), never "not ready".
    pub fn receive<T: Element>(&mut self, key: &str) -> Result<Option<Vec<T>>, StoreError> {
        self.store
            .take(key)
            .inspect_err(|e| self.log_failure("receive", key, e))
    }

    /// Receive as a 1-D host tensor whose dtype comes from the stored entry.
    pub fn receive_tensor(&mut self, key: &str) -> Result<Option<Tensor>, StoreError> {
        self.store
            .take_any(key)
            .map(|data| data.map(Tensor::from_data))
            .inspect_err(|e| self.log_failure("receive", key, e))
    }

    /// Kind and length of the pending value under `key`, without consuming it.
    pub fn peek(&self, key: &str) -> Result<Option<EntryInfo>, StoreError> {
        self.store.peek(key)
    }

    fn log_failure(&self, op: &'static str, key: &str, e: &StoreError) {
        let name = self.store.name();
        match e.class() {
            ErrorClass::Validation => warn!(name, key, op, error = %e, "channel request rejected"),
            ErrorClass::Resource => error!(name, key, op, error = %e, "channel operation failed"),
        }
    }
}

impl std::fmt::Debug for TensorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorChannel")
            .field("store", &self.store)
            .finish()
    }
}
