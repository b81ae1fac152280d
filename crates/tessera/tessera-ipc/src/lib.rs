mod channel;
mod element;
mod error;
mod heap;
mod semaphore;
mod shm_layout;
mod store;

pub use channel::TensorChannel;
pub use element::{Element, ElementKind};
pub use error::{ErrorClass, SemaphoreError, StoreError};
pub use semaphore::SharedSemaphore;
pub use shm_layout::{DEFAULT_CAPACITY, DIRECTORY_SLOTS, MAX_KEY_LEN, min_capacity};
pub use store::{EntryInfo, NamedValueStore};
