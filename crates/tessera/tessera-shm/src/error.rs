use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("invalid shared memory name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("invalid size {size} for shared memory object '{name}'")]
    InvalidSize { name: String, size: u64 },

    #[error("shared memory object '{name}' still exists after removing a stale copy")]
    AlreadyExists { name: String },

    #[error("shared memory object '{name}' does not exist")]
    NotFound { name: String },

    #[error("{op} failed for '{name}'")]
    Os {
        op: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },
}

impl ShmError {
    pub(crate) fn os(op: &'static str, name: &str, source: io::Error) -> Self {
        ShmError::Os {
            op,
            name: name.to_string(),
            source,
        }
    }
}
