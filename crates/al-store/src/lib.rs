pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn error_code(&self) -> &'static str {
        match self {
            StoreError::Sqlite(_) => "STORE_SQLITE_ERROR",
            StoreError::Io(_) => "STORE_IO_ERROR",
            StoreError::Poisoned => "STORE_POISONED",
        }
    }
}

/// Opaque key/value storage. Only the session cache talks to it.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    /// Deleting a key that does not exist is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}
