//! Storage abstraction layer for Strata.
//!
//! Segment blobs, tombstone files and index metadata are read and written
//! through the [`Storage`] trait, so file and memory backends can be swapped
//! without touching the index or the writer.
//!
//! # Storage Types
//!
//! ## FileStorage
//! - Disk-based persistent storage rooted at one directory
//! - Configurable buffering and syncing
//!
//! ## MemoryStorage
//! - In-memory storage for testing and temporary indexes
//! - Fast but non-persistent
//!
//! # Example
//!
//! ```
//! use strata::storage::{Storage, StorageConfig, StorageFactory};
//! use strata::storage::memory::MemoryStorageConfig;
//!
//! # fn main() -> strata::error::Result<()> {
//! let storage = StorageFactory::create(StorageConfig::Memory(MemoryStorageConfig::default()))?;
//! storage.write_file_atomic("meta.json", b"{}")?;
//! assert_eq!(storage.read_file("meta.json")?, b"{}");
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::{Result, StrataError};

pub mod file;
pub mod memory;

/// Suffix of files that are still being written.
pub const TEMP_SUFFIX: &str = ".tmp";

/// A trait for storage backends that can store and retrieve data.
///
/// Names are flat and relative to the storage root.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open an existing file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create a file for writing, truncating any existing content.
    ///
    /// The content becomes visible once the output is closed.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file. Deleting a missing file succeeds.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all files in the storage, sorted by name.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Get the size of a file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Rename a file, replacing any file already at `new_name`.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Sync all pending writes to storage.
    fn sync(&self) -> Result<()>;

    /// Read a whole file into memory.
    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let mut input = self.open_input(name)?;
        let mut bytes = Vec::with_capacity(input.size()? as usize);
        input.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Write a whole file under a temporary name and rename it into place.
    ///
    /// A failed write never leaves a partial file under `name`.
    fn write_file_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let temp_name = format!("{name}{TEMP_SUFFIX}");
        let written = (|| {
            let mut output = self.create_output(&temp_name)?;
            output.write_all(bytes)?;
            output.flush_and_sync()?;
            output.close()
        })();

        if let Err(e) = written {
            let _ = self.delete_file(&temp_name);
            return Err(e);
        }

        self.rename_file(&temp_name, name)
    }
}

/// A trait for reading data from storage.
pub trait StorageInput: Read + Send + std::fmt::Debug {
    /// Get the size of the input stream.
    fn size(&self) -> Result<u64>;
}

/// A trait for writing data to storage.
pub trait StorageOutput: Write + Send + std::fmt::Debug {
    /// Flush and sync the output to storage.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Get the number of bytes written so far.
    fn position(&self) -> u64;

    /// Close the output stream and publish its content.
    fn close(&mut self) -> Result<()>;
}

/// Configuration for storage backends.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// File-based storage configuration (includes path)
    File(file::FileStorageConfig),

    /// Memory-based storage configuration
    Memory(memory::MemoryStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(memory::MemoryStorageConfig::default())
    }
}

/// A factory for creating storage instances.
pub struct StorageFactory;

impl StorageFactory {
    /// Create a new storage instance with the given configuration.
    pub fn create(config: StorageConfig) -> Result<Arc<dyn Storage>> {
        match config {
            StorageConfig::Memory(mem_config) => {
                let storage = memory::MemoryStorage::new(mem_config);
                Ok(Arc::new(storage))
            }
            StorageConfig::File(file_config) => {
                let storage = file::FileStorage::new(file_config)?;
                Ok(Arc::new(storage))
            }
        }
    }
}

/// Error types specific to storage operations.
#[derive(Debug, Clone)]
pub enum StorageError {
    /// File not found.
    FileNotFound(String),

    /// I/O error.
    IoError(String),

    /// Output already closed.
    OutputClosed(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::FileNotFound(name) => write!(f, "File not found: {name}"),
            StorageError::IoError(msg) => write!(f, "I/O error: {msg}"),
            StorageError::OutputClosed(name) => write!(f, "Output is closed: {name}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for StrataError {
    fn from(err: StorageError) -> Self {
        StrataError::storage(err.to_string())
    }
}
