//! In-memory storage implementation for testing and temporary segments.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::storage::traits::{Storage, StorageConfig, StorageError, StorageInput, StorageOutput};

/// An in-memory storage implementation.
///
/// Useful for tests and for building short-lived segments without touching
/// the file system. Finished files are kept as `Arc<[u8]>` so inputs and
/// their clones share one buffer.
#[derive(Debug)]
pub struct MemoryStorage {
    /// The files stored in memory.
    files: Arc<RwLock<HashMap<String, Arc<[u8]>>>>,
    /// Storage configuration.
    #[allow(dead_code)]
    config: StorageConfig,
}

impl MemoryStorage {
    /// Create a new memory storage.
    pub fn new(config: StorageConfig) -> Self {
        MemoryStorage {
            files: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Create a new memory storage with default configuration.
    pub fn new_default() -> Self {
        Self::new(StorageConfig::default())
    }

    /// Get the number of files stored.
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    /// Get the total size of all files.
    pub fn total_size(&self) -> u64 {
        self.files.read().values().map(|d| d.len() as u64).sum()
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let files = self.files.read();
        let data = files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;

        Ok(Box::new(MemoryInput::new(Arc::clone(data))))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Ok(Box::new(MemoryOutput::new(
            name.to_string(),
            Arc::clone(&self.files),
        )))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files.write().remove(name);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let files = self.files.read();
        let data = files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;
        Ok(data.len() as u64)
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut files = self.files.write();
        let data = files
            .remove(old_name)
            .ok_or_else(|| StorageError::FileNotFound(old_name.to_string()))?;
        files.insert(new_name.to_string(), data);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// An in-memory input stream over a shared buffer.
#[derive(Debug)]
pub struct MemoryInput {
    data: Arc<[u8]>,
    position: u64,
}

impl MemoryInput {
    /// Create an input over the given buffer.
    pub fn new(data: Arc<[u8]>) -> Self {
        MemoryInput { data, position: 0 }
    }

    /// Create an input over an owned byte vector.
    pub fn from_vec(data: Vec<u8>) -> Self {
        MemoryInput {
            data: Arc::from(data),
            position: 0,
        }
    }
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let pos = self.position.min(self.data.len() as u64) as usize;
        let remaining = &self.data[pos..];
        let n = buf.len().min(remaining.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for MemoryInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.data.len() as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };

        if new_pos < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }

        self.position = new_pos as u64;
        Ok(self.position)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        Ok(Box::new(MemoryInput::new(Arc::clone(&self.data))))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// An in-memory output stream. The file becomes visible in the storage map
/// on every flush and on close.
#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    files: Arc<RwLock<HashMap<String, Arc<[u8]>>>>,
    buffer: Vec<u8>,
    position: u64,
}

impl MemoryOutput {
    fn new(name: String, files: Arc<RwLock<HashMap<String, Arc<[u8]>>>>) -> Self {
        MemoryOutput {
            name,
            files,
            buffer: Vec::new(),
            position: 0,
        }
    }

    fn publish(&self) {
        self.files
            .write()
            .insert(self.name.clone(), Arc::from(self.buffer.as_slice()));
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let pos = self.position as usize;
        if pos + buf.len() > self.buffer.len() {
            self.buffer.resize(pos + buf.len(), 0);
        }
        self.buffer[pos..pos + buf.len()].copy_from_slice(buf);
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.publish();
        Ok(())
    }
}

impl Seek for MemoryOutput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.buffer.len() as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };

        if new_pos < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }

        self.position = new_pos as u64;
        Ok(self.position)
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.publish();
        Ok(())
    }

    fn position(&self) -> Result<u64> {
        Ok(self.position)
    }

    fn close(&mut self) -> Result<()> {
        self.publish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_round_trip() {
        let storage = MemoryStorage::new_default();

        {
            let mut output = storage.create_output("a.bin").unwrap();
            output.write_all(b"segment bytes").unwrap();
            output.close().unwrap();
        }

        assert!(storage.file_exists("a.bin"));
        assert_eq!(storage.file_size("a.bin").unwrap(), 13);
        assert_eq!(storage.file_count(), 1);

        let mut input = storage.open_input("a.bin").unwrap();
        let mut buf = Vec::new();
        input.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"segment bytes");
    }

    #[test]
    fn test_memory_input_seek_and_clone() {
        let storage = MemoryStorage::new_default();

        {
            let mut output = storage.create_output("b.bin").unwrap();
            output.write_all(b"0123456789").unwrap();
            output.close().unwrap();
        }

        let mut input = storage.open_input("b.bin").unwrap();
        input.seek(SeekFrom::Start(5)).unwrap();

        let clone = input.clone_input().unwrap();
        let mut clone = clone;
        let mut head = [0u8; 2];
        clone.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"01");

        let mut tail = [0u8; 5];
        input.read_exact(&mut tail).unwrap();
        assert_eq!(&tail, b"56789");
    }

    #[test]
    fn test_rename_and_missing_file() {
        let storage = MemoryStorage::new_default();

        {
            let mut output = storage.create_output("old.bin").unwrap();
            output.write_all(b"x").unwrap();
            output.close().unwrap();
        }

        storage.rename_file("old.bin", "new.bin").unwrap();
        assert!(!storage.file_exists("old.bin"));
        assert!(storage.file_exists("new.bin"));

        assert!(storage.open_input("absent.bin").is_err());
    }
}
