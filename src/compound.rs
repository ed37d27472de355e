//! Compound segment container.
//!
//! Rolls a sealed segment's core files into one container file with an
//! internal directory, cutting the per-segment file-handle count. Member
//! offsets are recorded relative to the end of the directory, so the whole
//! file is written in a single forward pass and sealed with the same
//! checksum footer as every other file; the standalone members are only
//! deleted once the container is durable.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::segment::SegmentInfo;
use crate::storage::{Storage, StorageError, StorageInput, StorageOutput, StructReader, StructWriter};

const COMPOUND_MAGIC: u32 = 0x53_43_50_44; // "SCPD"
const COMPOUND_VERSION: u32 = 1;

/// Concatenate `files` into the segment's compound container and delete
/// the originals. The container is synced before any original is removed.
pub fn build_compound(storage: &dyn Storage, info: &SegmentInfo, files: &[String]) -> Result<()> {
    let output = storage.create_output(&info.compound_file())?;
    let mut writer = StructWriter::new(output);
    writer.write_header(COMPOUND_MAGIC, COMPOUND_VERSION, &info.id)?;

    // Directory first: offsets are relative to the end of the directory,
    // which makes them independent of the directory's own encoded size.
    writer.write_vint(files.len() as u32)?;
    let mut offset = 0u64;
    for file in files {
        let length = storage.file_size(file)?;
        writer.write_string(file)?;
        writer.write_vlong(offset)?;
        writer.write_vlong(length)?;
        offset += length;
    }

    for file in files {
        let mut input = storage.open_input(file)?;
        let mut buf = vec![0u8; 65536];
        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.write_raw(&buf[..n])?;
        }
        input.close()?;
    }

    // close() syncs; only then are the members safe to drop.
    writer.close()?;

    for file in files {
        if let Err(e) = storage.delete_file(file) {
            log::warn!("failed to delete compounded member {file}: {e}");
        }
    }
    Ok(())
}

/// Read-only view of a compound container that serves its members through
/// the [`Storage`] trait, so readers open a compound segment exactly like
/// a standalone one.
#[derive(Debug)]
pub struct CompoundStorage {
    base: Arc<dyn Storage>,
    file_name: String,
    /// Member name to (absolute offset, length).
    members: HashMap<String, (u64, u64)>,
}

impl CompoundStorage {
    /// Open the compound container of `info`.
    pub fn open(base: Arc<dyn Storage>, info: &SegmentInfo) -> Result<Self> {
        let file_name = info.compound_file();
        let input = base.open_input(&file_name)?;
        let mut reader = StructReader::new(input)?;
        let (_, segment_id) =
            reader.read_header(COMPOUND_MAGIC, COMPOUND_VERSION, COMPOUND_VERSION)?;
        if segment_id != info.id {
            return Err(StrataError::format(format!(
                "compound file belongs to segment {segment_id}, expected {}",
                info.id
            )));
        }

        let count = reader.read_vint()? as usize;
        let mut relative = Vec::with_capacity(count);
        for _ in 0..count {
            let name = reader.read_string()?;
            let offset = reader.read_vlong()?;
            let length = reader.read_vlong()?;
            relative.push((name, offset, length));
        }
        let data_start = reader.position();

        let mut members = HashMap::with_capacity(count);
        for (name, offset, length) in relative {
            members.insert(name, (data_start + offset, length));
        }

        Ok(CompoundStorage {
            base,
            file_name,
            members,
        })
    }

    fn read_only_error(&self) -> StrataError {
        StorageError::InvalidOperation(format!(
            "compound container {} is read-only",
            self.file_name
        ))
        .into()
    }
}

impl Storage for CompoundStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let &(offset, length) = self
            .members
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;
        let inner = self.base.open_input(&self.file_name)?;
        Ok(Box::new(SliceInput::new(inner, offset, length)?))
    }

    fn create_output(&self, _name: &str) -> Result<Box<dyn StorageOutput>> {
        Err(self.read_only_error())
    }

    fn file_exists(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    fn delete_file(&self, _name: &str) -> Result<()> {
        Err(self.read_only_error())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.members.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.members
            .get(name)
            .map(|&(_, length)| length)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()).into())
    }

    fn rename_file(&self, _old_name: &str, _new_name: &str) -> Result<()> {
        Err(self.read_only_error())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// A bounded window over another input, positioned independently.
#[derive(Debug)]
pub struct SliceInput {
    inner: Box<dyn StorageInput>,
    start: u64,
    length: u64,
    position: u64,
}

impl SliceInput {
    fn new(mut inner: Box<dyn StorageInput>, start: u64, length: u64) -> Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(SliceInput {
            inner,
            start,
            length,
            position: 0,
        })
    }
}

impl Read for SliceInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.length.saturating_sub(self.position);
        if remaining == 0 {
            return Ok(0);
        }
        let capped = buf.len().min(remaining as usize);
        let n = self.inner.read(&mut buf[..capped])?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for SliceInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.length as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of slice",
            ));
        }
        self.position = target as u64;
        self.inner.seek(SeekFrom::Start(self.start + self.position))?;
        Ok(self.position)
    }
}

impl StorageInput for SliceInput {
    fn size(&self) -> Result<u64> {
        Ok(self.length)
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        Ok(Box::new(SliceInput::new(
            self.inner.clone_input()?,
            self.start,
            self.length,
        )?))
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{verify_file_checksum, MemoryStorage, StorageConfig};
    use std::io::Write;

    fn storage_with_files(files: &[(&str, &[u8])]) -> MemoryStorage {
        let storage = MemoryStorage::new(StorageConfig::default());
        for (name, content) in files {
            let mut output = storage.create_output(name).unwrap();
            output.write_all(content).unwrap();
            output.close().unwrap();
        }
        storage
    }

    #[test]
    fn test_build_and_read_members() {
        let storage = Arc::new(storage_with_files(&[
            ("seg_c.fld", b"field data"),
            ("seg_c.sfd", b"stored stuff here"),
            ("seg_c.trm", b""),
        ]));
        let info = SegmentInfo::new("seg_c", 1);

        let files = vec![
            "seg_c.fld".to_string(),
            "seg_c.sfd".to_string(),
            "seg_c.trm".to_string(),
        ];
        build_compound(&*storage, &info, &files).unwrap();

        // Originals are gone, the container exists and passes its checksum.
        for file in &files {
            assert!(!storage.file_exists(file));
        }
        assert!(storage.file_exists("seg_c.cpd"));
        verify_file_checksum(storage.open_input("seg_c.cpd").unwrap()).unwrap();

        let compound = CompoundStorage::open(storage, &info).unwrap();
        assert_eq!(
            compound.list_files().unwrap(),
            vec!["seg_c.fld", "seg_c.sfd", "seg_c.trm"]
        );
        assert_eq!(compound.file_size("seg_c.sfd").unwrap(), 17);

        let mut input = compound.open_input("seg_c.sfd").unwrap();
        let mut content = Vec::new();
        input.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"stored stuff here");

        // Empty member.
        let mut input = compound.open_input("seg_c.trm").unwrap();
        let mut content = Vec::new();
        input.read_to_end(&mut content).unwrap();
        assert!(content.is_empty());

        assert!(compound.open_input("seg_c.missing").is_err());
        assert!(compound.create_output("x").is_err());
    }

    #[test]
    fn test_slice_input_seek_and_clone() {
        let storage = Arc::new(storage_with_files(&[
            ("a.bin", b"aaaa"),
            ("b.bin", b"0123456789"),
        ]));
        let info = SegmentInfo::new("seg_s", 1);
        build_compound(
            &*storage,
            &info,
            &["a.bin".to_string(), "b.bin".to_string()],
        )
        .unwrap();

        let compound = CompoundStorage::open(storage, &info).unwrap();
        let mut input = compound.open_input("b.bin").unwrap();
        assert_eq!(input.size().unwrap(), 10);

        input.seek(SeekFrom::Start(4)).unwrap();
        let clone = input.clone_input().unwrap();

        let mut rest = Vec::new();
        input.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"456789");

        let mut clone = clone;
        let mut head = [0u8; 3];
        clone.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"012");
    }
}
