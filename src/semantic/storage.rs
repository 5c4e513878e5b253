//! Binary storage for the vector index.
//!
//! File format: index.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model identifier)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - id_len: u16, id: utf-8 bytes
//! - embedding: [f32; dimensions] (little-endian)
//! - doc_len: u32, document: utf-8 bytes
//! - meta_len: u32, metadata: JSON bytes

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::semantic::index::IndexEntry;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    #[error("version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("model mismatch: file was written by a different embedding model")]
    ModelMismatch,

    #[error("checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Storage manager for the on-disk index.
pub struct IndexFile {
    path: PathBuf,
    model_id: [u8; 32],
}

impl IndexFile {
    pub fn new(path: PathBuf, model_id: &str) -> Self {
        Self {
            path,
            model_id: hash_model_id(model_id),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load all entries, validating model identity and dimensions.
    pub fn load(
        &self,
        expected_dimensions: usize,
    ) -> Result<HashMap<String, IndexEntry>, StorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = self.read_header(&mut reader)?;

        if header.model_id != self.model_id {
            return Err(StorageError::ModelMismatch);
        }

        if header.dimensions as usize != expected_dimensions {
            return Err(StorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        let mut entries = HashMap::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let (id, entry) = read_entry(&mut reader, header.dimensions as usize)?;
            entries.insert(id, entry);
        }

        Ok(entries)
    }

    /// Save all entries atomically: temp file -> fsync -> rename.
    pub fn save(
        &self,
        entries: &HashMap<String, IndexEntry>,
        dimensions: usize,
    ) -> Result<(), StorageError> {
        let temp_path = self.path.with_extension("tmp");

        let result = self.write_to_file(&temp_path, entries, dimensions);

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    fn write_to_file(
        &self,
        path: &Path,
        entries: &HashMap<String, IndexEntry>,
        dimensions: usize,
    ) -> Result<(), StorageError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        self.write_header(&mut writer, entries.len() as u64, dimensions)?;

        for (id, entry) in entries {
            write_entry(&mut writer, id, entry)?;
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        file.sync_all()?;

        Ok(())
    }

    fn write_header(
        &self,
        writer: &mut BufWriter<File>,
        entry_count: u64,
        dimensions: usize,
    ) -> Result<(), StorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = FORMAT_VERSION;
        header_bytes[1..33].copy_from_slice(&self.model_id);
        header_bytes[33..35].copy_from_slice(&(dimensions as u16).to_le_bytes());
        header_bytes[35..43].copy_from_slice(&entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&header_bytes[0..43]);
        header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

        writer.write_all(&header_bytes)?;
        Ok(())
    }

    fn read_header(&self, reader: &mut BufReader<File>) -> Result<Header, StorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes)?;

        let version = header_bytes[0];

        // Version check first
        if version > FORMAT_VERSION {
            return Err(StorageError::VersionMismatch(version, FORMAT_VERSION));
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&header_bytes[1..33]);

        let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);
        let entry_count = u64::from_le_bytes(
            header_bytes[35..43]
                .try_into()
                .expect("slice has fixed length"),
        );
        let stored_checksum = u32::from_le_bytes(
            header_bytes[43..47]
                .try_into()
                .expect("slice has fixed length"),
        );

        let computed_checksum = crc32fast::hash(&header_bytes[0..43]);
        if stored_checksum != computed_checksum {
            return Err(StorageError::ChecksumMismatch);
        }

        Ok(Header {
            model_id,
            dimensions,
            entry_count,
        })
    }
}

/// SHA256 of the model identifier, stored in the header so a model switch
/// invalidates the file instead of silently mixing vector spaces.
fn hash_model_id(model_id: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.finalize().into()
}

struct Header {
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

fn read_entry(
    reader: &mut BufReader<File>,
    dimensions: usize,
) -> Result<(String, IndexEntry), StorageError> {
    let id = read_string_u16(reader)?;

    let mut vector = Vec::with_capacity(dimensions);
    let mut float_bytes = [0u8; 4];
    for _ in 0..dimensions {
        reader.read_exact(&mut float_bytes)?;
        vector.push(f32::from_le_bytes(float_bytes));
    }

    let document = read_string_u32(reader)?;

    let metadata_json = read_string_u32(reader)?;
    let metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| StorageError::InvalidFormat(format!("bad metadata block: {e}")))?;

    Ok((
        id,
        IndexEntry {
            vector,
            document,
            metadata,
        },
    ))
}

fn write_entry(
    writer: &mut BufWriter<File>,
    id: &str,
    entry: &IndexEntry,
) -> Result<(), StorageError> {
    write_string_u16(writer, id)?;

    for &value in &entry.vector {
        writer.write_all(&value.to_le_bytes())?;
    }

    write_string_u32(writer, &entry.document)?;

    let metadata_json = serde_json::to_string(&entry.metadata)
        .map_err(|e| StorageError::InvalidFormat(format!("unserializable metadata: {e}")))?;
    write_string_u32(writer, &metadata_json)?;

    Ok(())
}

fn read_string_u16(reader: &mut BufReader<File>) -> Result<String, StorageError> {
    let mut len_bytes = [0u8; 2];
    reader.read_exact(&mut len_bytes)?;
    read_utf8(reader, u16::from_le_bytes(len_bytes) as usize)
}

fn read_string_u32(reader: &mut BufReader<File>) -> Result<String, StorageError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    read_utf8(reader, u32::from_le_bytes(len_bytes) as usize)
}

fn read_utf8(reader: &mut BufReader<File>, len: usize) -> Result<String, StorageError> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| StorageError::InvalidFormat(format!("bad utf-8: {e}")))
}

fn write_string_u16(writer: &mut BufWriter<File>, value: &str) -> Result<(), StorageError> {
    let len = u16::try_from(value.len())
        .map_err(|_| StorageError::InvalidFormat(format!("id too long: {} bytes", value.len())))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn write_string_u32(writer: &mut BufWriter<File>, value: &str) -> Result<(), StorageError> {
    let len = u32::try_from(value.len()).map_err(|_| {
        StorageError::InvalidFormat(format!("field too long: {} bytes", value.len()))
    })?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::index::EntryMetadata;

    fn entry(id: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            vector,
            document: format!("document for {id}"),
            metadata: EntryMetadata {
                name: id.to_string(),
                template_id: id.to_string(),
                text_zones: 2,
                added_at: None,
                added_at_ts: None,
                config_json: "{}".to_string(),
            },
        }
    }

    fn temp_file(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("index.bin")
    }

    #[test]
    fn test_save_and_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = IndexFile::new(temp_file(&dir), "model-x");

        file.save(&HashMap::new(), 4).unwrap();
        assert!(file.exists());

        let loaded = file.load(4).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = IndexFile::new(temp_file(&dir), "model-x");

        let mut entries = HashMap::new();
        entries.insert("drake".to_string(), entry("drake", vec![1.0, 0.0, 0.5]));
        entries.insert("fry".to_string(), entry("fry", vec![0.0, 1.0, -0.5]));

        file.save(&entries, 3).unwrap();

        let loaded = file.load(3).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["drake"].vector, vec![1.0, 0.0, 0.5]);
        assert_eq!(loaded["drake"].document, "document for drake");
        assert_eq!(loaded["fry"].metadata.template_id, "fry");
    }

    #[test]
    fn test_model_mismatch() {
        let dir = tempfile::tempdir().unwrap();

        let writer = IndexFile::new(temp_file(&dir), "model-a");
        writer.save(&HashMap::new(), 3).unwrap();

        let reader = IndexFile::new(temp_file(&dir), "model-b");
        let result = reader.load(3);
        assert!(matches!(result, Err(StorageError::ModelMismatch)));
    }

    #[test]
    fn test_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let file = IndexFile::new(temp_file(&dir), "model-x");

        file.save(&HashMap::new(), 3).unwrap();

        let result = file.load(1024);
        assert!(matches!(result, Err(StorageError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let file = IndexFile::new(temp_file(&dir), "model-x");

        let mut entries = HashMap::new();
        entries.insert("x".to_string(), entry("x", vec![1.0, 0.0, 0.0]));
        file.save(&entries, 3).unwrap();

        // flip a byte inside the header
        let mut raw = std::fs::read(file.path()).unwrap();
        raw[10] ^= 0xFF;
        std::fs::write(file.path(), &raw).unwrap();

        let result = file.load(3);
        assert!(matches!(result, Err(StorageError::ChecksumMismatch)));
    }

    #[test]
    fn test_atomic_save_cleans_up_on_error() {
        let path = PathBuf::from("/nonexistent/directory/index.bin");
        let file = IndexFile::new(path.clone(), "model-x");

        let result = file.save(&HashMap::new(), 3);
        assert!(result.is_err());
        assert!(!path.with_extension("tmp").exists());
    }
}
