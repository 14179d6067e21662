//! Optional on-disk form of a built document session.
//!
//! Two files per session directory:
//! - `vectors.bin`: the index entries
//! - `fragments.json`: the id-to-fragment map (serde, images base64)
//!
//! vectors.bin layout:
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of the embedding model version)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - fragment_id: u64 (little-endian)
//! - modality: u8 (0 = text, 1 = image)
//! - embedding: [f32; dimensions] (little-endian)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::embed::{model_id_hash, EmbeddingVector};
use crate::fragment::{FragmentStore, Modality};
use crate::index::{IndexError, SearchIndex};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

const VECTORS_FILE: &str = "vectors.bin";
const FRAGMENTS_FILE: &str = "fragments.json";

/// Errors that can occur during session storage operations.
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

    #[error("fragments file is malformed: {0}")]
    MalformedFragments(#[from] serde_json::Error),

    #[error("vectors and fragments describe different sessions: {0}")]
    InconsistentSession(String),

    #[error("stored index is inconsistent: {0}")]
    InconsistentIndex(#[from] IndexError),
}

/// Reads and writes one session's index + fragment store under a directory.
pub struct SessionStorage {
    dir: PathBuf,
}

impl SessionStorage {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn exists(&self) -> bool {
        self.dir.join(VECTORS_FILE).exists() && self.dir.join(FRAGMENTS_FILE).exists()
    }

    /// Persist a built session. Both files are written atomically
    /// (temp file + rename), so a crash never leaves a half-written session
    /// that `load` would accept.
    pub fn save(&self, index: &SearchIndex, store: &FragmentStore) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir)?;

        self.write_atomic(&self.dir.join(VECTORS_FILE), |path| {
            self.write_vectors(path, index)
        })?;

        self.write_atomic(&self.dir.join(FRAGMENTS_FILE), |path| {
            let json = serde_json::to_vec_pretty(store)?;
            std::fs::write(path, json)?;
            Ok(())
        })?;

        log::info!(
            "saved session: {} vectors, {} fragments to {}",
            index.len(),
            store.len(),
            self.dir.display()
        );
        Ok(())
    }

    /// Load a stored session, rejecting files written by another format
    /// version or another embedding model.
    pub fn load(
        &self,
        expected_model_version: &str,
        expected_dimensions: usize,
    ) -> Result<(SearchIndex, FragmentStore), StorageError> {
        let vectors = self.read_vectors(expected_model_version, expected_dimensions)?;

        let json = std::fs::read(self.dir.join(FRAGMENTS_FILE))?;
        let mut store: FragmentStore = serde_json::from_slice(&json)?;
        store.rebuild_lookup();

        // The two files are only a session together: every indexed id must
        // resolve and the counts must agree, otherwise one file belongs to a
        // different save.
        if vectors.len() != store.len()
            || vectors.iter().any(|v| !store.contains(v.fragment_id))
        {
            return Err(StorageError::InconsistentSession(format!(
                "{} vectors, {} fragments",
                vectors.len(),
                store.len()
            )));
        }

        let index = SearchIndex::build(expected_dimensions, expected_model_version, vectors)?;

        Ok((index, store))
    }

    /// Remove a stored session if present.
    pub fn delete(&self) -> Result<(), StorageError> {
        for file in [VECTORS_FILE, FRAGMENTS_FILE] {
            let path = self.dir.join(file);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn write_atomic(
        &self,
        path: &Path,
        write: impl FnOnce(&Path) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let temp_path = path.with_extension("tmp");

        let result = write(&temp_path)
            .and_then(|_| std::fs::rename(&temp_path, path).map_err(StorageError::from));
        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
        }
        result
    }

    fn write_vectors(&self, path: &Path, index: &SearchIndex) -> Result<(), StorageError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: model_id_hash(index.model_version()),
            dimensions: index.dimensions() as u16,
            entry_count: index.len() as u64,
        };
        self.write_header(&mut writer, &header)?;

        for entry in index.iter() {
            writer.write_all(&entry.fragment_id.to_le_bytes())?;
            writer.write_all(&[modality_tag(entry.modality)])?;
            for &value in &entry.values {
                writer.write_all(&value.to_le_bytes())?;
            }
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        file.sync_all()?;

        Ok(())
    }

    fn read_vectors(
        &self,
        expected_model_version: &str,
        expected_dimensions: usize,
    ) -> Result<Vec<EmbeddingVector>, StorageError> {
        let file = File::open(self.dir.join(VECTORS_FILE))?;
        let mut reader = BufReader::new(file);

        let header = self.read_header(&mut reader)?;

        if header.model_id != model_id_hash(expected_model_version) {
            return Err(StorageError::ModelMismatch);
        }
        if header.dimensions as usize != expected_dimensions {
            return Err(StorageError::InvalidFormat(format!(
                "expected {} dimensions, file has {}",
                expected_dimensions, header.dimensions
            )));
        }

        let dimensions = header.dimensions as usize;
        let mut vectors = Vec::with_capacity(header.entry_count as usize);

        for _ in 0..header.entry_count {
            let mut id_bytes = [0u8; 8];
            reader.read_exact(&mut id_bytes)?;
            let fragment_id = u64::from_le_bytes(id_bytes);

            let mut tag = [0u8; 1];
            reader.read_exact(&mut tag)?;
            let modality = parse_modality_tag(tag[0])?;

            let mut values = Vec::with_capacity(dimensions);
            for _ in 0..dimensions {
                let mut float_bytes = [0u8; 4];
                reader.read_exact(&mut float_bytes)?;
                values.push(f32::from_le_bytes(float_bytes));
            }

            vectors.push(EmbeddingVector {
                fragment_id,
                modality,
                values,
            });
        }

        Ok(vectors)
    }

    fn write_header(
        &self,
        writer: &mut BufWriter<File>,
        header: &Header,
    ) -> Result<(), StorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = header.version;
        header_bytes[1..33].copy_from_slice(&header.model_id);
        header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
        header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&header_bytes[0..43]);
        header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

        writer.write_all(&header_bytes)?;
        Ok(())
    }

    fn read_header(&self, reader: &mut BufReader<File>) -> Result<Header, StorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes)?;

        let version = header_bytes[0];
        if version > FORMAT_VERSION {
            return Err(StorageError::VersionMismatch(version, FORMAT_VERSION));
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&header_bytes[1..33]);

        let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&header_bytes[35..43]);
        let entry_count = u64::from_le_bytes(count_bytes);

        let mut checksum_bytes = [0u8; 4];
        checksum_bytes.copy_from_slice(&header_bytes[43..47]);
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        let computed_checksum = crc32fast::hash(&header_bytes[0..43]);
        if stored_checksum != computed_checksum {
            return Err(StorageError::ChecksumMismatch);
        }

        Ok(Header {
            version,
            model_id,
            dimensions,
            entry_count,
        })
    }
}

fn modality_tag(modality: Modality) -> u8 {
    match modality {
        Modality::Text => 0,
        Modality::Image => 1,
    }
}

fn parse_modality_tag(tag: u8) -> Result<Modality, StorageError> {
    match tag {
        0 => Ok(Modality::Text),
        1 => Ok(Modality::Image),
        other => Err(StorageError::InvalidFormat(format!(
            "unknown modality tag {other}"
        ))),
    }
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}
