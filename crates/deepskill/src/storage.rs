//! Binary container shared by every persisted artifact.
//!
//! Layout: a 64-byte little-endian header followed by a JSON payload.
//!
//! | bytes  | field          |
//! |--------|----------------|
//! | 0..4   | magic (kind)   |
//! | 4..6   | format version |
//! | 6..8   | flags          |
//! | 8..16  | record count   |
//! | 16..24 | payload length |

use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::{EngineError, EngineResult};

/// Current format version.
const FORMAT_VERSION: u16 = 1;

/// Header size in bytes.
const HEADER_SIZE: usize = 64;

/// The kinds of artifact the engine loads at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Frozen encoder and prediction-head parameters.
    Parameters,
    /// Interaction table plus CSR adjacency.
    Graph,
    /// Entity name table.
    Entities,
}

impl ArtifactKind {
    pub fn magic(self) -> u32 {
        match self {
            ArtifactKind::Parameters => 0x44534B50, // "DSKP"
            ArtifactKind::Graph => 0x44534B47,      // "DSKG"
            ArtifactKind::Entities => 0x44534B45,   // "DSKE"
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ArtifactKind::Parameters => "parameter snapshot",
            ArtifactKind::Graph => "interaction graph",
            ArtifactKind::Entities => "entity table",
        }
    }
}

/// Write an artifact to a file, creating parent directories.
pub fn write_artifact_file<T: Serialize>(
    kind: ArtifactKind,
    record_count: u64,
    value: &T,
    path: &Path,
) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)?;
    write_artifact(kind, record_count, value, &mut file)?;
    file.flush()?;
    Ok(())
}

/// Write an artifact to any writer.
pub fn write_artifact<T: Serialize, W: Write>(
    kind: ArtifactKind,
    record_count: u64,
    value: &T,
    writer: &mut W,
) -> EngineResult<()> {
    let payload = serde_json::to_vec(value).map_err(|e| {
        EngineError::CorruptArtifact(format!("{}: serialization failed: {e}", kind.name()))
    })?;

    let mut header = [0u8; HEADER_SIZE];
    write_u32(&mut header[0..4], kind.magic());
    write_u16(&mut header[4..6], FORMAT_VERSION);
    write_u16(&mut header[6..8], 0); // flags
    write_u64(&mut header[8..16], record_count);
    write_u64(&mut header[16..24], payload.len() as u64);

    writer.write_all(&header)?;
    writer.write_all(&payload)?;
    Ok(())
}

/// Read an artifact from a file through a memory map.
pub fn read_artifact_file<T: DeserializeOwned>(kind: ArtifactKind, path: &Path) -> EngineResult<T> {
    if !path.exists() {
        return Err(EngineError::MissingArtifact(format!(
            "{} at {}",
            kind.name(),
            path.display()
        )));
    }

    let file = std::fs::File::open(path)?;
    let len = file.metadata()?.len() as usize;
    if len < HEADER_SIZE {
        return Err(EngineError::CorruptArtifact(format!(
            "{} at {}: file is {len} bytes, shorter than the header",
            kind.name(),
            path.display()
        )));
    }

    // SAFETY: the map is read-only and dropped before this function returns;
    // the decoded value owns its data.
    let map = unsafe { memmap2::Mmap::map(&file)? };
    tracing::debug!(
        "Mapped {} ({} bytes, {} records) from {}",
        kind.name(),
        len,
        record_count(&map).unwrap_or(0),
        path.display()
    );
    read_artifact(kind, &map)
}

/// Decode an artifact from a byte slice.
pub fn read_artifact<T: DeserializeOwned>(kind: ArtifactKind, bytes: &[u8]) -> EngineResult<T> {
    let corrupt = |msg: String| EngineError::CorruptArtifact(format!("{}: {msg}", kind.name()));

    if bytes.len() < HEADER_SIZE {
        return Err(corrupt(format!("truncated header ({} bytes)", bytes.len())));
    }
    let header = &bytes[..HEADER_SIZE];

    let magic = read_u32(&header[0..4]);
    if magic != kind.magic() {
        return Err(corrupt(format!(
            "invalid magic: expected 0x{:08X}, got 0x{magic:08X}",
            kind.magic()
        )));
    }

    let version = read_u16(&header[4..6]);
    if version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported version: {version}")));
    }

    let payload_len = read_u64(&header[16..24]) as usize;
    let available = bytes.len() - HEADER_SIZE;
    if payload_len > available {
        return Err(corrupt(format!(
            "payload truncated: header declares {payload_len} bytes, {available} present"
        )));
    }

    let payload = &bytes[HEADER_SIZE..HEADER_SIZE + payload_len];
    serde_json::from_slice(payload).map_err(|e| corrupt(format!("deserialization failed: {e}")))
}

/// Record count stored in an artifact header.
pub fn record_count(bytes: &[u8]) -> Option<u64> {
    bytes.get(8..16).map(read_u64)
}

// Little-endian byte helpers
fn write_u16(buf: &mut [u8], val: u16) {
    buf[..2].copy_from_slice(&val.to_le_bytes());
}
fn write_u32(buf: &mut [u8], val: u32) {
    buf[..4].copy_from_slice(&val.to_le_bytes());
}
fn write_u64(buf: &mut [u8], val: u64) {
    buf[..8].copy_from_slice(&val.to_le_bytes());
}
fn read_u16(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[0], buf[1]])
}
fn read_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}
fn read_u64(buf: &[u8]) -> u64 {
    u64::from_le_bytes([buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Sample {
        names: Vec<String>,
        weight: f32,
    }

    fn sample() -> Sample {
        Sample {
            names: vec!["alice".to_string(), "bob".to_string()],
            weight: 0.25,
        }
    }

    #[test]
    fn test_roundtrip_in_memory() {
        let mut buf = Vec::new();
        write_artifact(ArtifactKind::Entities, 2, &sample(), &mut buf).unwrap();

        assert_eq!(record_count(&buf), Some(2));
        let loaded: Sample = read_artifact(ArtifactKind::Entities, &buf).unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn test_invalid_magic() {
        let mut buf = vec![0u8; HEADER_SIZE + 10];
        buf[0..4].copy_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        let result: EngineResult<Sample> = read_artifact(ArtifactKind::Graph, &buf);
        assert!(matches!(result, Err(EngineError::CorruptArtifact(_))));
    }

    #[test]
    fn test_kind_mismatch() {
        let mut buf = Vec::new();
        write_artifact(ArtifactKind::Entities, 2, &sample(), &mut buf).unwrap();
        let result: EngineResult<Sample> = read_artifact(ArtifactKind::Parameters, &buf);
        assert!(result.is_err());
    }

    #[test]
    fn test_truncated_payload() {
        let mut buf = Vec::new();
        write_artifact(ArtifactKind::Entities, 2, &sample(), &mut buf).unwrap();
        buf.truncate(buf.len() - 3);
        let err = read_artifact::<Sample>(ArtifactKind::Entities, &buf).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("entities.dske");

        write_artifact_file(ArtifactKind::Entities, 2, &sample(), &path).unwrap();
        let loaded: Sample = read_artifact_file(ArtifactKind::Entities, &path).unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result: EngineResult<Sample> =
            read_artifact_file(ArtifactKind::Graph, &dir.path().join("absent.dskg"));
        assert!(matches!(result, Err(EngineError::MissingArtifact(_))));
    }

    #[test]
    fn test_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.dskp");
        std::fs::write(&path, b"DSKP").unwrap();
        let result: EngineResult<Sample> = read_artifact_file(ArtifactKind::Parameters, &path);
        assert!(matches!(result, Err(EngineError::CorruptArtifact(_))));
    }
}
