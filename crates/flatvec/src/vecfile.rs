//! The flat vector file: an 8-byte header followed by fixed-size records.
//!
//! Layout (all little-endian):
//!
//! ```text
//! byte 0..4 : u32 count       (number of records)
//! byte 4..8 : u32 dimensions  (float lanes per record)
//! byte 8..  : count records of (dimensions + 1) * 4 bytes each:
//!               bytes 0..4           u32 metadata id
//!               bytes 4..(d+1)*4     d f32 components, unit-normalized
//! ```
//!
//! A brand-new file gets a zeroed header; the dimension field is patched
//! once the first insert establishes it. A stored non-zero dimension is
//! authoritative: callers supplying a different value are refused upstream.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{FlatVecError, FlatVecResult};

/// Size of the file header in bytes.
pub const HEADER_SIZE: u64 = 8;

/// Target size of the scan read buffer.
pub const SCAN_BUFFER_TARGET_BYTES: usize = 4 * 1024 * 1024;

/// Bounds on the number of records held by the scan buffer, whatever the
/// dimension count works out to.
pub const MIN_SCAN_RECORDS: usize = 512;
pub const MAX_SCAN_RECORDS: usize = 8192;

/// Bytes occupied by one record: the id slot plus the vector lanes.
#[inline]
#[must_use]
pub fn record_size(dimensions: u32) -> usize {
    (dimensions as usize + 1) * 4
}

/// Number of records the scan buffer holds for a given dimension count:
/// roughly `SCAN_BUFFER_TARGET_BYTES` worth, clamped to
/// [`MIN_SCAN_RECORDS`, `MAX_SCAN_RECORDS`].
#[inline]
#[must_use]
pub fn scan_buffer_records(dimensions: u32) -> usize {
    (SCAN_BUFFER_TARGET_BYTES / record_size(dimensions))
        .clamp(MIN_SCAN_RECORDS, MAX_SCAN_RECORDS)
}

/// The vector file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VecFileHeader {
    pub count: u32,
    pub dimensions: u32,
}

/// An open vector file: the owned read-write handle used by mutations,
/// plus the path for spawning per-scan read handles.
pub struct VectorFile {
    path: PathBuf,
    file: File,
}

impl VectorFile {
    /// Open the vector file at `path`, creating it (with a zeroed header)
    /// if it does not exist yet.
    pub fn open(path: &Path) -> FlatVecResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let mut vf = Self {
            path: path.to_path_buf(),
            file,
        };
        if vf.file.metadata()?.len() < HEADER_SIZE {
            vf.write_header(VecFileHeader {
                count: 0,
                dimensions: 0,
            })?;
        }
        Ok(vf)
    }

    /// Open the vector file at `path`, truncating whatever was there.
    /// Used for the transient rewrite target during deletes.
    pub fn create(path: &Path) -> FlatVecResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut vf = Self {
            path: path.to_path_buf(),
            file,
        };
        vf.write_header(VecFileHeader {
            count: 0,
            dimensions: 0,
        })?;
        Ok(vf)
    }

    /// Path this file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the header.
    ///
    /// Reads through a fresh handle so parallel readers never contend on
    /// the owned handle's seek position. Fails with
    /// [`FlatVecError::Corruption`] when the declared record count needs
    /// more bytes than the file holds past the header.
    pub fn header(&self) -> FlatVecResult<VecFileHeader> {
        let mut reader = File::open(&self.path)?;
        let count = reader.read_u32::<LittleEndian>()?;
        let dimensions = reader.read_u32::<LittleEndian>()?;
        let header = VecFileHeader { count, dimensions };

        if count > 0 && dimensions > 0 {
            let needed = count as u64 * record_size(dimensions) as u64;
            let available = reader.metadata()?.len().saturating_sub(HEADER_SIZE);
            if needed > available {
                return Err(FlatVecError::Corruption {
                    path: self.path.display().to_string(),
                    detail: format!(
                        "header declares {} records ({} bytes) but only {} bytes follow the header",
                        count, needed, available
                    ),
                });
            }
        }

        Ok(header)
    }

    /// Rewrite the whole header.
    pub fn write_header(&mut self, header: VecFileHeader) -> FlatVecResult<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_u32::<LittleEndian>(header.count)?;
        self.file.write_u32::<LittleEndian>(header.dimensions)?;
        Ok(())
    }

    /// Patch only the record count (first header field).
    pub fn write_count(&mut self, count: u32) -> FlatVecResult<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_u32::<LittleEndian>(count)?;
        Ok(())
    }

    /// Patch only the dimension count (second header field).
    pub fn write_dimensions(&mut self, dimensions: u32) -> FlatVecResult<()> {
        self.file.seek(SeekFrom::Start(4))?;
        self.file.write_u32::<LittleEndian>(dimensions)?;
        Ok(())
    }

    /// Append pre-encoded records past the current end of file.
    pub fn append_records(&mut self, encoded: &[u8]) -> FlatVecResult<()> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(encoded)?;
        self.file.flush()?;
        Ok(())
    }

    /// Overwrite the vector lanes of the record at `record_index`, leaving
    /// its id slot alone.
    pub fn overwrite_vector(
        &mut self,
        record_index: u64,
        dimensions: u32,
        lanes: &[f32],
    ) -> FlatVecResult<()> {
        let offset = HEADER_SIZE + record_index * record_size(dimensions) as u64 + 4;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(lanes.len() * 4);
        for x in lanes {
            buf.write_f32::<LittleEndian>(*x)?;
        }
        self.file.write_all(&buf)?;
        self.file.flush()?;
        Ok(())
    }

    /// Open a fresh read-only handle positioned at the first record.
    ///
    /// Scans use their own handle so parallel readers never fight over one
    /// seek position; the owned handle stays reserved for mutations.
    pub fn record_reader(&self) -> FlatVecResult<File> {
        let mut reader = File::open(&self.path)?;
        reader.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(reader)
    }

    /// Open a fresh read-only handle positioned at `record_index`.
    pub fn record_reader_at(&self, record_index: u64, dimensions: u32) -> FlatVecResult<File> {
        let mut reader = File::open(&self.path)?;
        reader.seek(SeekFrom::Start(
            HEADER_SIZE + record_index * record_size(dimensions) as u64,
        ))?;
        Ok(reader)
    }

    /// Flush file contents and metadata to the device.
    pub fn sync_all(&self) -> FlatVecResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Re-open the owned handle, picking up a file that was just renamed
    /// into place.
    pub fn reopen(&mut self) -> FlatVecResult<()> {
        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        Ok(())
    }
}

/// Encode one record (id slot + lanes) onto the end of `out`.
pub fn encode_record(out: &mut Vec<u8>, id: u32, lanes: &[f32]) {
    out.extend_from_slice(&id.to_le_bytes());
    for x in lanes {
        out.extend_from_slice(&x.to_le_bytes());
    }
}

/// Decode a byte run of whole records into f32 slots, reusing `out`.
///
/// Slot 0 of each record carries the id's bit pattern; use
/// [`record_id`] to recover it rather than numeric conversion.
pub fn decode_records(bytes: &[u8], out: &mut Vec<f32>) {
    out.clear();
    out.reserve(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
}

/// Recover the metadata id from a decoded record's slot 0.
///
/// The slot holds the id's little-endian bytes; reinterpret the bit
/// pattern, never convert numerically, or large ids lose precision.
#[inline]
#[must_use]
pub fn record_id(slot0: f32) -> u32 {
    slot0.to_bits()
}
