use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rkyv::{AlignedVec, Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use tracing::warn;

use crate::error::StorageError;
use crate::model::Document;

// Frame format: [len u32 LE][len check u32 LE][payload hash u64 LE][rkyv bytes (len)]
const HEADER_LEN: u64 = 16;
pub(crate) const MAX_ENTRY_SIZE: usize = 16 * 1024 * 1024; // 16 MB

/// One logged mutation.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub enum Entry {
    Put(Document),
    Remove(String),
}

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    len: u32,
    len_check: u32,
    payload_hash: u64,
}

impl FrameHeader {
    fn for_payload(len: u32, payload: &[u8]) -> Self {
        Self {
            len,
            len_check: len_check(len),
            payload_hash: seahash::hash(payload),
        }
    }

    fn to_bytes(self) -> [u8; HEADER_LEN as usize] {
        let mut buf = [0u8; HEADER_LEN as usize];
        buf[0..4].copy_from_slice(&self.len.to_le_bytes());
        buf[4..8].copy_from_slice(&self.len_check.to_le_bytes());
        buf[8..16].copy_from_slice(&self.payload_hash.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; HEADER_LEN as usize]) -> Self {
        let mut len = [0u8; 4];
        let mut check = [0u8; 4];
        let mut hash = [0u8; 8];
        len.copy_from_slice(&buf[0..4]);
        check.copy_from_slice(&buf[4..8]);
        hash.copy_from_slice(&buf[8..16]);
        Self {
            len: u32::from_le_bytes(len),
            len_check: u32::from_le_bytes(check),
            payload_hash: u64::from_le_bytes(hash),
        }
    }

    /// Checks the length field before it is trusted for any read.
    fn validate(&self, offset: u64) -> Result<usize, StorageError> {
        if self.len_check != len_check(self.len) {
            return Err(StorageError::Codec {
                offset,
                reason: "frame header checksum mismatch".into(),
            });
        }
        let len = self.len as usize;
        if len > MAX_ENTRY_SIZE {
            return Err(StorageError::Codec {
                offset,
                reason: format!("entry length {} exceeds {}", len, MAX_ENTRY_SIZE),
            });
        }
        Ok(len)
    }
}

fn len_check(len: u32) -> u32 {
    seahash::hash(&len.to_le_bytes()) as u32
}

/// Append-only log file of entries.
#[derive(Debug)]
pub struct Segment {
    pub file_path: PathBuf,
    file: File,
    current_offset: u64,
    strict: bool,
}

impl Segment {
    /// Opens (or creates) a segment. `strict` fsyncs after every append.
    pub fn new(path: &Path, strict: bool) -> io::Result<Self> {
        // Append mode: writes always land at the end regardless of where reads seek.
        let file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?;

        let current_offset = file.metadata()?.len();

        Ok(Self {
            file_path: path.to_path_buf(),
            file,
            current_offset,
            strict,
        })
    }

    pub fn len(&self) -> u64 {
        self.current_offset
    }

    pub fn is_empty(&self) -> bool {
        self.current_offset == 0
    }

    /// Appends one entry and returns its offset. Entries over
    /// `MAX_ENTRY_SIZE` are refused before anything is written.
    pub fn append(&mut self, entry: &Entry) -> Result<u64, StorageError> {
        let start = self.current_offset;
        let bytes = rkyv::to_bytes::<_, 4096>(entry).map_err(|e| StorageError::Codec {
            offset: start,
            reason: e.to_string(),
        })?;

        if bytes.len() > MAX_ENTRY_SIZE {
            return Err(StorageError::Codec {
                offset: start,
                reason: format!("entry length {} exceeds {}", bytes.len(), MAX_ENTRY_SIZE),
            });
        }
        let len = u32::try_from(bytes.len()).map_err(|_| StorageError::Codec {
            offset: start,
            reason: format!("entry of {} bytes does not fit a segment frame", bytes.len()),
        })?;

        let header = FrameHeader::for_payload(len, &bytes);
        let mut frame = Vec::with_capacity(HEADER_LEN as usize + bytes.len());
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(&bytes);
        self.file.write_all(&frame)?;

        if self.strict {
            self.file.sync_data()?;
        }

        self.current_offset += frame.len() as u64;
        Ok(start)
    }

    pub fn read(&self, offset: u64) -> Result<Entry, StorageError> {
        // Cloned handle for reads; append mode keeps the writer unaffected.
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;

        let mut header_buf = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header_buf)?;
        let header = FrameHeader::from_bytes(&header_buf);
        let len = header.validate(offset)?;

        let mut bytes = vec![0u8; len];
        file.read_exact(&mut bytes)?;
        if seahash::hash(&bytes) != header.payload_hash {
            return Err(StorageError::Codec {
                offset,
                reason: "payload checksum mismatch".into(),
            });
        }
        decode(offset, &bytes)
    }

    /// Reads every entry from the start of the file.
    ///
    /// Only the final frame may be torn (left by a crash mid-append); it is
    /// cut off so the next append starts on a frame boundary. A bad header or
    /// payload anywhere before it fails the replay without touching the file.
    pub fn replay(&mut self) -> Result<Vec<(u64, Entry)>, StorageError> {
        let file_len = self.file.metadata()?.len();
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut offset = 0u64;

        while offset < file_len {
            let remaining = file_len - offset;
            if remaining < HEADER_LEN {
                break;
            }
            let mut header_buf = [0u8; HEADER_LEN as usize];
            file.read_exact(&mut header_buf)?;
            let header = FrameHeader::from_bytes(&header_buf);
            let len = header.validate(offset)?;

            let frame_len = HEADER_LEN + len as u64;
            if frame_len > remaining {
                break;
            }

            let mut bytes = vec![0u8; len];
            file.read_exact(&mut bytes)?;
            if seahash::hash(&bytes) != header.payload_hash {
                if frame_len == remaining {
                    break;
                }
                return Err(StorageError::Codec {
                    offset,
                    reason: "payload checksum mismatch".into(),
                });
            }
            entries.push((offset, decode(offset, &bytes)?));
            offset += frame_len;
        }

        if offset < file_len {
            warn!(
                path = %self.file_path.display(),
                offset,
                dropped_bytes = file_len - offset,
                "truncating torn entry at end of segment"
            );
            self.file.set_len(offset)?;
            self.file.sync_data()?;
        }
        self.current_offset = offset;

        Ok(entries)
    }

    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}

fn decode(offset: u64, bytes: &[u8]) -> Result<Entry, StorageError> {
    // rkyv validation needs properly aligned input
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);

    rkyv::from_bytes::<Entry>(aligned.as_slice()).map_err(|e| StorageError::Codec {
        offset,
        reason: e.to_string(),
    })
}
