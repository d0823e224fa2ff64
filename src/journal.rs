//! Append-only transaction journal.
//!
//! Every committed transaction is one frame in the journal. On open the
//! frames are replayed in order to rebuild the record tables. Layout:
//!
//! ```text
//! magic "LKJ\0" | version u8 | frame*
//! frame = len u32 LE | rmp-serde(JournalEntry) | crc32(payload) u32 LE
//! ```

use crate::error::{Result, StoreError};
use crate::records::Mutation;
use crate::types::Timestamp;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"LKJ\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

const HEADER_LEN: u64 = 5;

/// Frames larger than this are refused on append and treated as corruption
/// on read.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Upper bound on what an entry adds around its encoded mutations.
const ENTRY_OVERHEAD: usize = 64;

/// One committed transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Commit sequence number. Consecutive within a journal; the first
    /// entry of a compacted journal carries on from the folded ones.
    pub seq: u64,
    /// When the transaction committed.
    pub timestamp: Timestamp,
    /// Identity counter after this commit.
    pub next_id: u64,
    /// Mutations in application order.
    pub ops: Vec<Mutation>,
}

/// Result of reading a journal from disk.
pub struct Replay {
    pub entries: Vec<JournalEntry>,
    /// Bytes dropped from a torn final frame.
    pub truncated_bytes: u64,
}

struct Writer {
    file: File,
    /// Length of the valid journal.
    len: u64,
    entries: u64,
    writes_since_sync: u64,
}

/// Append-only journal of committed transactions.
pub struct Journal {
    path: PathBuf,
    writer: Mutex<Writer>,
    /// Sync every N appends (1 = every append).
    sync_interval: u64,
}

impl Journal {
    /// Open or create a journal, replaying the entries it holds.
    ///
    /// A frame cut short at the end of the file is what a crash during
    /// append leaves behind; it is truncated away. Damage anywhere else is
    /// reported as corruption.
    pub fn open(path: impl AsRef<Path>, sync_interval: u64) -> Result<(Self, Replay)> {
        let path = path.as_ref().to_path_buf();

        let replay = if path.exists() {
            let file = File::open(&path)?;
            let mut reader = BufReader::new(file);
            Self::read_header(&mut reader)?;
            let (entries, valid_len) = Self::read_frames(&mut reader)?;
            let file_len = fs::metadata(&path)?.len();

            if valid_len < file_len {
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
            }

            Replay {
                entries,
                truncated_bytes: file_len - valid_len,
            }
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            file.write_all(JOURNAL_MAGIC)?;
            file.write_all(&[JOURNAL_VERSION])?;
            file.sync_all()?;

            Replay {
                entries: Vec::new(),
                truncated_bytes: 0,
            }
        };

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();

        let journal = Self {
            path,
            writer: Mutex::new(Writer {
                file,
                len,
                entries: replay.entries.len() as u64,
                writes_since_sync: 0,
            }),
            sync_interval: sync_interval.max(1),
        };

        Ok((journal, replay))
    }

    /// Append one entry.
    ///
    /// On failure the file is cut back to its previous length. If even that
    /// fails the journal can no longer be trusted and `Corruption` is
    /// returned.
    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let frame = encode_frame(entry)?;
        let mut writer = self.writer.lock();
        let start = writer.len;

        match Self::write_at(&mut writer, start, &frame, self.sync_interval) {
            Ok(()) => {
                writer.len = start + frame.len() as u64;
                writer.entries += 1;
                Ok(())
            }
            Err(e) => {
                if writer.file.set_len(start).is_err() {
                    return Err(StoreError::Corruption(format!(
                        "journal append failed and could not be rolled back: {}",
                        e
                    )));
                }
                Err(e)
            }
        }
    }

    fn write_at(writer: &mut Writer, offset: u64, frame: &[u8], sync_interval: u64) -> Result<()> {
        writer.file.seek(SeekFrom::Start(offset))?;
        writer.file.write_all(frame)?;
        writer.file.flush()?;

        writer.writes_since_sync += 1;
        if writer.writes_since_sync >= sync_interval {
            writer.file.sync_data()?;
            writer.writes_since_sync = 0;
        }
        Ok(())
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.file.sync_all()?;
        writer.writes_since_sync = 0;
        Ok(())
    }

    /// Re-read every frame and check it.
    ///
    /// Unlike [`Journal::open`], a short trailing frame is corruption here:
    /// everything up to the current length was written by this process.
    pub fn verify(&self) -> Result<usize> {
        let writer = self.writer.lock();
        let file = File::open(&self.path)?;
        let on_disk = file.metadata()?.len();
        if on_disk < writer.len {
            return Err(StoreError::Corruption(format!(
                "journal shrank from {} to {} bytes",
                writer.len, on_disk
            )));
        }

        let mut reader = BufReader::new(file.take(writer.len));
        Self::read_header(&mut reader)?;
        let (entries, valid_len) = Self::read_frames(&mut reader)?;
        if valid_len != writer.len {
            return Err(StoreError::Corruption(format!(
                "journal frame cut short at byte {}",
                valid_len
            )));
        }
        Ok(entries.len())
    }

    /// Replace the journal with the given entries.
    ///
    /// Writes a sibling temp file, syncs it, and renames it over the journal.
    pub fn rewrite(&self, entries: &[JournalEntry]) -> Result<()> {
        let mut writer = self.writer.lock();
        let tmp_path = self.path.with_extension("tmp");

        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            tmp.write_all(JOURNAL_MAGIC)?;
            tmp.write_all(&[JOURNAL_VERSION])?;
            for entry in entries {
                tmp.write_all(&encode_frame(entry)?)?;
            }
            tmp.sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;

        // The old handle now points at an unlinked file.
        let reopened = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .and_then(|file| file.metadata().map(|meta| (file, meta.len())));
        let (file, len) = reopened.map_err(|e| {
            StoreError::Corruption(format!("journal replaced but could not be reopened: {}", e))
        })?;
        writer.len = len;
        writer.entries = entries.len() as u64;
        writer.file = file;
        writer.writes_since_sync = 0;
        Ok(())
    }

    /// Current size in bytes.
    pub fn size(&self) -> u64 {
        self.writer.lock().len
    }

    /// Entries currently in the journal.
    pub fn entry_count(&self) -> u64 {
        self.writer.lock().entries
    }

    /// Spread `ops` over as many entries as needed to keep every frame under
    /// the size limit. Entries are numbered from `first_seq`; all of them
    /// carry `next_id`. Always yields at least one entry.
    ///
    /// A single mutation too large for a frame on its own is rejected.
    pub fn pack(
        first_seq: u64,
        timestamp: Timestamp,
        next_id: u64,
        ops: Vec<Mutation>,
    ) -> Result<Vec<JournalEntry>> {
        Self::pack_within(first_seq, timestamp, next_id, ops, MAX_FRAME_LEN - ENTRY_OVERHEAD)
    }

    fn pack_within(
        first_seq: u64,
        timestamp: Timestamp,
        next_id: u64,
        ops: Vec<Mutation>,
        budget: usize,
    ) -> Result<Vec<JournalEntry>> {
        let mut chunks: Vec<Vec<Mutation>> = vec![Vec::new()];
        let mut used = 0;

        for op in ops {
            let size = rmp_serde::to_vec(&op)?.len();
            if size > budget {
                return Err(frame_too_large(size + ENTRY_OVERHEAD));
            }
            if used + size > budget {
                chunks.push(Vec::new());
                used = 0;
            }
            used += size;
            if let Some(chunk) = chunks.last_mut() {
                chunk.push(op);
            }
        }

        Ok(chunks
            .into_iter()
            .zip(first_seq..)
            .map(|(ops, seq)| JournalEntry {
                seq,
                timestamp,
                next_id,
                ops,
            })
            .collect())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_header(reader: &mut impl Read) -> Result<()> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != JOURNAL_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid journal magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != JOURNAL_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported journal version: {}",
                version[0]
            )));
        }
        Ok(())
    }

    /// Read frames until EOF. Returns the entries and the byte length of the
    /// journal up to the end of the last complete frame.
    fn read_frames(reader: &mut impl Read) -> Result<(Vec<JournalEntry>, u64)> {
        let mut entries = Vec::new();
        let mut valid_len = HEADER_LEN;

        loop {
            match Self::read_frame(reader) {
                Ok(Some((entry, frame_len))) => {
                    let expected = entries.last().map(|e: &JournalEntry| e.seq + 1);
                    if entry.seq == 0 || expected.is_some_and(|seq| entry.seq != seq) {
                        return Err(StoreError::Corruption(format!(
                            "journal sequence gap: expected {}, found {}",
                            expected.unwrap_or(1),
                            entry.seq
                        )));
                    }
                    entries.push(entry);
                    valid_len += frame_len;
                }
                Ok(None) => break,
                Err(StoreError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }

        Ok((entries, valid_len))
    }

    /// `Ok(None)` on a clean end of file.
    fn read_frame(reader: &mut impl Read) -> Result<Option<(JournalEntry, u64)>> {
        let mut len_bytes = [0u8; 4];
        let read = reader.read(&mut len_bytes[..1])?;
        if read == 0 {
            return Ok(None);
        }
        reader.read_exact(&mut len_bytes[1..])?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_FRAME_LEN {
            return Err(StoreError::Corruption("journal frame too large".into()));
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let expected = u32::from_le_bytes(checksum_bytes);

        let got = crc32fast::hash(&payload);
        if expected != got {
            return Err(StoreError::ChecksumMismatch { expected, got });
        }

        let entry: JournalEntry = rmp_serde::from_slice(&payload)?;
        Ok(Some((entry, (len + 8) as u64)))
    }
}

fn encode_frame(entry: &JournalEntry) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec(entry)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(frame_too_large(payload.len()));
    }
    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(frame)
}

fn frame_too_large(size: usize) -> StoreError {
    StoreError::Validation(format!(
        "transaction encodes to {} bytes, over the {} byte journal limit",
        size, MAX_FRAME_LEN
    ))
}
