//! Crash-safe store for consensus metadata.
//!
//! Everything lives in one fixed-size file, `<directory>/<name>.meta`:
//!
//! ```text
//! [file header, 64 bytes]
//! [meta slot A][meta slot B][configuration slot A][configuration slot B]
//! ```
//!
//! Each record kind owns two slots. A slot holds one frame:
//!
//! ```text
//! sequence u64 | payload length u32 | crc32 u32 | payload
//! ```
//!
//! where the crc covers sequence, length and payload. A write encodes the
//! whole record into the slot that does not hold the current value, with
//! the next sequence number, and syncs before returning. A torn frame fails
//! its checksum, so the other slot still holds the previous value. On open
//! the valid slot with the highest sequence wins.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::codec::{self, MetaRecord};
use crate::config::MetaStoreConfig;
use crate::configuration::Configuration;
use crate::error::{MetaResult, MetaStoreError};
use crate::types::{LogIndex, MemberId, Term};

const FILE_MAGIC: &[u8; 4] = b"KEEL";
const LAYOUT_VERSION: u32 = 1;
const FILE_HEADER_LENGTH: usize = 64;
// magic | layout version | meta slot size | configuration slot size
const FILE_HEADER_CHECKED_LENGTH: usize = 16;
/// Bytes of each slot taken by the frame header
/// (`sequence u64 | payload length u32 | crc32 u32`).
pub const FRAME_HEADER_LENGTH: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum RecordKind {
    Meta,
    Configuration,
}

impl RecordKind {
    fn label(self) -> &'static str {
        match self {
            RecordKind::Meta => "meta",
            RecordKind::Configuration => "configuration",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Layout {
    meta_slot_size: usize,
    configuration_slot_size: usize,
}

impl Layout {
    fn from_config(config: &MetaStoreConfig) -> Self {
        Self {
            meta_slot_size: config.meta_slot_size as usize,
            configuration_slot_size: config.configuration_slot_size as usize,
        }
    }

    fn slot_size(&self, kind: RecordKind) -> usize {
        match kind {
            RecordKind::Meta => self.meta_slot_size,
            RecordKind::Configuration => self.configuration_slot_size,
        }
    }

    fn payload_capacity(&self, kind: RecordKind) -> usize {
        self.slot_size(kind) - FRAME_HEADER_LENGTH
    }

    fn slot_offset(&self, kind: RecordKind, slot: usize) -> u64 {
        let base = match kind {
            RecordKind::Meta => FILE_HEADER_LENGTH,
            RecordKind::Configuration => FILE_HEADER_LENGTH + 2 * self.meta_slot_size,
        };
        (base + slot * self.slot_size(kind)) as u64
    }

    fn file_length(&self) -> u64 {
        (FILE_HEADER_LENGTH + 2 * self.meta_slot_size + 2 * self.configuration_slot_size) as u64
    }

    fn encode_header(&self) -> [u8; FILE_HEADER_LENGTH] {
        let mut header = [0u8; FILE_HEADER_LENGTH];
        header[0..4].copy_from_slice(FILE_MAGIC);
        header[4..8].copy_from_slice(&LAYOUT_VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&(self.meta_slot_size as u32).to_le_bytes());
        header[12..16].copy_from_slice(&(self.configuration_slot_size as u32).to_le_bytes());
        let crc = crc32fast::hash(&header[..FILE_HEADER_CHECKED_LENGTH]);
        header[16..20].copy_from_slice(&crc.to_le_bytes());
        header
    }

    fn check_header(&self, header: &[u8; FILE_HEADER_LENGTH]) -> MetaResult<()> {
        if &header[0..4] != FILE_MAGIC {
            return Err(MetaStoreError::InvalidLayout {
                reason: "not a keel metadata file (bad magic)".to_string(),
            });
        }

        let stored_crc = read_u32(&header[16..20]);
        let computed_crc = crc32fast::hash(&header[..FILE_HEADER_CHECKED_LENGTH]);
        if stored_crc != computed_crc {
            return Err(MetaStoreError::InvalidLayout {
                reason: format!(
                    "header checksum mismatch: expected {stored_crc:#x}, got {computed_crc:#x}"
                ),
            });
        }

        let version = read_u32(&header[4..8]);
        if version != LAYOUT_VERSION {
            return Err(MetaStoreError::InvalidLayout {
                reason: format!(
                    "unsupported layout version: expected {LAYOUT_VERSION}, got {version}"
                ),
            });
        }

        let meta_slot_size = read_u32(&header[8..12]) as usize;
        let configuration_slot_size = read_u32(&header[12..16]) as usize;
        if meta_slot_size != self.meta_slot_size
            || configuration_slot_size != self.configuration_slot_size
        {
            return Err(MetaStoreError::InvalidLayout {
                reason: format!(
                    "file uses slot sizes {meta_slot_size}/{configuration_slot_size}, \
                     configured {}/{}",
                    self.meta_slot_size, self.configuration_slot_size
                ),
            });
        }

        Ok(())
    }
}

/// Which slot holds the current value of a record kind.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct SlotState {
    active: Option<usize>,
    sequence: u64,
}

impl SlotState {
    fn next_slot(&self) -> usize {
        match self.active {
            Some(slot) => 1 - slot,
            None => 0,
        }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(bytes);
    u32::from_le_bytes(arr)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    u64::from_le_bytes(arr)
}

fn frame_checksum(prefix: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(prefix);
    hasher.update(payload);
    hasher.finalize()
}

/// Validates a slot frame, returning its sequence and payload.
fn parse_frame(slot: &[u8]) -> Option<(u64, &[u8])> {
    if slot.len() < FRAME_HEADER_LENGTH {
        return None;
    }
    let sequence = read_u64(&slot[0..8]);
    let length = read_u32(&slot[8..12]) as usize;
    let stored_crc = read_u32(&slot[12..16]);
    if sequence == 0 || length > slot.len() - FRAME_HEADER_LENGTH {
        return None;
    }
    let payload = &slot[FRAME_HEADER_LENGTH..FRAME_HEADER_LENGTH + length];
    (frame_checksum(&slot[0..12], payload) == stored_crc).then_some((sequence, payload))
}

fn check_existing_header(
    layout: &Layout,
    header: &[u8; FILE_HEADER_LENGTH],
    available: usize,
) -> MetaResult<()> {
    if available < FILE_HEADER_LENGTH {
        return Err(MetaStoreError::InvalidLayout {
            reason: format!("file header truncated to {available} bytes"),
        });
    }
    layout.check_header(header)
}

/// True when a crash interrupted `initialize` after sizing the file: every
/// header byte is either unwritten or the expected one, and no slot was
/// ever written.
fn is_torn_initialization(
    file: &mut File,
    layout: &Layout,
    header: &[u8; FILE_HEADER_LENGTH],
    len: u64,
) -> MetaResult<bool> {
    if len != layout.file_length() {
        return Ok(false);
    }

    let expected = layout.encode_header();
    if header
        .iter()
        .zip(expected.iter())
        .any(|(actual, want)| *actual != 0 && actual != want)
    {
        return Ok(false);
    }

    let mut body = Vec::with_capacity((len as usize).saturating_sub(FILE_HEADER_LENGTH));
    file.seek(SeekFrom::Start(FILE_HEADER_LENGTH as u64))?;
    file.read_to_end(&mut body)?;
    Ok(body.iter().all(|b| *b == 0))
}

#[cfg(unix)]
fn lock_exclusive(file: &File, path: &Path) -> MetaResult<()> {
    use std::os::unix::io::AsRawFd;

    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Err(MetaStoreError::Locked {
                path: path.to_path_buf(),
            });
        }
        return Err(MetaStoreError::Io(err));
    }
    Ok(())
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File, _path: &Path) -> MetaResult<()> {
    Ok(())
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> MetaResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> MetaResult<()> {
    Ok(())
}

/// Durable store for term, vote, log positions and the latest configuration.
///
/// One store owns its file exclusively; a second open of the same location,
/// from this or another process, fails with [`MetaStoreError::Locked`].
/// All calls block on disk I/O. Async callers should go through
/// [`AsyncMetaStore`](crate::AsyncMetaStore).
pub struct MetaStore {
    file: File,
    path: PathBuf,
    layout: Layout,
    meta: MetaRecord,
    meta_slots: SlotState,
    configuration: Option<Configuration>,
    configuration_slots: SlotState,
    scratch: Vec<u8>,
}

impl MetaStore {
    /// Opens or creates the metadata file described by `config`.
    ///
    /// Fails if the file cannot be created or opened, if another store holds
    /// it, or if it was written with a different layout.
    pub fn open(config: MetaStoreConfig) -> MetaResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.directory)?;

        let path = config.file_path();
        let layout = Layout::from_config(&config);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        lock_exclusive(&file, &path)?;

        let len = file.metadata()?.len();
        let mut header = [0u8; FILE_HEADER_LENGTH];
        let available = len.min(FILE_HEADER_LENGTH as u64) as usize;
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header[..available])?;

        // A zeroed header means creation never completed.
        if header.iter().all(|b| *b == 0) {
            Self::initialize(&mut file, &layout, &config.directory)?;
            debug!(path = %path.display(), "initialized metadata file");
        } else if let Err(err) = check_existing_header(&layout, &header, available) {
            if !is_torn_initialization(&mut file, &layout, &header, len)? {
                return Err(err);
            }
            warn!(path = %path.display(), "metadata file header incomplete, reinitializing");
            Self::initialize(&mut file, &layout, &config.directory)?;
        } else if len < layout.file_length() {
            file.set_len(layout.file_length())?;
            file.sync_all()?;
        }

        let scratch_len = layout.meta_slot_size.max(layout.configuration_slot_size);
        let mut store = Self {
            file,
            path,
            layout,
            meta: MetaRecord::default(),
            meta_slots: SlotState::default(),
            configuration: None,
            configuration_slots: SlotState::default(),
            scratch: vec![0u8; scratch_len],
        };

        let (meta_slots, meta) = store.load_record(RecordKind::Meta, codec::decode_meta_record)?;
        store.meta_slots = meta_slots;
        store.meta = meta.unwrap_or_default();

        let (configuration_slots, configuration) =
            store.load_record(RecordKind::Configuration, codec::decode_configuration)?;
        store.configuration_slots = configuration_slots;
        store.configuration = configuration;

        info!(
            path = %store.path.display(),
            term = %store.meta.term,
            voted_for = ?store.meta.vote,
            last_flushed_index = %store.meta.last_flushed_index,
            commit_index = ?store.meta.commit_index,
            configuration_index = ?store.configuration.as_ref().map(|c| c.index),
            "opened metadata store"
        );

        Ok(store)
    }

    fn initialize(file: &mut File, layout: &Layout, dir: &Path) -> MetaResult<()> {
        file.set_len(layout.file_length())?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&layout.encode_header())?;
        file.sync_all()?;
        sync_directory(dir)
    }

    fn load_record<T>(
        &mut self,
        kind: RecordKind,
        decode: fn(&[u8], usize) -> Option<T>,
    ) -> MetaResult<(SlotState, Option<T>)> {
        let slot_size = self.layout.slot_size(kind);
        let mut state = SlotState::default();
        let mut value = None;

        for slot in 0..2 {
            self.file
                .seek(SeekFrom::Start(self.layout.slot_offset(kind, slot)))?;
            let bytes = &mut self.scratch[..slot_size];
            self.file.read_exact(bytes)?;

            let decoded = parse_frame(bytes)
                .and_then(|(sequence, payload)| decode(payload, 0).map(|v| (sequence, v)));
            match decoded {
                Some((sequence, record)) => {
                    if state.active.is_none() || sequence > state.sequence {
                        state = SlotState {
                            active: Some(slot),
                            sequence,
                        };
                        value = Some(record);
                    }
                }
                None if bytes.iter().all(|b| *b == 0) => {}
                None => {
                    warn!(
                        path = %self.path.display(),
                        record = kind.label(),
                        slot,
                        "skipping unreadable metadata slot"
                    );
                }
            }
        }

        Ok((state, value))
    }

    fn slot_state(&self, kind: RecordKind) -> SlotState {
        match kind {
            RecordKind::Meta => self.meta_slots,
            RecordKind::Configuration => self.configuration_slots,
        }
    }

    fn check_capacity(&self, kind: RecordKind, size: usize) -> MetaResult<()> {
        let capacity = self.layout.payload_capacity(kind);
        if size > capacity {
            return Err(MetaStoreError::RecordTooLarge {
                record: kind.label(),
                size,
                capacity,
            });
        }
        Ok(())
    }

    /// Writes the payload staged after the frame header in `scratch`.
    fn write_frame(&mut self, kind: RecordKind, payload_len: usize) -> MetaResult<()> {
        let state = self.slot_state(kind);
        let slot = state.next_slot();
        let sequence = state.sequence + 1;
        let frame_len = FRAME_HEADER_LENGTH + payload_len;

        let frame = &mut self.scratch[..frame_len];
        frame[0..8].copy_from_slice(&sequence.to_le_bytes());
        frame[8..12].copy_from_slice(&(payload_len as u32).to_le_bytes());
        let crc = frame_checksum(&frame[0..12], &frame[FRAME_HEADER_LENGTH..]);
        frame[12..16].copy_from_slice(&crc.to_le_bytes());

        self.file
            .seek(SeekFrom::Start(self.layout.slot_offset(kind, slot)))?;
        self.file.write_all(&self.scratch[..frame_len])?;
        self.file.sync_data()?;

        let committed = SlotState {
            active: Some(slot),
            sequence,
        };
        match kind {
            RecordKind::Meta => self.meta_slots = committed,
            RecordKind::Configuration => self.configuration_slots = committed,
        }

        debug!(
            record = kind.label(),
            slot,
            sequence,
            bytes = frame_len,
            "persisted metadata record"
        );
        Ok(())
    }

    fn persist_meta(&mut self, record: MetaRecord) -> MetaResult<()> {
        let size = codec::meta_record_encoded_length(&record);
        self.check_capacity(RecordKind::Meta, size)?;
        codec::encode_meta_record(&record, &mut self.scratch, FRAME_HEADER_LENGTH)?;
        self.write_frame(RecordKind::Meta, size)?;
        self.meta = record;
        Ok(())
    }

    /// Persists the current term.
    ///
    /// Terms are expected to grow. A lower term is still stored, since the
    /// caller owns that rule, but it is logged.
    pub fn store_term(&mut self, term: Term) -> MetaResult<()> {
        if term < self.meta.term {
            warn!(current = %self.meta.term, requested = %term, "storing a lower term");
        }
        let record = MetaRecord {
            term,
            ..self.meta.clone()
        };
        self.persist_meta(record)
    }

    /// Persists the vote for the current term. `None` clears it.
    pub fn store_vote(&mut self, vote: Option<MemberId>) -> MetaResult<()> {
        let record = MetaRecord {
            vote,
            ..self.meta.clone()
        };
        self.persist_meta(record)
    }

    /// Persists the last log index known to be on disk.
    pub fn store_last_flushed_index(&mut self, index: LogIndex) -> MetaResult<()> {
        let record = MetaRecord {
            last_flushed_index: index,
            ..self.meta.clone()
        };
        self.persist_meta(record)
    }

    /// Persists the commit index.
    pub fn store_commit_index(&mut self, index: LogIndex) -> MetaResult<()> {
        let record = MetaRecord {
            commit_index: Some(index),
            ..self.meta.clone()
        };
        self.persist_meta(record)
    }

    /// Persists `configuration`, replacing the previous one.
    pub fn store_configuration(&mut self, configuration: &Configuration) -> MetaResult<()> {
        let size = codec::configuration_encoded_length(configuration);
        self.check_capacity(RecordKind::Configuration, size)?;
        codec::encode_configuration(configuration, &mut self.scratch, FRAME_HEADER_LENGTH)?;
        self.write_frame(RecordKind::Configuration, size)?;
        self.configuration = Some(configuration.clone());
        Ok(())
    }

    /// Returns the stored term, zero if none was ever stored.
    pub fn load_term(&self) -> Term {
        self.meta.term
    }

    /// Returns the stored vote.
    pub fn load_vote(&self) -> Option<MemberId> {
        self.meta.vote.clone()
    }

    /// Returns the stored last flushed index, zero if none was ever stored.
    pub fn load_last_flushed_index(&self) -> LogIndex {
        self.meta.last_flushed_index
    }

    /// Returns the stored commit index, `None` if none was ever stored.
    pub fn load_commit_index(&self) -> Option<LogIndex> {
        self.meta.commit_index
    }

    /// Returns true once a commit index has been stored.
    pub fn has_commit_index(&self) -> bool {
        self.meta.commit_index.is_some()
    }

    /// Returns the latest stored configuration.
    pub fn load_configuration(&self) -> Option<Configuration> {
        self.configuration.clone()
    }

    /// The combined term/vote/index record as last persisted.
    pub fn meta_record(&self) -> &MetaRecord {
        &self.meta
    }

    /// Path of the metadata file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Syncs and closes the file, releasing the lock.
    pub fn close(self) -> MetaResult<()> {
        self.file.sync_all()?;
        info!(path = %self.path.display(), term = %self.meta.term, "closed metadata store");
        Ok(())
    }
}

impl std::fmt::Debug for MetaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaStore")
            .field("path", &self.path)
            .field("meta", &self.meta)
            .field("configuration", &self.configuration)
            .finish()
    }
}
