//! Binary codec for the metadata records.
//!
//! Records are written into caller-supplied buffers at caller-supplied
//! offsets. All integers are little-endian. Every record starts with an
//! 8-byte header:
//!
//! ```text
//! block_length u16 | template_id u16 | schema_id u16 | version u16
//! ```
//!
//! `block_length` is the size of the fixed root block that follows. Readers
//! skip root-block bytes they do not know, so later versions may append
//! fixed fields. Variable-length data (member ids, the vote) is written as
//! `len u16 | utf8 bytes`; member lists are repeating groups of
//! `entry_block_length u16 | count u16` followed by the entries.
//!
//! Decoding never fails loudly. A header for another record kind, schema or
//! version, a truncated buffer, or an invalid field all decode as `None`,
//! which lets the store treat an uninitialized or damaged region as empty.

use crate::configuration::{Configuration, Member, MemberRole};
use crate::error::CodecError;
use crate::types::{LogIndex, MemberId, Term, Timestamp, MAX_MEMBER_ID_LENGTH};

/// Identifies records written by this codec.
pub const SCHEMA_ID: u16 = 0x4B4C;
/// Current schema version.
pub const SCHEMA_VERSION: u16 = 1;
/// Size of the record header in bytes.
pub const HEADER_LENGTH: usize = 8;
/// Template id of the combined term/vote/index record.
pub const META_TEMPLATE_ID: u16 = 1;
/// Template id of the configuration record.
pub const CONFIGURATION_TEMPLATE_ID: u16 = 2;
/// Largest member list a configuration group can hold.
pub const MAX_GROUP_COUNT: usize = u16::MAX as usize;
/// Largest encoded meta record: a vote id of [`MAX_MEMBER_ID_LENGTH`] bytes.
pub const MAX_META_RECORD_LENGTH: usize =
    HEADER_LENGTH + META_BLOCK_LENGTH as usize + VAR_DATA_HEADER_LENGTH + MAX_MEMBER_ID_LENGTH;
/// Encoded size of a configuration with no members.
pub const EMPTY_CONFIGURATION_LENGTH: usize =
    HEADER_LENGTH + CONFIGURATION_BLOCK_LENGTH as usize + 2 * GROUP_HEADER_LENGTH;

// term u64 | last_flushed_index u64 | commit_index u64 | flags u8
const META_BLOCK_LENGTH: u16 = 25;
// index u64 | term u64 | time i64
const CONFIGURATION_BLOCK_LENGTH: u16 = 24;
// role u8 | last_updated i64
const MEMBER_BLOCK_LENGTH: u16 = 9;
const GROUP_HEADER_LENGTH: usize = 4;
const VAR_DATA_HEADER_LENGTH: usize = 2;

const FLAG_VOTE: u8 = 0b01;
const FLAG_COMMIT_INDEX: u8 = 0b10;

/// The combined consensus meta record.
///
/// Term, vote, last flushed index and commit index are persisted together
/// so a single write replaces all of them at once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetaRecord {
    /// Current term.
    pub term: Term,
    /// Candidate voted for in the current term.
    pub vote: Option<MemberId>,
    /// Last log index known to be flushed to disk.
    pub last_flushed_index: LogIndex,
    /// Last known commit index, `None` until first stored.
    pub commit_index: Option<LogIndex>,
}

/// Bytes needed to encode `record`.
pub fn meta_record_encoded_length(record: &MetaRecord) -> usize {
    let vote_len = record.vote.as_ref().map_or(0, |v| v.as_str().len());
    HEADER_LENGTH + META_BLOCK_LENGTH as usize + VAR_DATA_HEADER_LENGTH + vote_len
}

/// Bytes needed to encode `config`.
pub fn configuration_encoded_length(config: &Configuration) -> usize {
    HEADER_LENGTH
        + CONFIGURATION_BLOCK_LENGTH as usize
        + group_encoded_length(&config.new_members)
        + group_encoded_length(&config.old_members)
}

fn group_encoded_length(members: &[Member]) -> usize {
    GROUP_HEADER_LENGTH
        + members
            .iter()
            .map(|m| MEMBER_BLOCK_LENGTH as usize + VAR_DATA_HEADER_LENGTH + m.id.as_str().len())
            .sum::<usize>()
}

/// Encodes the meta record at `offset`, returning the number of bytes written.
pub fn encode_meta_record(
    record: &MetaRecord,
    buffer: &mut [u8],
    offset: usize,
) -> Result<usize, CodecError> {
    if let Some(vote) = &record.vote {
        check_id_length(vote)?;
    }
    let required = meta_record_encoded_length(record);
    let mut w = Writer::new(buffer, offset, required)?;

    w.put_header(META_BLOCK_LENGTH, META_TEMPLATE_ID);

    let mut flags = 0u8;
    if record.vote.is_some() {
        flags |= FLAG_VOTE;
    }
    if record.commit_index.is_some() {
        flags |= FLAG_COMMIT_INDEX;
    }
    w.put_u64(record.term.as_u64());
    w.put_u64(record.last_flushed_index.as_u64());
    w.put_u64(record.commit_index.unwrap_or(LogIndex::ZERO).as_u64());
    w.put_u8(flags);

    w.put_var_data(record.vote.as_ref().map_or(&[][..], |v| v.as_str().as_bytes()));

    Ok(w.written())
}

/// Decodes a meta record at `offset`, `None` if the region does not hold one.
pub fn decode_meta_record(buffer: &[u8], offset: usize) -> Option<MetaRecord> {
    let mut r = Reader::new(buffer, offset)?;
    let block_length = r.header(META_TEMPLATE_ID, META_BLOCK_LENGTH)?;

    let term = Term::new(r.u64()?);
    let last_flushed_index = LogIndex::new(r.u64()?);
    let commit_index = LogIndex::new(r.u64()?);
    let flags = r.u8()?;
    r.skip(block_length - META_BLOCK_LENGTH as usize)?;

    let vote = r.var_string()?;
    let vote = if flags & FLAG_VOTE != 0 {
        Some(MemberId::new(vote))
    } else {
        None
    };

    Some(MetaRecord {
        term,
        vote,
        last_flushed_index,
        commit_index: (flags & FLAG_COMMIT_INDEX != 0).then_some(commit_index),
    })
}

/// Encodes the configuration at `offset`, returning the number of bytes written.
pub fn encode_configuration(
    config: &Configuration,
    buffer: &mut [u8],
    offset: usize,
) -> Result<usize, CodecError> {
    for members in [&config.new_members, &config.old_members] {
        if members.len() > MAX_GROUP_COUNT {
            return Err(CodecError::TooManyMembers {
                count: members.len(),
                max: MAX_GROUP_COUNT,
            });
        }
        for member in members.iter() {
            check_id_length(&member.id)?;
        }
    }

    let required = configuration_encoded_length(config);
    let mut w = Writer::new(buffer, offset, required)?;

    w.put_header(CONFIGURATION_BLOCK_LENGTH, CONFIGURATION_TEMPLATE_ID);
    w.put_u64(config.index.as_u64());
    w.put_u64(config.term.as_u64());
    w.put_i64(config.time.as_millis());
    w.put_members(&config.new_members);
    w.put_members(&config.old_members);

    Ok(w.written())
}

/// Decodes a configuration at `offset`, `None` if the region does not hold one.
pub fn decode_configuration(buffer: &[u8], offset: usize) -> Option<Configuration> {
    let mut r = Reader::new(buffer, offset)?;
    let block_length = r.header(CONFIGURATION_TEMPLATE_ID, CONFIGURATION_BLOCK_LENGTH)?;

    let index = LogIndex::new(r.u64()?);
    let term = Term::new(r.u64()?);
    let time = Timestamp::from_millis(r.i64()?);
    r.skip(block_length - CONFIGURATION_BLOCK_LENGTH as usize)?;

    let new_members = r.members()?;
    let old_members = r.members()?;

    Some(Configuration {
        index,
        term,
        time,
        new_members,
        old_members,
    })
}

fn check_id_length(id: &MemberId) -> Result<(), CodecError> {
    let length = id.as_str().len();
    if length > MAX_MEMBER_ID_LENGTH {
        return Err(CodecError::MemberIdTooLong {
            length,
            max: MAX_MEMBER_ID_LENGTH,
        });
    }
    Ok(())
}

/// Cursor over a region whose size has been checked up front.
struct Writer<'a> {
    buf: &'a mut [u8],
    start: usize,
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8], offset: usize, required: usize) -> Result<Self, CodecError> {
        let available = buf.len().saturating_sub(offset);
        if required > available {
            return Err(CodecError::BufferTooSmall {
                required,
                available,
            });
        }
        Ok(Self {
            buf,
            start: offset,
            pos: offset,
        })
    }

    fn written(&self) -> usize {
        self.pos - self.start
    }

    fn put(&mut self, bytes: &[u8]) {
        let end = self.pos + bytes.len();
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
    }

    fn put_u8(&mut self, val: u8) {
        self.put(&[val]);
    }

    fn put_u16(&mut self, val: u16) {
        self.put(&val.to_le_bytes());
    }

    fn put_u64(&mut self, val: u64) {
        self.put(&val.to_le_bytes());
    }

    fn put_i64(&mut self, val: i64) {
        self.put(&val.to_le_bytes());
    }

    fn put_header(&mut self, block_length: u16, template_id: u16) {
        self.put_u16(block_length);
        self.put_u16(template_id);
        self.put_u16(SCHEMA_ID);
        self.put_u16(SCHEMA_VERSION);
    }

    // Lengths were bounded by check_id_length before the writer was created.
    fn put_var_data(&mut self, data: &[u8]) {
        self.put_u16(data.len() as u16);
        self.put(data);
    }

    fn put_members(&mut self, members: &[Member]) {
        self.put_u16(MEMBER_BLOCK_LENGTH);
        self.put_u16(members.len() as u16);
        for member in members {
            self.put_u8(member.role.code());
            self.put_i64(member.last_updated.as_millis());
            self.put_var_data(member.id.as_str().as_bytes());
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], offset: usize) -> Option<Self> {
        (offset <= buf.len()).then_some(Self { buf, pos: offset })
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let bytes = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2)?.try_into().ok().map(u16::from_le_bytes)
    }

    fn u64(&mut self) -> Option<u64> {
        self.take(8)?.try_into().ok().map(u64::from_le_bytes)
    }

    fn i64(&mut self) -> Option<i64> {
        self.take(8)?.try_into().ok().map(i64::from_le_bytes)
    }

    /// Reads and checks a header, returning the declared root block length.
    fn header(&mut self, template_id: u16, known_block_length: u16) -> Option<usize> {
        let block_length = self.u16()?;
        let actual_template = self.u16()?;
        let schema_id = self.u16()?;
        let version = self.u16()?;

        if actual_template != template_id
            || schema_id != SCHEMA_ID
            || version != SCHEMA_VERSION
            || block_length < known_block_length
        {
            return None;
        }
        Some(block_length as usize)
    }

    fn var_string(&mut self) -> Option<String> {
        let len = self.u16()? as usize;
        if len > MAX_MEMBER_ID_LENGTH {
            return None;
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    fn members(&mut self) -> Option<Vec<Member>> {
        let entry_block_length = self.u16()?;
        if entry_block_length < MEMBER_BLOCK_LENGTH {
            return None;
        }
        let count = self.u16()? as usize;

        let mut members = Vec::with_capacity(count);
        for _ in 0..count {
            let role = MemberRole::from_code(self.u8()?)?;
            let last_updated = Timestamp::from_millis(self.i64()?);
            self.skip((entry_block_length - MEMBER_BLOCK_LENGTH) as usize)?;
            let id = MemberId::new(self.var_string()?);
            members.push(Member {
                id,
                role,
                last_updated,
            });
        }
        Some(members)
    }
}
