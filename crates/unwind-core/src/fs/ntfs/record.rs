/// MFT file record parsing
use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use encoding_rs::UTF_16LE;
use serde::{Deserialize, Serialize};

use super::runs::decode_data_runs;
use super::{attribute, file_name, header, is_file_record, ScanConfig};
use crate::fs::common::ClusterRange;

/// Standard information timestamps.
///
/// The parser does not decode `$STANDARD_INFORMATION`, so every field is
/// left as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryTimestamps {
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub mft_modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
}

/// One named MFT record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MftEntry {
    /// MFT record index
    pub id: u64,
    /// Record index of the parent directory (low 48 bits of the reference)
    pub parent_id: u64,
    pub name: String,
    /// Logical length in bytes
    pub size: u64,
    pub is_directory: bool,
    /// The in-use flag was clear
    pub is_deleted: bool,
    pub data_runs: Vec<ClusterRange>,
    pub timestamps: EntryTimestamps,
}

impl MftEntry {
    /// The record points at its own index as parent
    pub fn is_self_parented(&self) -> bool {
        self.id == self.parent_id
    }

    /// Deleted and still mapped to clusters on disk
    pub fn is_recoverable(&self) -> bool {
        self.is_deleted && !self.data_runs.is_empty()
    }
}

fn read_u8(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    buf.get(offset..offset.checked_add(2)?)
        .map(LittleEndian::read_u16)
}

fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    buf.get(offset..offset.checked_add(4)?)
        .map(LittleEndian::read_u32)
}

fn read_u48(buf: &[u8], offset: usize) -> Option<u64> {
    buf.get(offset..offset.checked_add(6)?)
        .map(LittleEndian::read_u48)
}

fn read_u64(buf: &[u8], offset: usize) -> Option<u64> {
    buf.get(offset..offset.checked_add(8)?)
        .map(LittleEndian::read_u64)
}

/// Fields gathered while walking the attribute list
#[derive(Default)]
struct AttributeFields {
    name: String,
    parent_id: u64,
    size: u64,
    data_runs: Vec<ClusterRange>,
}

impl AttributeFields {
    /// Walk the attribute list, stopping at the end marker, at an implausible
    /// header, or at the first read outside the buffer.
    fn walk(buf: &[u8], config: &ScanConfig) -> Self {
        let mut fields = AttributeFields::default();
        fields.walk_attributes(buf, config);
        fields
    }

    fn walk_attributes(&mut self, buf: &[u8], config: &ScanConfig) -> Option<()> {
        let mut offset = read_u16(buf, header::FIRST_ATTRIBUTE_OFFSET)? as usize;

        while offset + 4 < buf.len() {
            let attr_type = read_u32(buf, offset + attribute::TYPE)?;
            if attr_type >= attribute::END {
                break;
            }

            let length = read_u32(buf, offset + attribute::LENGTH)?;
            if length == 0 || length > config.max_attribute_length {
                break;
            }

            let non_resident = read_u8(buf, offset + attribute::NON_RESIDENT_FLAG)? != 0;

            match attr_type {
                attribute::FILE_NAME if !non_resident => self.read_file_name(buf, offset)?,
                attribute::DATA if non_resident => self.read_non_resident_data(buf, offset)?,
                attribute::DATA => {
                    self.size = read_u32(buf, offset + attribute::RESIDENT_DATA_SIZE)? as u64;
                }
                _ => {}
            }

            offset += length as usize;
        }

        Some(())
    }

    fn read_file_name(&mut self, buf: &[u8], attr_offset: usize) -> Option<()> {
        let content_offset = read_u16(buf, attr_offset + attribute::RESIDENT_DATA_OFFSET)?;
        let content = attr_offset + content_offset as usize;

        self.parent_id = read_u48(buf, content + file_name::PARENT_REFERENCE)?;

        let name_units = read_u8(buf, content + file_name::NAME_LENGTH)? as usize;
        let name_start = (content + file_name::NAME_DATA).min(buf.len());
        let name_end = (name_start + name_units * 2).min(buf.len());

        let (decoded, _) = UTF_16LE.decode_without_bom_handling(&buf[name_start..name_end]);
        self.name = decoded.replace('\0', "");
        Some(())
    }

    fn read_non_resident_data(&mut self, buf: &[u8], attr_offset: usize) -> Option<()> {
        // Real size, not the allocated size at 0x28
        self.size = read_u64(buf, attr_offset + attribute::REAL_SIZE).unwrap_or(0);

        let runs_offset = read_u16(buf, attr_offset + attribute::DATA_RUNS_OFFSET)? as usize;
        self.data_runs
            .extend(decode_data_runs(buf, attr_offset + runs_offset));
        Some(())
    }
}

/// Decode one MFT record buffer.
///
/// Returns `None` for a record without the `FILE` signature or without a
/// resolvable name. A truncated or corrupted attribute list never panics; the
/// fields read before the bad attribute are kept.
pub fn parse_mft_record(buf: &[u8], entry_number: u64, config: &ScanConfig) -> Option<MftEntry> {
    if !is_file_record(buf) {
        return None;
    }

    let flags = read_u16(buf, header::FLAGS)?;
    let fields = AttributeFields::walk(buf, config);

    if fields.name.is_empty() {
        tracing::debug!("MFT record {} has no file name, skipped", entry_number);
        return None;
    }

    Some(MftEntry {
        id: entry_number,
        parent_id: fields.parent_id,
        name: fields.name,
        size: fields.size,
        is_directory: flags & header::FLAG_DIRECTORY != 0,
        is_deleted: flags & header::FLAG_IN_USE == 0,
        data_runs: fields.data_runs,
        timestamps: EntryTimestamps::default(),
    })
}
