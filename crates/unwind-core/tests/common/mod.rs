//! Synthetic NTFS images and test backends shared by the integration tests
#![allow(dead_code)]

use anyhow::bail;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;
use unwind_core::fs::ntfs::encode_data_runs;
use unwind_core::{ClusterRange, MftEntry, RecoveryBackend};

pub const CLUSTER_SIZE: usize = 4096;
pub const RECORD_SIZE: usize = 1024;
pub const MFT_LCN: u64 = 4;

pub const IN_USE: u16 = 0x01;
pub const DIRECTORY: u16 = 0x02;

/// One MFT record to place in a synthetic image
pub struct TestRecord {
    pub flags: u16,
    pub parent: u64,
    pub name: String,
    pub size: u64,
    pub runs: Vec<ClusterRange>,
}

impl TestRecord {
    pub fn dir(parent: u64, name: &str) -> Self {
        Self {
            flags: IN_USE | DIRECTORY,
            parent,
            name: name.to_string(),
            size: 0,
            runs: Vec::new(),
        }
    }

    pub fn deleted_file(parent: u64, name: &str, size: u64, runs: Vec<ClusterRange>) -> Self {
        Self {
            flags: 0,
            parent,
            name: name.to_string(),
            size,
            runs,
        }
    }
}

/// Encode a record with a FILE_NAME and, when it has runs, a non-resident DATA
/// attribute
pub fn encode_record(record: &TestRecord) -> Vec<u8> {
    let mut buf = vec![0u8; RECORD_SIZE];
    buf[..4].copy_from_slice(b"FILE");
    LittleEndian::write_u16(&mut buf[0x14..], 0x38);
    LittleEndian::write_u16(&mut buf[0x16..], record.flags);

    let mut at = 0x38;

    // FILE_NAME, resident, content at +0x18
    let units: Vec<u16> = record.name.encode_utf16().collect();
    let length = (0x18 + 0x42 + units.len() * 2 + 7) & !7;
    LittleEndian::write_u32(&mut buf[at..], 0x30);
    LittleEndian::write_u32(&mut buf[at + 4..], length as u32);
    LittleEndian::write_u16(&mut buf[at + 0x14..], 0x18);
    let content = at + 0x18;
    LittleEndian::write_u64(&mut buf[content..], record.parent | (1 << 48));
    buf[content + 0x40] = units.len() as u8;
    for (i, unit) in units.iter().enumerate() {
        LittleEndian::write_u16(&mut buf[content + 0x42 + i * 2..], *unit);
    }
    at += length;

    if !record.runs.is_empty() {
        let encoded = encode_data_runs(&record.runs);
        let length = (0x40 + encoded.len() + 7) & !7;
        LittleEndian::write_u32(&mut buf[at..], 0x80);
        LittleEndian::write_u32(&mut buf[at + 4..], length as u32);
        buf[at + 8] = 1;
        LittleEndian::write_u16(&mut buf[at + 0x20..], 0x40);
        LittleEndian::write_u64(&mut buf[at + 0x30..], record.size);
        buf[at + 0x40..at + 0x40 + encoded.len()].copy_from_slice(&encoded);
        at += length;
    }

    LittleEndian::write_u32(&mut buf[at..], 0xFFFF_FFFF);
    buf
}

/// Builds an NTFS-like image: boot sector, MFT at `MFT_LCN`, data clusters
#[derive(Default)]
pub struct ImageBuilder {
    records: HashMap<u64, Vec<u8>>,
    clusters: HashMap<u64, Vec<u8>>,
    boot_mft_lcn: Option<u64>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(mut self, id: u64, record: TestRecord) -> Self {
        self.records.insert(id, encode_record(&record));
        self
    }

    /// A record slot filled with garbage (no `FILE` signature)
    pub fn bad_record(mut self, id: u64) -> Self {
        self.records.insert(id, vec![0xEE; RECORD_SIZE]);
        self
    }

    /// Write a different MFT LCN into the boot sector; records stay at `MFT_LCN`
    pub fn boot_mft_lcn(mut self, lcn: u64) -> Self {
        self.boot_mft_lcn = Some(lcn);
        self
    }

    pub fn cluster(mut self, lcn: u64, data: &[u8]) -> Self {
        self.clusters.insert(lcn, data.to_vec());
        self
    }

    pub fn build(self) -> NamedTempFile {
        let mft_records = self.records.keys().max().map_or(0, |max| max + 1);
        let mft_end = MFT_LCN as usize * CLUSTER_SIZE + mft_records as usize * RECORD_SIZE;
        let data_end = self
            .clusters
            .iter()
            .map(|(lcn, data)| *lcn as usize * CLUSTER_SIZE + data.len())
            .max()
            .unwrap_or(0);
        let mut image = vec![0u8; mft_end.max(data_end)];

        image[3..11].copy_from_slice(b"NTFS    ");
        LittleEndian::write_u16(&mut image[0x0B..], 512);
        image[0x0D] = (CLUSTER_SIZE / 512) as u8;
        LittleEndian::write_u64(&mut image[0x30..], self.boot_mft_lcn.unwrap_or(MFT_LCN));
        image[0x40] = (-10i8) as u8;

        for (id, record) in &self.records {
            let offset = MFT_LCN as usize * CLUSTER_SIZE + *id as usize * RECORD_SIZE;
            image[offset..offset + RECORD_SIZE].copy_from_slice(record);
        }
        for (lcn, data) in &self.clusters {
            let offset = *lcn as usize * CLUSTER_SIZE;
            image[offset..offset + data.len()].copy_from_slice(data);
        }

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&image).unwrap();
        file.flush().unwrap();
        file
    }
}

/// Writes a fixed number of bytes per entry id; unknown ids fail
#[derive(Clone, Default)]
pub struct FixedBytesBackend {
    sizes: HashMap<u64, usize>,
    pub calls: Arc<AtomicUsize>,
}

impl FixedBytesBackend {
    pub fn new(sizes: &[(u64, usize)]) -> Self {
        Self {
            sizes: sizes.iter().copied().collect(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RecoveryBackend for FixedBytesBackend {
    fn name(&self) -> &str {
        "fixed-bytes"
    }

    fn recover_entry(&self, entry: &MftEntry, destination: &Path) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.sizes.get(&entry.id) {
            Some(&len) => {
                std::fs::write(destination, vec![b'r'; len])?;
                Ok(())
            }
            None => bail!("no content for entry {}", entry.id),
        }
    }
}
