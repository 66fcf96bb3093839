//! On-disk structures of the WIA container. Everything multi-byte is stored
//! big-endian and read through binrw, the magic is the one exception (it
//! compares as a little-endian u32 against [`crate::WIA_MAGIC`]).

use std::io::Cursor;

use binrw::{binrw, BinReaderExt};

use crate::{WiaError, SECTOR_SIZE};

/// first 0x48 bytes of the file
#[binrw]
#[derive(Debug, Clone)]
pub struct Header1 {
    pub magic: [u8; 4],
    pub version: u32,
    pub version_compatible: u32,
    pub header_2_size: u32,
    pub header_2_hash: [u8; 20],
    pub iso_file_size: u64,
    pub wia_file_size: u64,
    pub header_1_hash: [u8; 20],
}

/// number of bytes [`Header1`] occupies
pub const HEADER_1_SIZE: usize = 0x48;
/// offset of the hash field inside [`Header1`], zeroed while hashing
pub const HEADER_1_HASH_OFFSET: usize = 0x34;
/// number of bytes [`Header2`] occupies
pub const HEADER_2_SIZE: usize = 0xDC;

/// 0xDC bytes following [`Header1`], describing compression and the three
/// lookup tables
#[binrw]
#[derive(Debug, Clone)]
pub struct Header2 {
    pub disc_type: u32,
    pub compression_type: u32,
    pub compression_level: i32,
    pub chunk_size: u32,
    /// verbatim copy of the first 0x80 bytes of the uncompressed disc
    pub disc_header: [u8; 0x80],
    pub number_of_partition_entries: u32,
    pub partition_entry_size: u32,
    pub partition_entries_offset: u64,
    pub partition_entries_hash: [u8; 20],
    pub number_of_raw_data_entries: u32,
    pub raw_data_entries_offset: u64,
    pub raw_data_entries_size: u32,
    pub number_of_group_entries: u32,
    pub group_entries_offset: u64,
    pub group_entries_size: u32,
    pub compressor_data_size: u8,
    pub compressor_data: [u8; 7],
}

impl Header2 {
    pub fn compressor_data(&self) -> &[u8] {
        &self.compressor_data[..(self.compressor_data_size as usize).min(7)]
    }

    /// game title embedded in the copied disc header, 0x20..0x60
    pub fn game_title(&self) -> String {
        let raw = &self.disc_header[0x20..0x60];
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        let (title, _, _) = encoding_rs::SHIFT_JIS.decode(&raw[..end]);
        title.into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscType {
    GameCube,
    Wii,
}

impl DiscType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(DiscType::GameCube),
            2 => Some(DiscType::Wii),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Purge,
    Bzip2,
    Lzma,
    Lzma2,
}

impl CompressionType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Purge),
            2 => Some(CompressionType::Bzip2),
            3 => Some(CompressionType::Lzma),
            4 => Some(CompressionType::Lzma2),
            _ => None,
        }
    }
}

/// half of a [`PartitionEntry`]: either the hashed data region or the
/// unhashed trailing region of a wii partition
#[binrw]
#[derive(Debug, Clone, Copy)]
pub struct PartitionDataEntry {
    /// in units of 0x8000 cleartext sectors from the start of the disc
    pub first_sector: u32,
    pub number_of_sectors: u32,
    pub group_index: u32,
    pub number_of_groups: u32,
}

impl PartitionDataEntry {
    pub fn start_offset(&self) -> u64 {
        self.first_sector as u64 * SECTOR_SIZE
    }

    pub fn end_offset(&self) -> u64 {
        (self.first_sector as u64 + self.number_of_sectors as u64) * SECTOR_SIZE
    }
}

#[binrw]
#[derive(Debug, Clone)]
pub struct PartitionEntry {
    pub partition_key: [u8; 16],
    pub data_entries: [PartitionDataEntry; 2],
}

/// number of bytes of a [`PartitionEntry`] this reader interprets
pub const PARTITION_ENTRY_SIZE: usize = 0x30;

/// one stretch of disc bytes not owned by any partition
#[binrw]
#[derive(Debug, Clone, Copy)]
pub struct RawDataEntry {
    pub data_offset: u64,
    pub data_size: u64,
    pub group_index: u32,
    pub number_of_groups: u32,
}

pub const RAW_DATA_ENTRY_SIZE: usize = 0x18;

impl RawDataEntry {
    pub fn end_offset(&self) -> u64 {
        self.data_offset + self.data_size
    }
}

/// one addressable compressed unit of the file
#[binrw]
#[derive(Debug, Clone, Copy)]
pub struct GroupEntry {
    pub file_offset_shr2: u32,
    pub compressed_size: u32,
}

pub const GROUP_ENTRY_SIZE: usize = 0x08;

impl GroupEntry {
    pub fn file_offset(&self) -> u64 {
        (self.file_offset_shr2 as u64) << 2
    }

    /// a group without stored bytes decompresses to zeros
    pub fn is_zeroed(&self) -> bool {
        self.compressed_size == 0
    }
}

/// one patched hash inside the 0x400-byte hash areas of a sector territory
#[binrw]
#[derive(Debug, Clone)]
pub struct HashExceptionEntry {
    pub offset: u16,
    pub hash: [u8; 20],
}

pub const HASH_EXCEPTION_ENTRY_SIZE: usize = 22;

/// header of one stored run inside a purge stream
#[binrw]
#[derive(Debug, Clone, Copy)]
pub struct PurgeSegment {
    pub offset: u32,
    pub size: u32,
}

pub fn parse_partition_entries(
    bytes: &[u8],
    count: usize,
    entry_size: usize,
) -> Result<Vec<PartitionEntry>, WiaError> {
    let mut entries = Vec::with_capacity(count);
    for index in 0..count {
        let record = bytes
            .get(index * entry_size..index * entry_size + PARTITION_ENTRY_SIZE)
            .ok_or(WiaError::MalformedTable {
                what: "partition",
                index,
            })?;
        let entry = Cursor::new(record)
            .read_be()
            .map_err(|_| WiaError::MalformedTable {
                what: "partition",
                index,
            })?;
        entries.push(entry);
    }
    Ok(entries)
}

pub fn parse_raw_data_entries(bytes: &[u8], count: usize) -> Result<Vec<RawDataEntry>, WiaError> {
    let mut cursor = Cursor::new(bytes);
    let mut entries = Vec::with_capacity(count);
    for index in 0..count {
        let entry = cursor.read_be().map_err(|_| WiaError::MalformedTable {
            what: "raw data",
            index,
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

pub fn parse_group_entries(bytes: &[u8], count: usize) -> Result<Vec<GroupEntry>, WiaError> {
    let mut cursor = Cursor::new(bytes);
    let mut entries = Vec::with_capacity(count);
    for index in 0..count {
        let entry = cursor.read_be().map_err(|_| WiaError::MalformedTable {
            what: "group",
            index,
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use binrw::{BinReaderExt, BinWriterExt};

    use super::*;

    #[test]
    fn header_sizes() {
        let header_1 = Header1 {
            magic: *b"WIA\x01",
            version: crate::WIA_VERSION,
            version_compatible: crate::WIA_VERSION_READ_COMPATIBLE,
            header_2_size: HEADER_2_SIZE as u32,
            header_2_hash: [0; 20],
            iso_file_size: 0,
            wia_file_size: 0,
            header_1_hash: [0; 20],
        };
        let mut buf = Cursor::new(Vec::new());
        buf.write_be(&header_1).unwrap();
        assert_eq!(buf.into_inner().len(), HEADER_1_SIZE);

        let header_2 = Header2 {
            disc_type: 1,
            compression_type: 0,
            compression_level: 0,
            chunk_size: 0x200000,
            disc_header: [0; 0x80],
            number_of_partition_entries: 0,
            partition_entry_size: PARTITION_ENTRY_SIZE as u32,
            partition_entries_offset: 0,
            partition_entries_hash: [0; 20],
            number_of_raw_data_entries: 0,
            raw_data_entries_offset: 0,
            raw_data_entries_size: 0,
            number_of_group_entries: 0,
            group_entries_offset: 0,
            group_entries_size: 0,
            compressor_data_size: 0,
            compressor_data: [0; 7],
        };
        let mut buf = Cursor::new(Vec::new());
        buf.write_be(&header_2).unwrap();
        assert_eq!(buf.into_inner().len(), HEADER_2_SIZE);
    }

    #[test]
    fn group_entry_offsets() {
        let entry = GroupEntry {
            file_offset_shr2: 0x100,
            compressed_size: 0,
        };
        assert_eq!(entry.file_offset(), 0x400);
        assert!(entry.is_zeroed());
    }

    #[test]
    fn raw_data_entries_roundtrip() {
        let mut buf = Cursor::new(Vec::new());
        buf.write_be(&RawDataEntry {
            data_offset: 0x80,
            data_size: 0x1000,
            group_index: 3,
            number_of_groups: 1,
        })
        .unwrap();
        let bytes = buf.into_inner();
        assert_eq!(bytes.len(), RAW_DATA_ENTRY_SIZE);
        let parsed = parse_raw_data_entries(&bytes, 1).unwrap();
        assert_eq!(parsed[0].data_offset, 0x80);
        assert_eq!(parsed[0].end_offset(), 0x1080);
        assert!(parse_raw_data_entries(&bytes, 2).is_err());
    }

    #[test]
    fn game_title_is_decoded() {
        let mut header_2_bytes = vec![0u8; HEADER_2_SIZE];
        // disc_header starts at 0x10 within header 2, title at +0x20
        header_2_bytes[0x30..0x3A].copy_from_slice(b"TEST TITLE");
        let header_2: Header2 = Cursor::new(&header_2_bytes).read_be().unwrap();
        assert_eq!(header_2.game_title(), "TEST TITLE");
    }
}
