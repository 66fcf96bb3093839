use std::io::{self, Cursor, Read, Seek, SeekFrom};

use aes::{
    cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit},
    Aes128,
};
use binrw::BinReaderExt;
use sha1::{Digest, Sha1};

use crate::{
    decompress::Decompressor,
    structs::{
        parse_group_entries, parse_partition_entries, parse_raw_data_entries, CompressionType,
        DiscType, GroupEntry, Header1, Header2, HashExceptionEntry, PartitionEntry, RawDataEntry,
        GROUP_ENTRY_SIZE, HASH_EXCEPTION_ENTRY_SIZE, HEADER_1_HASH_OFFSET, HEADER_1_SIZE,
        HEADER_2_SIZE, PARTITION_ENTRY_SIZE, RAW_DATA_ENTRY_SIZE,
    },
    version_to_string, ErrorKind, WiaError, EXCEPTION_TERRITORY_SIZE, SECTORS_PER_TERRITORY,
    SECTOR_DATA_SIZE, SECTOR_HASH_SIZE, SECTOR_SIZE, WIA_MAGIC, WIA_VERSION,
    WIA_VERSION_READ_COMPATIBLE,
};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// Read-only view of a WIA file as the logical disc image it stands in for.
///
/// Opening validates the headers and loads the partition, raw-data and group
/// tables; the reader then owns the file handle exclusively. The first
/// corrupt-data or io failure poisons the reader, later reads report the
/// same error kind.
pub struct WiaReader<RS: Read + Seek> {
    file: RS,
    header_1: Header1,
    header_2: Header2,
    disc_type: DiscType,
    compression: CompressionType,
    partitions: Vec<PartitionEntry>,
    raw_data: Vec<RawDataEntry>,
    groups: Vec<GroupEntry>,
    poisoned: Option<ErrorKind>,
}

#[derive(Clone, Copy)]
enum RegionKind {
    Raw,
    /// unhashed trailing region of a partition
    Unhashed,
    /// hashed partition data, the index selects the key
    Hashed { partition: usize },
}

/// one contiguous stretch of the disc image backed by a run of groups
#[derive(Clone, Copy)]
struct RegionSpan {
    start: u64,
    end: u64,
    /// where chunk counting starts: `start` aligned down to the chunk size
    chunk_origin: u64,
    group_index: u32,
    kind: RegionKind,
}

/// decompressed content of one group
struct GroupData {
    exceptions: Vec<Vec<HashExceptionEntry>>,
    payload: Vec<u8>,
}

impl<RS: Read + Seek> WiaReader<RS> {
    pub fn open(mut rs: RS) -> Result<Self, WiaError> {
        rs.seek(SeekFrom::Start(0))?;
        let mut header_1_bytes = [0u8; HEADER_1_SIZE];
        rs.read_exact(&mut header_1_bytes)?;
        if header_1_bytes[..4] != WIA_MAGIC.to_le_bytes() {
            return Err(WiaError::BadMagic);
        }
        let header_1: Header1 = Cursor::new(&header_1_bytes[..])
            .read_be()
            .map_err(|_| WiaError::MalformedHeader("header 1"))?;
        let mut hashed = header_1_bytes;
        hashed[HEADER_1_HASH_OFFSET..].fill(0);
        if Sha1::digest(hashed).as_slice() != &header_1.header_1_hash[..] {
            return Err(WiaError::HashMismatch("header 1"));
        }
        if header_1.version_compatible < WIA_VERSION_READ_COMPATIBLE
            || header_1.version_compatible > WIA_VERSION
        {
            return Err(WiaError::IncompatibleVersion {
                file: version_to_string(header_1.version_compatible),
                reader: version_to_string(WIA_VERSION),
            });
        }

        if (header_1.header_2_size as usize) < HEADER_2_SIZE {
            return Err(WiaError::MalformedHeader("header 2 size"));
        }
        let mut header_2_bytes = vec![0u8; header_1.header_2_size as usize];
        rs.read_exact(&mut header_2_bytes)?;
        if Sha1::digest(&header_2_bytes).as_slice() != &header_1.header_2_hash[..] {
            return Err(WiaError::HashMismatch("header 2"));
        }
        let header_2: Header2 = Cursor::new(&header_2_bytes[..])
            .read_be()
            .map_err(|_| WiaError::MalformedHeader("header 2"))?;

        let disc_type = DiscType::from_u32(header_2.disc_type)
            .ok_or(WiaError::UnsupportedDiscType(header_2.disc_type))?;
        let compression = CompressionType::from_u32(header_2.compression_type)
            .ok_or(WiaError::UnsupportedCompression(header_2.compression_type))?;
        let chunk_size = header_2.chunk_size as u64;
        if chunk_size < SECTOR_SIZE
            || chunk_size % SECTOR_SIZE != 0
            || !(chunk_size / SECTOR_SIZE).is_power_of_two()
        {
            return Err(WiaError::MalformedHeader("chunk size"));
        }
        if header_2.compressor_data_size as usize > 7 {
            return Err(WiaError::MalformedHeader("compressor data size"));
        }
        match compression {
            CompressionType::Lzma if header_2.compressor_data_size != 5 => {
                return Err(WiaError::MalformedHeader("lzma properties"));
            }
            CompressionType::Lzma2 if header_2.compressor_data_size != 1 => {
                return Err(WiaError::MalformedHeader("lzma2 properties"));
            }
            _ => {}
        }

        // partition table, stored uncompressed with its own hash
        let partition_count = header_2.number_of_partition_entries as usize;
        let partition_entry_size = header_2.partition_entry_size as usize;
        let partitions = if partition_count == 0 {
            Vec::new()
        } else {
            if partition_entry_size < PARTITION_ENTRY_SIZE {
                return Err(WiaError::MalformedHeader("partition entry size"));
            }
            let table_size = partition_count
                .checked_mul(partition_entry_size)
                .ok_or(WiaError::MalformedHeader("partition entry size"))?;
            rs.seek(SeekFrom::Start(header_2.partition_entries_offset))?;
            let mut table = vec![0u8; table_size];
            rs.read_exact(&mut table)?;
            if Sha1::digest(&table).as_slice() != &header_2.partition_entries_hash[..] {
                return Err(WiaError::HashMismatch("partition table"));
            }
            parse_partition_entries(&table, partition_count, partition_entry_size)?
        };

        // raw data and group tables go through the file's compressor
        let raw_data_count = header_2.number_of_raw_data_entries as usize;
        let raw_data_table = read_compressed_table(
            &mut rs,
            compression,
            header_2.compressor_data(),
            "raw data",
            header_2.raw_data_entries_offset,
            header_2.raw_data_entries_size,
            raw_data_count
                .checked_mul(RAW_DATA_ENTRY_SIZE)
                .ok_or(WiaError::MalformedHeader("raw data table size"))?,
        )?;
        let raw_data = parse_raw_data_entries(&raw_data_table, raw_data_count)?;

        let group_count = header_2.number_of_group_entries as usize;
        let group_table = read_compressed_table(
            &mut rs,
            compression,
            header_2.compressor_data(),
            "group",
            header_2.group_entries_offset,
            header_2.group_entries_size,
            group_count
                .checked_mul(GROUP_ENTRY_SIZE)
                .ok_or(WiaError::MalformedHeader("group table size"))?,
        )?;
        let groups = parse_group_entries(&group_table, group_count)?;

        // every entry has to agree with the chunk geometry
        for (index, entry) in raw_data.iter().enumerate() {
            if entry.data_size == 0 {
                continue;
            }
            if entry.data_offset.checked_add(entry.data_size).is_none() {
                return Err(WiaError::MalformedTable {
                    what: "raw data",
                    index,
                });
            }
            let covered = entry.data_offset % chunk_size + entry.data_size;
            if covered.div_ceil(chunk_size) != entry.number_of_groups as u64
                || entry.group_index as u64 + entry.number_of_groups as u64 > groups.len() as u64
            {
                return Err(WiaError::MalformedTable {
                    what: "raw data",
                    index,
                });
            }
        }
        let sectors_per_chunk = chunk_size / SECTOR_SIZE;
        for (index, partition) in partitions.iter().enumerate() {
            for data in &partition.data_entries {
                if data.number_of_sectors == 0 {
                    continue;
                }
                if (data.number_of_sectors as u64).div_ceil(sectors_per_chunk)
                    != data.number_of_groups as u64
                    || data.group_index as u64 + data.number_of_groups as u64
                        > groups.len() as u64
                {
                    return Err(WiaError::MalformedTable {
                        what: "partition",
                        index,
                    });
                }
            }
        }

        Ok(WiaReader {
            file: rs,
            header_1,
            header_2,
            disc_type,
            compression,
            partitions,
            raw_data,
            groups,
            poisoned: None,
        })
    }

    /// size of the uncompressed disc image
    pub fn data_size(&self) -> u64 {
        self.header_1.iso_file_size
    }

    /// size of the compressed file
    pub fn raw_size(&self) -> u64 {
        self.header_1.wia_file_size
    }

    pub fn block_size(&self) -> u32 {
        self.header_2.chunk_size
    }

    pub fn has_fast_random_access_in_block(&self) -> bool {
        false
    }

    pub fn version(&self) -> u32 {
        self.header_1.version
    }

    pub fn disc_type(&self) -> DiscType {
        self.disc_type
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    pub fn compression_level(&self) -> i32 {
        self.header_2.compression_level
    }

    pub fn game_title(&self) -> String {
        self.header_2.game_title()
    }

    pub fn partitions(&self) -> &[PartitionEntry] {
        &self.partitions
    }

    /// Reads `out.len()` bytes of the logical disc image starting at
    /// `offset`. Wii partition sectors come back encrypted, exactly like the
    /// original disc.
    pub fn read(&mut self, offset: u64, out: &mut [u8]) -> Result<(), WiaError> {
        if out.is_empty() {
            return Ok(());
        }
        self.check_poisoned()?;
        match self.read_inner(offset, out) {
            Ok(()) => Ok(()),
            Err(error) => Err(self.poison(error)),
        }
    }

    fn read_inner(&mut self, mut offset: u64, mut out: &mut [u8]) -> Result<(), WiaError> {
        let size = out.len() as u64;
        if offset
            .checked_add(size)
            .map_or(true, |end| end > self.header_1.iso_file_size)
        {
            return Err(WiaError::OutOfRange { offset, size });
        }
        let chunk_size = self.header_2.chunk_size as u64;
        while !out.is_empty() {
            let span = self.find_region(offset).ok_or(WiaError::OutOfRange {
                offset,
                size: out.len() as u64,
            })?;
            let chunk_index = (offset - span.chunk_origin) / chunk_size;
            let chunk_start = span.chunk_origin + chunk_index * chunk_size;
            // the first chunk of a raw entry can be trimmed on the left
            let window_start = chunk_start.max(span.start);
            let window_end = (chunk_start + chunk_size).min(span.end);
            let exception_lists = match span.kind {
                RegionKind::Raw => 0,
                _ => self.exception_lists_per_chunk(),
            };
            let group = self.load_group(
                span.group_index as u64 + chunk_index,
                window_end - window_start,
                exception_lists,
            )?;
            let skip = (offset - window_start) as usize;
            let take = (window_end - offset).min(out.len() as u64) as usize;
            let (fill, rest) = out.split_at_mut(take);
            match span.kind {
                RegionKind::Raw | RegionKind::Unhashed => {
                    fill.copy_from_slice(&group.payload[skip..][..take]);
                }
                RegionKind::Hashed { partition } => {
                    let key = self.partitions[partition].partition_key;
                    let sectors = reconstruct_encrypted_sectors(&group, &key)?;
                    fill.copy_from_slice(&sectors[skip..][..take]);
                }
            }
            out = rest;
            offset += take as u64;
        }
        Ok(())
    }

    /// True when the image is a wii disc with at least one hashed partition
    /// region to read cleartext from.
    pub fn supports_read_wii_decrypted(&self) -> bool {
        self.disc_type == DiscType::Wii
            && self
                .partitions
                .iter()
                .any(|partition| partition.data_entries[0].number_of_sectors != 0)
    }

    /// Reads cleartext partition payload, `offset` counted in the 0x7C00
    /// data bytes per sector of the partition whose hashed region starts at
    /// `partition_data_offset`. No hashes, no encryption.
    pub fn read_wii_decrypted(
        &mut self,
        offset: u64,
        out: &mut [u8],
        partition_data_offset: u64,
    ) -> Result<(), WiaError> {
        self.check_poisoned()?;
        match self.read_wii_decrypted_inner(offset, out, partition_data_offset) {
            Ok(()) => Ok(()),
            Err(error) => Err(self.poison(error)),
        }
    }

    fn read_wii_decrypted_inner(
        &mut self,
        mut offset: u64,
        mut out: &mut [u8],
        partition_data_offset: u64,
    ) -> Result<(), WiaError> {
        if self.disc_type != DiscType::Wii {
            return Err(WiaError::NotWiiPartitionData);
        }
        let data = self
            .partitions
            .iter()
            .map(|partition| partition.data_entries[0])
            .find(|data| {
                data.number_of_sectors != 0 && data.start_offset() == partition_data_offset
            })
            .ok_or(WiaError::NotWiiPartitionData)?;
        if out.is_empty() {
            return Ok(());
        }
        let data_len = data.number_of_sectors as u64 * SECTOR_DATA_SIZE;
        if offset
            .checked_add(out.len() as u64)
            .map_or(true, |end| end > data_len)
        {
            return Err(WiaError::NotWiiPartitionData);
        }
        let sectors_per_chunk = self.header_2.chunk_size as u64 / SECTOR_SIZE;
        let chunk_span = sectors_per_chunk * SECTOR_DATA_SIZE;
        let exception_lists = self.exception_lists_per_chunk();
        while !out.is_empty() {
            let chunk_index = offset / chunk_span;
            let chunk_start = chunk_index * chunk_span;
            let sectors_in_chunk = sectors_per_chunk
                .min(data.number_of_sectors as u64 - chunk_index * sectors_per_chunk);
            let chunk_end = chunk_start + sectors_in_chunk * SECTOR_DATA_SIZE;
            let group = self.load_group(
                data.group_index as u64 + chunk_index,
                sectors_in_chunk * SECTOR_SIZE,
                exception_lists,
            )?;
            let skip = (offset - chunk_start) as usize;
            let take = (chunk_end - offset).min(out.len() as u64) as usize;
            let (fill, rest) = out.split_at_mut(take);
            // the data portions sit at the front of the chunk payload
            fill.copy_from_slice(&group.payload[skip..][..take]);
            out = rest;
            offset += take as u64;
        }
        Ok(())
    }

    /// Wraps the reader into an [`io::Read`] + [`io::Seek`] view of the
    /// logical disc image.
    pub fn into_stream(self) -> WiaStream<RS> {
        WiaStream {
            reader: self,
            position: 0,
        }
    }

    fn check_poisoned(&self) -> Result<(), WiaError> {
        match self.poisoned {
            Some(kind) => Err(WiaError::Poisoned(kind)),
            None => Ok(()),
        }
    }

    fn poison(&mut self, error: WiaError) -> WiaError {
        let kind = error.kind();
        if matches!(kind, ErrorKind::Corrupt | ErrorKind::Io) {
            self.poisoned = Some(kind);
        }
        error
    }

    fn exception_lists_per_chunk(&self) -> u32 {
        (self.header_2.chunk_size as u64 / EXCEPTION_TERRITORY_SIZE).max(1) as u32
    }

    fn find_region(&self, offset: u64) -> Option<RegionSpan> {
        let chunk_size = self.header_2.chunk_size as u64;
        for entry in &self.raw_data {
            if entry.data_size != 0
                && offset >= entry.data_offset
                && offset < entry.end_offset()
            {
                return Some(RegionSpan {
                    start: entry.data_offset,
                    end: entry.end_offset(),
                    chunk_origin: entry.data_offset - entry.data_offset % chunk_size,
                    group_index: entry.group_index,
                    kind: RegionKind::Raw,
                });
            }
        }
        for (index, partition) in self.partitions.iter().enumerate() {
            for (data_index, data) in partition.data_entries.iter().enumerate() {
                if data.number_of_sectors != 0
                    && offset >= data.start_offset()
                    && offset < data.end_offset()
                {
                    return Some(RegionSpan {
                        start: data.start_offset(),
                        end: data.end_offset(),
                        chunk_origin: data.start_offset(),
                        group_index: data.group_index,
                        kind: if data_index == 0 {
                            RegionKind::Hashed { partition: index }
                        } else {
                            RegionKind::Unhashed
                        },
                    });
                }
            }
        }
        None
    }

    /// Loads one group: reads its stored bytes, opens the decompressor,
    /// consumes the exception sublists and pulls `payload_size` bytes of
    /// chunk payload.
    fn load_group(
        &mut self,
        group_index: u64,
        payload_size: u64,
        exception_lists: u32,
    ) -> Result<GroupData, WiaError> {
        let group = *self
            .groups
            .get(group_index as usize)
            .ok_or(WiaError::MalformedTable {
                what: "group",
                index: group_index as usize,
            })?;
        let group_id = group_index as u32;
        let mut decompressor = if group.is_zeroed() {
            Decompressor::zero()
        } else {
            let mut stored = vec![0u8; group.compressed_size as usize];
            self.file.seek(SeekFrom::Start(group.file_offset()))?;
            self.file.read_exact(&mut stored)?;
            Decompressor::new(
                self.compression,
                stored,
                self.header_2.compressor_data(),
                payload_size,
                exception_lists,
            )?
        };

        let mut exceptions = Vec::with_capacity(exception_lists as usize);
        let mut consumed = 0usize;
        for _ in 0..exception_lists {
            let mut count_bytes = [0u8; 2];
            decompressor
                .read_exact(&mut count_bytes)
                .map_err(|_| WiaError::TruncatedGroup(group_id))?;
            let count = u16::from_be_bytes(count_bytes);
            let mut list = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let mut entry = [0u8; HASH_EXCEPTION_ENTRY_SIZE];
                decompressor
                    .read_exact(&mut entry)
                    .map_err(|_| WiaError::TruncatedGroup(group_id))?;
                list.push(HashExceptionEntry {
                    offset: u16::from_be_bytes([entry[0], entry[1]]),
                    hash: entry[2..].try_into().unwrap(),
                });
            }
            consumed += 2 + count as usize * HASH_EXCEPTION_ENTRY_SIZE;
            exceptions.push(list);
        }
        if exception_lists > 0 && self.compression == CompressionType::None {
            // uncompressed chunks pad the exception region to 4 bytes
            let padding = (4 - consumed % 4) % 4;
            let mut skipped = [0u8; 3];
            decompressor
                .read_exact(&mut skipped[..padding])
                .map_err(|_| WiaError::TruncatedGroup(group_id))?;
        }

        let mut payload = vec![0u8; payload_size as usize];
        decompressor
            .read_exact(&mut payload)
            .map_err(|_| WiaError::TruncatedGroup(group_id))?;
        Ok(GroupData {
            exceptions,
            payload,
        })
    }
}

fn read_compressed_table<RS: Read + Seek>(
    file: &mut RS,
    compression: CompressionType,
    compressor_data: &[u8],
    what: &'static str,
    offset: u64,
    stored_size: u32,
    table_size: usize,
) -> Result<Vec<u8>, WiaError> {
    if table_size == 0 {
        return Ok(Vec::new());
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut stored = vec![0u8; stored_size as usize];
    file.read_exact(&mut stored)?;
    let mut decompressor =
        Decompressor::new(compression, stored, compressor_data, table_size as u64, 0)?;
    let mut table = vec![0u8; table_size];
    decompressor
        .read_exact(&mut table)
        .map_err(|_| WiaError::TableRead(what))?;
    Ok(table)
}

/// Rebuilds the encrypted sectors of one hashed-region group: the stored
/// hash block is patched with the exception entries, then every sector is
/// encrypted the way the console expects it, hashes first with a zero IV,
/// data keyed on the encrypted hash bytes 0x3D0..0x3E0.
fn reconstruct_encrypted_sectors(
    group: &GroupData,
    key: &[u8; 16],
) -> Result<Vec<u8>, WiaError> {
    let sector_count = group.payload.len() / SECTOR_SIZE as usize;
    let data_size = sector_count * SECTOR_DATA_SIZE as usize;
    let territory_hash_size = (SECTORS_PER_TERRITORY * SECTOR_HASH_SIZE) as usize;

    let mut hashes = group.payload[data_size..].to_vec();
    for (territory, list) in group.exceptions.iter().enumerate() {
        for exception in list {
            let at = territory * territory_hash_size + exception.offset as usize;
            if at + 20 > hashes.len() {
                return Err(WiaError::BadExceptionOffset(exception.offset));
            }
            hashes[at..at + 20].copy_from_slice(&exception.hash);
        }
    }

    let mut out = vec![0u8; group.payload.len()];
    for sector in 0..sector_count {
        let out_sector = &mut out[sector * SECTOR_SIZE as usize..][..SECTOR_SIZE as usize];
        out_sector[..0x400].copy_from_slice(&hashes[sector * 0x400..][..0x400]);
        out_sector[0x400..]
            .copy_from_slice(&group.payload[sector * 0x7C00..][..0x7C00]);
        Aes128CbcEnc::new(key.into(), [0u8; 16].as_ref().into())
            .encrypt_padded_mut::<NoPadding>(&mut out_sector[..0x400], 0x400)
            .unwrap();
        let data_iv: [u8; 16] = out_sector[0x3D0..0x3E0].try_into().unwrap();
        Aes128CbcEnc::new(key.into(), data_iv.as_ref().into())
            .encrypt_padded_mut::<NoPadding>(&mut out_sector[0x400..], 0x7C00)
            .unwrap();
    }
    Ok(out)
}

/// [`io::Read`] + [`io::Seek`] over the logical disc image of a
/// [`WiaReader`].
pub struct WiaStream<RS: Read + Seek> {
    reader: WiaReader<RS>,
    position: u64,
}

impl<RS: Read + Seek> WiaStream<RS> {
    pub fn get_ref(&self) -> &WiaReader<RS> {
        &self.reader
    }

    pub fn get_mut(&mut self) -> &mut WiaReader<RS> {
        &mut self.reader
    }

    pub fn into_inner(self) -> WiaReader<RS> {
        self.reader
    }
}

impl<RS: Read + Seek> Read for WiaStream<RS> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.reader.data_size().saturating_sub(self.position);
        let count = (buf.len() as u64).min(remaining) as usize;
        if count == 0 {
            return Ok(0);
        }
        self.reader
            .read(self.position, &mut buf[..count])
            .map_err(io::Error::other)?;
        self.position += count as u64;
        Ok(count)
    }
}

impl<RS: Read + Seek> Seek for WiaStream<RS> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::End(offset) => self.reader.data_size().saturating_add_signed(offset),
            SeekFrom::Current(offset) => self.position.saturating_add_signed(offset),
        };
        Ok(self.position)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.position)
    }
}

#[cfg(test)]
mod test {
    use aes::cipher::BlockDecryptMut;

    use super::*;

    type Aes128CbcDec = cbc::Decryptor<Aes128>;

    fn decrypt_sector(sector: &mut [u8], key: &[u8; 16]) {
        let data_iv: [u8; 16] = sector[0x3D0..0x3E0].try_into().unwrap();
        Aes128CbcDec::new(key.into(), data_iv.as_ref().into())
            .decrypt_padded_mut::<NoPadding>(&mut sector[0x400..])
            .unwrap();
        Aes128CbcDec::new(key.into(), [0u8; 16].as_ref().into())
            .decrypt_padded_mut::<NoPadding>(&mut sector[..0x400])
            .unwrap();
    }

    #[test]
    fn reconstructed_sector_decrypts_to_patched_cleartext() {
        let key = [7u8; 16];
        let data: Vec<u8> = (0..0x7C00u32).map(|i| (i % 0xFF) as u8).collect();
        let hash_area = vec![0x11u8; 0x400];
        let mut payload = data.clone();
        payload.extend_from_slice(&hash_area);

        let exception = HashExceptionEntry {
            offset: 0x40,
            hash: [0xAB; 20],
        };
        let group = GroupData {
            exceptions: vec![vec![exception]],
            payload,
        };

        let mut sectors = reconstruct_encrypted_sectors(&group, &key).unwrap();
        assert_eq!(sectors.len(), 0x8000);
        // must not come out as cleartext
        assert_ne!(&sectors[0x400..0x410], &data[..0x10]);

        decrypt_sector(&mut sectors, &key);
        assert_eq!(&sectors[0x400..], &data[..]);
        let mut expected_hashes = hash_area;
        expected_hashes[0x40..0x54].copy_from_slice(&[0xAB; 20]);
        assert_eq!(&sectors[..0x400], &expected_hashes[..]);
    }

    #[test]
    fn exception_outside_hash_area_is_rejected() {
        let group = GroupData {
            exceptions: vec![vec![HashExceptionEntry {
                offset: 0x3F0,
                hash: [0; 20],
            }]],
            payload: vec![0; 0x8000],
        };
        assert!(matches!(
            reconstruct_encrypted_sectors(&group, &[0; 16]),
            Err(WiaError::BadExceptionOffset(0x3F0))
        ));
    }

    #[test]
    fn second_territory_patches_later_sectors() {
        // 0x41 sectors so the second sublist owns the last sector
        let sector_count = 0x41usize;
        let mut payload = vec![0u8; sector_count * 0x8000];
        let data_size = sector_count * 0x7C00;
        payload[..data_size].fill(0x22);

        let group = GroupData {
            exceptions: vec![
                Vec::new(),
                vec![HashExceptionEntry {
                    offset: 0,
                    hash: [0xCD; 20],
                }],
            ],
            payload,
        };
        let key = [3u8; 16];
        let mut sectors = reconstruct_encrypted_sectors(&group, &key).unwrap();
        let last = &mut sectors[0x40 * 0x8000..][..0x8000];
        decrypt_sector(last, &key);
        assert_eq!(&last[..20], &[0xCD; 20]);
    }
}
