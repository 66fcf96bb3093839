//! The per-group decompressors. Every compression kind is pulled through the
//! same [`io::Read`] surface: the stream starts with the chunk's hash
//! exception sublists (when the region carries any) and continues with the
//! chunk payload. Pulling past the end of the stored stream yields zero
//! bytes, length tracking is the caller's job.

use std::io::{self, Cursor, Read};

use binrw::BinReaderExt;
use bzip2::read::BzDecoder;
use sha1::{Digest, Sha1};
use xz2::read::XzDecoder;
use xz2::stream::{Filters, LzmaOptions, Stream};

use crate::structs::{CompressionType, PurgeSegment, HASH_EXCEPTION_ENTRY_SIZE};
use crate::WiaError;

pub enum Decompressor {
    None(Cursor<Vec<u8>>),
    /// serves the already expanded and hash-verified purge buffer
    Purge(Cursor<Vec<u8>>),
    Bzip2(BzDecoder<Cursor<Vec<u8>>>),
    Lzma(XzDecoder<Cursor<Vec<u8>>>),
    Lzma2(XzDecoder<Cursor<Vec<u8>>>),
    /// a group with no stored bytes, reads as zeros
    Zero,
}

impl Decompressor {
    /// Opens a decompressor over the stored bytes of one group.
    ///
    /// `payload_size` is the decompressed chunk payload without the exception
    /// region; `exception_lists` the number of sublists preceding it. Both
    /// only matter to purge, which has to know the logical stream length to
    /// verify its trailing SHA-1.
    pub fn new(
        compression: CompressionType,
        input: Vec<u8>,
        compressor_data: &[u8],
        payload_size: u64,
        exception_lists: u32,
    ) -> Result<Self, WiaError> {
        match compression {
            CompressionType::None => Ok(Decompressor::None(Cursor::new(input))),
            CompressionType::Purge => {
                let expanded = expand_purge(&input, payload_size, exception_lists)?;
                Ok(Decompressor::Purge(Cursor::new(expanded)))
            }
            CompressionType::Bzip2 => Ok(Decompressor::Bzip2(BzDecoder::new(Cursor::new(input)))),
            CompressionType::Lzma => {
                let stream = raw_stream(lzma1_filters(compressor_data)?)?;
                Ok(Decompressor::Lzma(XzDecoder::new_stream(
                    Cursor::new(input),
                    stream,
                )))
            }
            CompressionType::Lzma2 => {
                let stream = raw_stream(lzma2_filters(compressor_data)?)?;
                Ok(Decompressor::Lzma2(XzDecoder::new_stream(
                    Cursor::new(input),
                    stream,
                )))
            }
        }
    }

    pub fn zero() -> Self {
        Decompressor::Zero
    }
}

impl Read for Decompressor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::None(cursor) | Decompressor::Purge(cursor) => cursor.read(buf),
            Decompressor::Bzip2(decoder) => decoder.read(buf),
            Decompressor::Lzma(decoder) | Decompressor::Lzma2(decoder) => decoder.read(buf),
            Decompressor::Zero => {
                buf.fill(0);
                Ok(buf.len())
            }
        }
    }
}

/// Builds the lzma1 filter chain from the 5 stored property bytes: the
/// packed lc/lp/pb byte followed by the dictionary size as a little-endian
/// u32.
fn lzma1_filters(compressor_data: &[u8]) -> Result<Filters, WiaError> {
    let &[props, d0, d1, d2, d3] = compressor_data else {
        return Err(WiaError::MalformedHeader("lzma properties"));
    };
    if props >= 9 * 5 * 5 {
        return Err(WiaError::MalformedHeader("lzma properties"));
    }
    let lc = props % 9;
    let rest = props / 9;
    let lp = rest % 5;
    let pb = rest / 5;
    let dict_size = u32::from_le_bytes([d0, d1, d2, d3]);

    let mut options = decoder_options()?;
    options
        .literal_context_bits(lc as u32)
        .literal_position_bits(lp as u32)
        .position_bits(pb as u32)
        .dict_size(dict_size);
    let mut filters = Filters::new();
    filters.lzma1(&options);
    Ok(filters)
}

/// Builds the lzma2 filter chain from the single stored dictionary size
/// code byte.
fn lzma2_filters(compressor_data: &[u8]) -> Result<Filters, WiaError> {
    let &[code] = compressor_data else {
        return Err(WiaError::MalformedHeader("lzma2 properties"));
    };
    if code > 40 {
        return Err(WiaError::MalformedHeader("lzma2 properties"));
    }
    let dict_size = if code == 40 {
        u32::MAX
    } else {
        (2 | (code as u32 & 1)) << (code / 2 + 11)
    };

    let mut options = decoder_options()?;
    options.dict_size(dict_size);
    let mut filters = Filters::new();
    filters.lzma2(&options);
    Ok(filters)
}

fn decoder_options() -> Result<LzmaOptions, WiaError> {
    LzmaOptions::new_preset(6).map_err(|_| WiaError::MalformedHeader("lzma properties"))
}

fn raw_stream(filters: Filters) -> Result<Stream, WiaError> {
    Stream::new_raw_decoder(&filters).map_err(|_| WiaError::MalformedHeader("lzma properties"))
}

/// Expands a purge stream: sparse segments over a zero background, followed
/// by a SHA-1 of the fully expanded logical buffer. The logical length is
/// the exception region (found by walking the sublist skeleton) plus the
/// payload; the hash is checked before a single byte is handed out.
fn expand_purge(
    input: &[u8],
    payload_size: u64,
    exception_lists: u32,
) -> Result<Vec<u8>, WiaError> {
    if input.len() < 20 {
        return Err(WiaError::PurgeHashMismatch);
    }
    let (segment_bytes, stored_hash) = input.split_at(input.len() - 20);

    // a corrupt segment header must not make us allocate the moon
    let size_limit = payload_size as usize
        + exception_lists as usize * (2 + u16::MAX as usize * HASH_EXCEPTION_ENTRY_SIZE);

    let mut expanded = Vec::new();
    let mut cursor = Cursor::new(segment_bytes);
    while (cursor.position() as usize) < segment_bytes.len() {
        let segment: PurgeSegment = cursor
            .read_be()
            .map_err(|_| WiaError::MalformedHeader("purge segment"))?;
        let start = segment.offset as usize;
        let end = start
            .checked_add(segment.size as usize)
            .filter(|end| *end <= size_limit)
            .ok_or(WiaError::MalformedHeader("purge segment"))?;
        let data_start = cursor.position() as usize;
        let data = segment_bytes
            .get(data_start..data_start + segment.size as usize)
            .ok_or(WiaError::MalformedHeader("purge segment"))?;
        if expanded.len() < end {
            expanded.resize(end, 0);
        }
        expanded[start..end].copy_from_slice(data);
        cursor.set_position((data_start + segment.size as usize) as u64);
    }

    let exception_end = exception_region_size(&expanded, exception_lists);
    let logical_size = exception_end
        .checked_add(payload_size as usize)
        .ok_or(WiaError::MalformedHeader("purge segment"))?;
    if expanded.len() > logical_size {
        return Err(WiaError::MalformedHeader("purge segment"));
    }
    expanded.resize(logical_size, 0);

    if Sha1::digest(&expanded).as_slice() != stored_hash {
        return Err(WiaError::PurgeHashMismatch);
    }
    Ok(expanded)
}

/// Walks the exception sublist counts at the start of a decompressed stream
/// and returns the number of bytes the sublists occupy. Counts beyond the
/// materialized bytes read as zero.
fn exception_region_size(buf: &[u8], exception_lists: u32) -> usize {
    let mut pos = 0usize;
    for _ in 0..exception_lists {
        let count = match buf.get(pos..pos + 2) {
            Some(bytes) => u16::from_be_bytes([bytes[0], bytes[1]]) as usize,
            None => 0,
        };
        pos += 2 + count * HASH_EXCEPTION_ENTRY_SIZE;
    }
    pos
}
