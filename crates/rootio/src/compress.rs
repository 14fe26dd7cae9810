//! ROOT compression blocks (ZL = zlib, XZ = LZMA, L4 = LZ4, ZS = ZSTD).
//!
//! A compressed payload is a sequence of blocks, each with a 9-byte header:
//! ```text
//! bytes 0-1:  algorithm tag ("ZL", "XZ", "L4", "ZS", legacy "CS")
//! byte  2:    method
//! bytes 3-5:  compressed size   (3-byte little-endian)
//! bytes 6-8:  uncompressed size (3-byte little-endian)
//! ```
//! The block data follows its header. A block holds at most `0xff_ffff`
//! uncompressed bytes, so large payloads span several blocks.

use std::fmt;
use std::io::{Read, Write};

use crate::error::{Result, RootError};

/// Size of a block header.
pub const HEADER_SIZE: usize = 9;

/// Largest block, in either direction (3-byte size fields).
pub const MAX_BLOCK_SIZE: usize = 0xff_ffff;

/// Inputs shorter than this are never compressed.
const MIN_COMPRESS_LEN: usize = 512;

/// Length of the xxhash64 prefix of LZ4 blocks.
const LZ4_CHECKSUM_LEN: usize = 8;

std::thread_local! {
    static ZSTD_DECODER: std::cell::RefCell<ruzstd::decoding::FrameDecoder> =
        std::cell::RefCell::new(ruzstd::decoding::FrameDecoder::new());
}

/// Compression algorithm, as encoded in the hundreds of ROOT's `fCompress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Use the enclosing setting (`0`).
    Global,
    /// zlib (`1`).
    Zlib,
    /// LZMA in an XZ container (`2`).
    Lzma,
    /// ROOT's legacy in-house algorithm (`3`).
    Old,
    /// LZ4 (`4`).
    Lz4,
    /// Zstandard (`5`).
    Zstd,
}

impl Algorithm {
    fn from_code(code: i32) -> Result<Self> {
        Ok(match code {
            0 => Self::Global,
            1 => Self::Zlib,
            2 => Self::Lzma,
            3 => Self::Old,
            4 => Self::Lz4,
            5 => Self::Zstd,
            other => {
                return Err(RootError::Format(format!("unknown compression algorithm code {}", other)))
            }
        })
    }

    fn code(self) -> i32 {
        match self {
            Self::Global => 0,
            Self::Zlib => 1,
            Self::Lzma => 2,
            Self::Old => 3,
            Self::Lz4 => 4,
            Self::Zstd => 5,
        }
    }
}

/// Algorithm and level, as stored in a file header (`algorithm * 100 + level`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Settings {
    /// Algorithm.
    pub algorithm: Algorithm,
    /// Level, `0..=99`; `0` disables compression.
    pub level: u32,
}

impl Settings {
    /// No compression.
    pub const NONE: Settings = Settings { algorithm: Algorithm::Global, level: 0 };

    /// Settings with an explicit algorithm and level (clamped to 99).
    pub fn new(algorithm: Algorithm, level: u32) -> Self {
        Self { algorithm, level: level.min(99) }
    }

    /// Decode ROOT's integer form.
    pub fn from_root(value: i32) -> Result<Self> {
        if value < 0 {
            return Err(RootError::Format(format!("negative compression setting {}", value)));
        }
        Ok(Self { algorithm: Algorithm::from_code(value / 100)?, level: (value % 100) as u32 })
    }

    /// ROOT's integer form.
    pub fn to_root(self) -> i32 {
        self.algorithm.code() * 100 + self.level as i32
    }

    /// Whether data written with these settings is stored raw.
    pub fn is_none(self) -> bool {
        self.algorithm == Algorithm::Global || self.level == 0
    }
}

impl Default for Settings {
    /// ROOT's default: zlib, level 1.
    fn default() -> Self {
        Self { algorithm: Algorithm::Zlib, level: 1 }
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}", self.algorithm, self.level)
    }
}

/// Decompress ROOT-compressed data into exactly `expected_len` bytes.
///
/// No block may inflate past its declared size, so the output never grows
/// beyond `expected_len` whatever the input claims.
pub fn decompress(src: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len.min(MAX_BLOCK_SIZE));
    let mut offset = 0;

    while out.len() < expected_len {
        if offset + HEADER_SIZE > src.len() {
            return Err(RootError::Decompression(format!(
                "truncated block header at {} ({} of {} bytes produced)",
                offset,
                out.len(),
                expected_len
            )));
        }
        let tag = &src[offset..offset + 2];
        let c_size = read_le24(&src[offset + 3..offset + 6]);
        let u_size = read_le24(&src[offset + 6..offset + 9]);
        offset += HEADER_SIZE;

        let end = offset + c_size;
        if end > src.len() {
            return Err(RootError::Decompression(format!(
                "compressed block claims {} bytes but only {} remain",
                c_size,
                src.len() - offset
            )));
        }

        if u_size > expected_len - out.len() {
            return Err(RootError::Decompression(format!(
                "block at {} declares {} bytes, only {} of {} left to fill",
                offset - HEADER_SIZE,
                u_size,
                expected_len - out.len(),
                expected_len
            )));
        }

        let compressed = &src[offset..end];

        let decompressed = match tag {
            b"ZL" => decompress_zlib(compressed, u_size)?,
            b"L4" => decompress_lz4(compressed, u_size)?,
            b"ZS" => decompress_zstd(compressed, u_size)?,
            b"XZ" => decompress_xz(compressed, u_size)?,
            b"CS" => {
                return Err(RootError::NotImplemented(
                    "legacy ROOT compression (CS) blocks".into(),
                ))
            }
            _ => return Err(RootError::UnknownCompression(String::from_utf8_lossy(tag).into_owned())),
        };

        if decompressed.len() != u_size {
            return Err(RootError::Decompression(format!(
                "expected {} uncompressed bytes, got {}",
                u_size,
                decompressed.len()
            )));
        }

        out.extend_from_slice(&decompressed);
        offset = end;
    }

    if out.len() != expected_len {
        return Err(RootError::Decompression(format!(
            "total decompressed length {} != expected {}",
            out.len(),
            expected_len
        )));
    }

    Ok(out)
}

/// Compress `src` into ROOT blocks.
///
/// The input comes back unchanged when the settings disable compression, when
/// it is shorter than 512 bytes, or when any block fails to shrink; a reader
/// then sees `objlen == nbytes - keylen` and reads it raw.
pub fn compress(settings: Settings, src: &[u8]) -> Result<Vec<u8>> {
    if settings.is_none() || src.len() < MIN_COMPRESS_LEN {
        return Ok(src.to_vec());
    }

    let nblocks = src.len() / MAX_BLOCK_SIZE + 1;
    let mut out = Vec::with_capacity(src.len() + nblocks * HEADER_SIZE);
    for chunk in src.chunks(MAX_BLOCK_SIZE) {
        match compress_block(settings, chunk)? {
            Some(block) => out.extend_from_slice(&block),
            None => return Ok(src.to_vec()),
        }
    }
    Ok(out)
}

/// One block with its header, or `None` when it does not shrink.
fn compress_block(settings: Settings, src: &[u8]) -> Result<Option<Vec<u8>>> {
    let (tag, method, data): (&[u8; 2], u8, Vec<u8>) = match settings.algorithm {
        Algorithm::Zlib => {
            let level = flate2::Compression::new(settings.level.min(9));
            let mut enc = flate2::write::ZlibEncoder::new(Vec::with_capacity(src.len()), level);
            enc.write_all(src).map_err(|e| RootError::Decompression(format!("zlib: {}", e)))?;
            let data = enc.finish().map_err(|e| RootError::Decompression(format!("zlib: {}", e)))?;
            (b"ZL", 8, data)
        }
        Algorithm::Lzma => {
            let mut data = Vec::with_capacity(src.len());
            lzma_rs::xz_compress(&mut std::io::BufReader::new(src), &mut data)
                .map_err(|e| RootError::Decompression(format!("xz: {}", e)))?;
            (b"XZ", 0, data)
        }
        Algorithm::Zstd => {
            let data = ruzstd::encoding::compress_to_vec(src, ruzstd::encoding::CompressionLevel::Fastest);
            (b"ZS", 1, data)
        }
        Algorithm::Lz4 => {
            return Err(RootError::NotImplemented("LZ4 compression (block checksum)".into()))
        }
        Algorithm::Old => {
            return Err(RootError::NotImplemented("legacy ROOT compression".into()))
        }
        Algorithm::Global => return Ok(None),
    };

    if data.len() >= src.len() || data.len() > MAX_BLOCK_SIZE {
        return Ok(None);
    }

    let mut block = Vec::with_capacity(HEADER_SIZE + data.len());
    block.extend_from_slice(tag);
    block.push(method);
    block.extend_from_slice(&write_le24(data.len()));
    block.extend_from_slice(&write_le24(src.len()));
    block.extend_from_slice(&data);
    Ok(Some(block))
}

fn decompress_zlib(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    // one byte of slack tells an oversized block from an exact one
    let mut decoder = flate2::read::ZlibDecoder::new(data).take(expected as u64 + 1);
    let mut out = Vec::with_capacity(expected);
    decoder.read_to_end(&mut out).map_err(|e| RootError::Decompression(format!("zlib: {}", e)))?;
    if out.len() > expected {
        return Err(RootError::Decompression(format!("zlib: block inflates past its declared {} bytes", expected)));
    }
    Ok(out)
}

fn decompress_lz4(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    // The xxhash64 prefix is not verified.
    if data.len() < LZ4_CHECKSUM_LEN {
        return Err(RootError::Decompression("LZ4 block too small for checksum header".into()));
    }
    lz4_flex::decompress(&data[LZ4_CHECKSUM_LEN..], expected)
        .map_err(|e| RootError::Decompression(format!("lz4: {}", e)))
}

fn decompress_zstd(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; expected];
    let written = ZSTD_DECODER
        .with(|cell| cell.borrow_mut().decode_all(data, &mut out))
        .map_err(|e| RootError::Decompression(format!("zstd: {}", e)))?;
    out.truncate(written);
    Ok(out)
}

fn decompress_xz(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut input = std::io::BufReader::new(data);
    let mut out = BoundedSink { buf: Vec::with_capacity(expected), limit: expected };
    lzma_rs::xz_decompress(&mut input, &mut out)
        .map_err(|e| RootError::Decompression(format!("xz: {}", e)))?;
    Ok(out.buf)
}

/// Output buffer that fails writes past `limit` bytes.
struct BoundedSink {
    buf: Vec<u8>,
    limit: usize,
}

impl Write for BoundedSink {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        if data.len() > self.limit - self.buf.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("block inflates past its declared {} bytes", self.limit),
            ));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Read a 3-byte little-endian unsigned integer.
fn read_le24(b: &[u8]) -> usize {
    b[0] as usize | ((b[1] as usize) << 8) | ((b[2] as usize) << 16)
}

fn write_le24(v: usize) -> [u8; 3] {
    [v as u8, (v >> 8) as u8, (v >> 16) as u8]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn make_root_block(tag: &[u8; 2], method: u8, compressed: &[u8], u_len: usize) -> Vec<u8> {
        let mut block = Vec::new();
        block.extend_from_slice(tag);
        block.push(method);
        block.extend_from_slice(&write_le24(compressed.len()));
        block.extend_from_slice(&write_le24(u_len));
        block.extend_from_slice(compressed);
        block
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 7) as u8 * 31 + (i / 1000) as u8).collect()
    }

    #[test]
    fn le24() {
        assert_eq!(read_le24(&[0x10, 0x00, 0x00]), 16);
        assert_eq!(read_le24(&[0xff, 0xff, 0xff]), 0xFF_FFFF);
        assert_eq!(read_le24(&write_le24(0x01_0203)), 0x01_0203);
    }

    #[test]
    fn zlib_block() {
        let original = b"Hello ROOT compression world! Repeated data: AAAAAAAAAA";
        let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(original).unwrap();
        let compressed = encoder.finish().unwrap();
        let block = make_root_block(b"ZL", 8, &compressed, original.len());
        assert_eq!(decompress(&block, original.len()).unwrap(), original);
    }

    #[test]
    fn zstd_block() {
        let original = b"Hello ROOT ZSTD compression! Repeated data: BBBBBBBBBB";
        let compressed = ruzstd::encoding::compress_to_vec(
            &original[..],
            ruzstd::encoding::CompressionLevel::Fastest,
        );
        let block = make_root_block(b"ZS", 1, &compressed, original.len());
        assert_eq!(decompress(&block, original.len()).unwrap(), &original[..]);
    }

    #[test]
    fn xz_block() {
        let original = b"Hello ROOT XZ compression! Repeated data: CCCCCCCCCC";
        let mut compressed = Vec::new();
        lzma_rs::xz_compress(&mut std::io::BufReader::new(&original[..]), &mut compressed).unwrap();
        let block = make_root_block(b"XZ", 0, &compressed, original.len());
        assert_eq!(decompress(&block, original.len()).unwrap(), &original[..]);
    }

    #[test]
    fn lz4_block_skips_checksum() {
        let original = sample(2048);
        let mut payload = vec![0u8; LZ4_CHECKSUM_LEN];
        payload.extend_from_slice(&lz4_flex::compress(&original));
        let block = make_root_block(b"L4", 1, &payload, original.len());
        assert_eq!(decompress(&block, original.len()).unwrap(), original);
    }

    #[test]
    fn unknown_and_legacy_tags() {
        let block = make_root_block(b"QQ", 0, &[1, 2, 3], 3);
        assert!(matches!(decompress(&block, 3), Err(RootError::UnknownCompression(ref t)) if t == "QQ"));

        let block = make_root_block(b"CS", 0, &[1, 2, 3], 3);
        assert!(decompress(&block, 3).unwrap_err().is_not_implemented());
    }

    #[test]
    fn truncated_and_short_input() {
        let data = sample(4096);
        let packed = compress(Settings::new(Algorithm::Zlib, 6), &data).unwrap();
        assert!(packed.len() < data.len());

        let err = decompress(&packed[..packed.len() - 5], data.len()).unwrap_err();
        assert!(matches!(err, RootError::Decompression(_)));

        let err = decompress(&packed, data.len() + 10).unwrap_err();
        assert!(matches!(err, RootError::Decompression(_)));
    }

    #[test]
    fn oversized_blocks_are_cut_off() {
        let zeros = vec![0u8; 8 << 20];
        let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::best());
        encoder.write_all(&zeros).unwrap();
        let bomb = encoder.finish().unwrap();
        assert!(bomb.len() < 64 << 10);

        let block = make_root_block(b"ZL", 8, &bomb, 16);
        let err = decompress(&block, 16).unwrap_err();
        assert!(matches!(err, RootError::Decompression(ref m) if m.contains("past its declared 16")), "{}", err);

        let mut packed = Vec::new();
        lzma_rs::xz_compress(&mut std::io::BufReader::new(&zeros[..64 << 10]), &mut packed).unwrap();
        let block = make_root_block(b"XZ", 0, &packed, 16);
        let err = decompress(&block, 16).unwrap_err();
        assert!(matches!(err, RootError::Decompression(ref m) if m.starts_with("xz")), "{}", err);
    }

    #[test]
    fn block_larger_than_the_object_is_rejected_before_inflating() {
        // header only: the data is never looked at
        let block = make_root_block(b"ZL", 8, &[0xde, 0xad], MAX_BLOCK_SIZE);
        let err = decompress(&block, 100).unwrap_err();
        assert!(matches!(err, RootError::Decompression(ref m) if m.contains("only 100 of 100 left")), "{}", err);

        // a huge claimed object length does not reserve memory up front
        let data = sample(4096);
        let packed = compress(Settings::new(Algorithm::Zlib, 6), &data).unwrap();
        let err = decompress(&packed, i32::MAX as usize).unwrap_err();
        assert!(matches!(err, RootError::Decompression(_)));
    }

    #[test]
    fn small_or_disabled_input_is_stored_raw() {
        let small = sample(511);
        assert_eq!(compress(Settings::default(), &small).unwrap(), small);

        let big = sample(4096);
        assert_eq!(compress(Settings::new(Algorithm::Zlib, 0), &big).unwrap(), big);
        assert_eq!(compress(Settings::NONE, &big).unwrap(), big);
    }

    #[test]
    fn incompressible_input_is_stored_raw() {
        // xorshift noise does not deflate
        let mut x: u32 = 0x9e37_79b9;
        let noise: Vec<u8> = (0..4096)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                x as u8
            })
            .collect();
        assert_eq!(compress(Settings::new(Algorithm::Zlib, 9), &noise).unwrap(), noise);
    }

    #[test]
    fn lz4_and_old_compression_are_not_implemented() {
        let data = sample(1024);
        assert!(compress(Settings::new(Algorithm::Lz4, 4), &data).unwrap_err().is_not_implemented());
        assert!(compress(Settings::new(Algorithm::Old, 1), &data).unwrap_err().is_not_implemented());
    }

    #[test]
    fn every_algorithm_round_trips() {
        let data = sample(10_000);
        for alg in [Algorithm::Zlib, Algorithm::Lzma, Algorithm::Zstd] {
            let packed = compress(Settings::new(alg, 5), &data).unwrap();
            assert!(packed.len() < data.len(), "{:?} did not shrink", alg);
            assert_eq!(decompress(&packed, data.len()).unwrap(), data, "{:?}", alg);
        }
    }

    #[test]
    fn large_input_spans_several_blocks() {
        let data = sample(MAX_BLOCK_SIZE + MAX_BLOCK_SIZE / 2);
        let packed = compress(Settings::new(Algorithm::Zlib, 1), &data).unwrap();
        assert_eq!(&packed[..2], b"ZL");

        let first = read_le24(&packed[3..6]);
        assert_eq!(read_le24(&packed[6..9]), MAX_BLOCK_SIZE);
        let second = HEADER_SIZE + first;
        assert_eq!(&packed[second..second + 2], b"ZL");
        assert_eq!(read_le24(&packed[second + 6..second + 9]), MAX_BLOCK_SIZE / 2);

        assert_eq!(decompress(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn settings_integer_form() {
        let s = Settings::from_root(101).unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(Settings::from_root(505).unwrap().to_root(), 505);
        assert_eq!(Settings::from_root(0).unwrap(), Settings::NONE);
        assert!(Settings::from_root(0).unwrap().is_none());
        assert!(Settings::from_root(901).unwrap_err().is_format());
        assert_eq!(Settings::new(Algorithm::Lzma, 250).level, 99);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn zlib_round_trip(body in proptest::collection::vec(0u8..8, 512..4096)) {
            let packed = compress(Settings::new(Algorithm::Zlib, 6), &body).unwrap();
            prop_assert_eq!(decompress(&packed, body.len()).unwrap(), body);
        }
    }
}
