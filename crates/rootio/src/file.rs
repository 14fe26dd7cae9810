//! TFile header parsing and the top-level ROOT file interface.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::compress::Settings;
use crate::config::ReaderConfig;
use crate::datasource::DataSource;
use crate::directory::{Directory, WalkAction};
use crate::error::{Result, RootError};
use crate::factory::{DecodeContext, Registry};
use crate::key::{Key, KeyRecord};
use crate::objects::{FreeSegment, Object, TList, TNamed};
use crate::rbuffer::RBuffer;
use crate::streamer::{StreamerDb, StreamerInfo};

/// ROOT file magic bytes.
const ROOT_MAGIC: &[u8; 4] = b"root";
/// Versions above this use 64-bit file pointers.
const LARGE_FILE_VERSION: i32 = 1_000_000;
/// Accepted range of `nbytesname` when a directory record is present.
const NBYTES_NAME_RANGE: std::ops::RangeInclusive<i32> = 10..=1000;
/// Bookkeeping record classes skipped when recovering keys.
const BOOKKEEPING_CLASSES: [&str; 4] = ["TFile", "KeysList", "FreeSegments", "TBasket"];

/// Parsed ROOT file header.
///
/// Layout (pointer fields are 8 bytes when `version > 1_000_000`, else 4):
/// ```text
/// magic "root" | version i32 | begin i32 | end ptr | seekfree ptr
/// nbytesfree i32 | nfree i32 | nbytesname i32 | units u8 | compress i32
/// seekinfo ptr | nbytesinfo i32 | uuid (u16 version + 16 bytes)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version, with the large-file offset removed.
    pub version: i32,
    /// Whether pointer fields are 64-bit.
    pub large: bool,
    /// Offset of the first record.
    pub begin: i64,
    /// Offset of the first byte past the last record.
    pub end: i64,
    /// Offset of the free-segments record.
    pub seek_free: i64,
    /// Length of the free-segments record.
    pub nbytes_free: i32,
    /// Number of free segments.
    pub nfree: i32,
    /// Length of the top key and name record at `begin`.
    pub nbytes_name: i32,
    /// Pointer width hint written by ROOT (4 or 8).
    pub units: u8,
    /// Compression setting, `algorithm * 100 + level`.
    pub compress: i32,
    /// Offset of the streamer-info record.
    pub seek_info: i64,
    /// Length of the streamer-info record.
    pub nbytes_info: i32,
    /// UUID version.
    pub uuid_version: u16,
    /// UUID bytes.
    pub uuid: [u8; 16],
}

impl FileHeader {
    /// Parse the header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ROOT_MAGIC.len() || &data[..4] != ROOT_MAGIC {
            return Err(RootError::BadMagic);
        }
        let mut r = RBuffer::new(data);
        r.skip(4)?;

        let raw_version = r.read_i32()?;
        let large = raw_version > LARGE_FILE_VERSION;
        let begin = i64::from(r.read_i32()?);
        let end = read_ptr(&mut r, large)?;
        let seek_free = read_ptr(&mut r, large)?;
        let nbytes_free = r.read_i32()?;
        let nfree = r.read_i32()?;
        let nbytes_name = r.read_i32()?;
        let units = r.read_u8()?;
        let compress = r.read_i32()?;
        let seek_info = read_ptr(&mut r, large)?;
        let nbytes_info = r.read_i32()?;
        let uuid_version = r.read_u16()?;
        let uuid = r.read_array()?;

        Ok(FileHeader {
            version: raw_version % LARGE_FILE_VERSION,
            large,
            begin,
            end,
            seek_free,
            nbytes_free,
            nfree,
            nbytes_name,
            units,
            compress,
            seek_info,
            nbytes_info,
            uuid_version,
            uuid,
        })
    }
}

fn read_ptr(r: &mut RBuffer<'_>, large: bool) -> Result<i64> {
    if large {
        r.read_i64()
    } else {
        r.read_i32().map(i64::from)
    }
}

/// State shared by a file and every key and directory read from it.
pub(crate) struct FileInner {
    pub(crate) data: DataSource,
    pub(crate) path: PathBuf,
    pub(crate) header: FileHeader,
    pub(crate) config: ReaderConfig,
    pub(crate) registry: Arc<Registry>,
    pub(crate) streamers: StreamerDb,
    pub(crate) free: Vec<FreeSegment>,
}

/// How to open a [`RootFile`]: reader knobs plus the class registry.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    config: ReaderConfig,
    registry: Arc<Registry>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self { config: ReaderConfig::default(), registry: Arc::new(Registry::builtin()) }
    }
}

impl OpenOptions {
    /// Default configuration with the builtin registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the reader configuration.
    pub fn config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Decode objects with `registry` instead of the builtin one.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    /// Memory-map and open the file at `path`.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<RootFile> {
        let path = path.as_ref().to_path_buf();
        let data = DataSource::map(&path)?;
        RootFile::load(data, path, self)
    }

    /// Open a file held in memory; `name` is used in diagnostics.
    pub fn from_bytes(&self, data: Vec<u8>, name: impl Into<PathBuf>) -> Result<RootFile> {
        RootFile::load(DataSource::Owned(data), name.into(), self)
    }
}

/// A ROOT file opened for reading.
///
/// Immutable after open. Keys and directories handed out by the file share
/// its bytes, so they stay usable as long as they are alive.
pub struct RootFile {
    inner: Arc<FileInner>,
    dir: Directory,
}

impl RootFile {
    /// Open `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        OpenOptions::default().open(path)
    }

    /// Parse a ROOT file from a byte vector.
    pub fn from_bytes(data: Vec<u8>, name: impl Into<PathBuf>) -> Result<Self> {
        OpenOptions::default().from_bytes(data, name)
    }

    fn load(data: DataSource, path: PathBuf, opts: &OpenOptions) -> Result<Self> {
        let wrap = |e: RootError| e.context(path.display());

        let header = FileHeader::parse(&data).map_err(wrap)?;
        log::debug!(
            "opening {:?}: version {}, begin {}, end {}, compress {}",
            path,
            header.version,
            header.begin,
            header.end,
            header.compress
        );

        let named = read_file_name(&data, &header).map_err(wrap)?;

        let free = if header.seek_free > 0 && opts.config.read_free_segments {
            read_free_segments(&data, &header).map_err(|e| wrap(e.context("free segments")))?
        } else {
            Vec::new()
        };

        let streamers = if header.seek_info > 0 && opts.config.read_streamers {
            read_streamers(&data, &header, &opts.registry).map_err(|e| wrap(e.context("streamer infos")))?
        } else {
            StreamerDb::default()
        };

        let inner = Arc::new(FileInner {
            data,
            path: path.clone(),
            header,
            config: opts.config,
            registry: Arc::clone(&opts.registry),
            streamers,
            free,
        });

        let h = &inner.header;
        let mut dir = if h.nbytes_name != 0 {
            let at = (h.begin + i64::from(h.nbytes_name)) as u64;
            Directory::read_at(&inner, named, at).map_err(|e| wrap(e.context("top directory")))?
        } else {
            Directory::bare(&inner, named, h.begin)
        };

        if dir.seek_keys() > 0 && !inner.config.scan_keys {
            dir.read_keys().map_err(|e| wrap(e.context("key list")))?;
        } else {
            if inner.config.scan_keys {
                log::debug!("{:?}: scanning records for keys", path);
            } else {
                log::warn!("{:?}: no key list, recovering keys by scanning records", path);
            }
            let keys = scan_keys(&inner).map_err(|e| wrap(e.context("key recovery")))?;
            dir.set_keys(keys);
        }

        log::debug!("{:?}: {} top-level keys", path, dir.keys().len());
        Ok(RootFile { inner, dir })
    }

    /// Parsed file header.
    pub fn header(&self) -> &FileHeader {
        &self.inner.header
    }

    /// Format version (without the large-file offset).
    pub fn version(&self) -> i32 {
        self.inner.header.version
    }

    /// Offset of the first record.
    pub fn begin(&self) -> i64 {
        self.inner.header.begin
    }

    /// Offset past the last record.
    pub fn end(&self) -> i64 {
        self.inner.header.end
    }

    /// Whether the file uses 64-bit pointers.
    pub fn is_large(&self) -> bool {
        self.inner.header.large
    }

    /// Default compression setting of the file.
    pub fn compression(&self) -> Result<Settings> {
        Settings::from_root(self.inner.header.compress)
    }

    /// File UUID.
    pub fn uuid(&self) -> &[u8; 16] {
        &self.inner.header.uuid
    }

    /// Pointer width hint from the header.
    pub fn units(&self) -> u8 {
        self.inner.header.units
    }

    /// Every streamer info loaded at open time.
    pub fn streamer_infos(&self) -> &StreamerDb {
        &self.inner.streamers
    }

    /// Highest-version streamer info for `class`.
    pub fn streamer_info(&self, class: &str) -> Result<Arc<StreamerInfo>> {
        self.inner.streamers.get(class, -1).ok_or_else(|| RootError::StreamerNotFound(class.to_string()))
    }

    /// Free byte ranges listed in the file.
    pub fn free_segments(&self) -> &[FreeSegment] {
        &self.inner.free
    }

    /// Registry used to decode objects.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// Path (or name) the file was opened from.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Keys of the top directory.
    pub fn keys(&self) -> &[Key] {
        self.dir.keys()
    }

    /// The top directory.
    pub fn root_dir(&self) -> &Directory {
        &self.dir
    }

    /// Decode the object at `path` (`name`, `name;cycle`, `dir/name;cycle`).
    pub fn get(&self, path: &str) -> Result<Box<dyn Object>> {
        self.dir.get(path).map_err(|e| e.context(self.inner.path.display()))
    }

    /// Whether `path` names a key or directory.
    pub fn has(&self, path: &str) -> bool {
        self.dir.has(path)
    }

    /// Visit every object in the file, depth first.
    pub fn walk<F>(&self, visitor: F)
    where
        F: FnMut(&str, Result<&dyn Object>) -> WalkAction,
    {
        self.dir.walk(visitor)
    }

    /// Release this handle's mapping and decoded state.
    ///
    /// Keys and directories cloned out of the file keep the bytes alive
    /// until they are dropped too.
    pub fn close(self) {
        log::debug!("closing {:?}", self.inner.path);
    }
}

impl fmt::Debug for RootFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootFile")
            .field("path", &self.inner.path)
            .field("version", &self.inner.header.version)
            .field("keys", &self.dir.keys().len())
            .finish()
    }
}

fn expect_key(record: KeyRecord, what: &str, at: u64) -> Result<Key> {
    match record {
        KeyRecord::Key(k) => Ok(k),
        KeyRecord::Gap(_) => Err(RootError::Format(format!("{} record at {} is free space", what, at))),
    }
}

fn pointer(value: i64, what: &str, header: &FileHeader) -> Result<u64> {
    if value <= 0 || value >= header.end {
        return Err(RootError::Format(format!(
            "invalid pointer to {} (pos={} end={})",
            what, value, header.end
        )));
    }
    Ok(value as u64)
}

/// Name and title of the file, from the key at `begin`.
fn read_file_name(data: &DataSource, header: &FileHeader) -> Result<TNamed> {
    if header.nbytes_name == 0 {
        return Ok(TNamed::default());
    }
    if !NBYTES_NAME_RANGE.contains(&header.nbytes_name) {
        return Err(RootError::Format(format!(
            "can't read directory info: nbytesname {} outside {:?}",
            header.nbytes_name, NBYTES_NAME_RANGE
        )));
    }
    let at = u64::try_from(header.begin)
        .map_err(|_| RootError::Format(format!("negative begin offset {}", header.begin)))?;
    let key = expect_key(Key::read_at(&mut RBuffer::new(data), at)?, "top key", at)?;
    Ok(TNamed::new(key.name(), key.title()))
}

fn read_free_segments(data: &DataSource, header: &FileHeader) -> Result<Vec<FreeSegment>> {
    let at = pointer(header.seek_free, "free segments", header)?;
    let key = expect_key(Key::read_at(&mut RBuffer::new(data), at)?, "free segments", at)?;
    let bytes = key.read_payload(data)?;
    let mut r = RBuffer::new(&bytes);
    let mut segments = Vec::new();
    while r.remaining() > 0 && (header.nfree <= 0 || segments.len() < header.nfree as usize) {
        let mut seg = FreeSegment::default();
        match seg.unmarshal(&mut r) {
            Ok(()) => segments.push(seg),
            // trailing padding
            Err(RootError::BufferUnderflow { .. }) => break,
            Err(e) => return Err(e),
        }
    }
    log::debug!("{} free segments", segments.len());
    Ok(segments)
}

fn read_streamers(data: &DataSource, header: &FileHeader, registry: &Registry) -> Result<StreamerDb> {
    let at = pointer(header.seek_info, "streamer info", header)?;
    let key = expect_key(Key::read_at(&mut RBuffer::new(data), at)?, "streamer info", at)?;
    let bytes = key.read_payload(data)?;
    let mut r = RBuffer::new(&bytes)
        .with_offset(key.key_len() as u64)
        .with_context(DecodeContext::new(registry));
    let mut list = TList::default();
    list.unmarshal(&mut r)?;
    let db = StreamerDb::from_list(&list);
    log::debug!("loaded {} streamer infos", db.len());
    Ok(db)
}

/// Rebuild the top directory's keys by walking records from `begin` to `end`.
fn scan_keys(inner: &Arc<FileInner>) -> Result<Vec<Key>> {
    let h = &inner.header;
    let begin = u64::try_from(h.begin).map_err(|_| RootError::Format(format!("negative begin {}", h.begin)))?;
    let end = u64::try_from(h.end).map_err(|_| RootError::Format(format!("negative end {}", h.end)))?;

    let mut r = RBuffer::new(&inner.data);
    let mut keys = Vec::new();
    let mut pos = begin;
    while pos < end {
        let key = match Key::read_at(&mut r, pos)? {
            KeyRecord::Gap(n) => {
                log::debug!("skipping {} free bytes at {}", n, pos);
                pos += n;
                continue;
            }
            KeyRecord::Key(k) => k,
        };
        if key.nbytes() == 0 {
            return Err(RootError::Format(format!("zero-length record at {}", pos)));
        }
        pos += key.nbytes() as u64;

        if BOOKKEEPING_CLASSES.contains(&key.class()) || key.name() == "StreamerInfo" {
            continue;
        }
        if key.seek_pdir() == 0 || key.seek_pdir() == h.begin {
            keys.push(key.bind(inner));
        }
    }
    Ok(keys)
}
