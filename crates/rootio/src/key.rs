//! TKey parsing: the record header ROOT uses to locate objects.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::compress::decompress;
use crate::datasource::DataSource;
use crate::directory::Directory;
use crate::error::{Result, RootError};
use crate::factory::DecodeContext;
use crate::file::FileInner;
use crate::objects::Object;
use crate::rbuffer::RBuffer;

/// Class name of nested directories.
pub const DIRECTORY_CLASS: &str = "TDirectoryFile";

/// One record read at a position in the record stream.
#[derive(Debug, Clone)]
pub enum KeyRecord {
    /// A regular key.
    Key(Key),
    /// Free space of the given length; the next record starts that many bytes
    /// after this one.
    Gap(u64),
}

/// Creation time of a key, unpacked from ROOT's 32-bit `TDatime`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Datime {
    /// Calendar year.
    pub year: u32,
    /// Month, 1-12.
    pub month: u32,
    /// Day of month, 1-31.
    pub day: u32,
    /// Hour, 0-23.
    pub hour: u32,
    /// Minute, 0-59.
    pub minute: u32,
    /// Second, 0-59.
    pub second: u32,
}

impl Datime {
    /// Unpack a `TDatime` word (years counted from 1995).
    pub fn from_raw(d: u32) -> Self {
        Self {
            year: (d >> 26) + 1995,
            month: (d << 6) >> 28,
            day: (d << 10) >> 27,
            hour: (d << 15) >> 27,
            minute: (d << 20) >> 26,
            second: (d << 26) >> 26,
        }
    }

    /// Pack back into a `TDatime` word.
    pub fn to_raw(self) -> u32 {
        (self.year.saturating_sub(1995) << 26)
            | (self.month << 22)
            | (self.day << 17)
            | (self.hour << 12)
            | (self.minute << 6)
            | self.second
    }
}

impl fmt::Display for Datime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// A parsed TKey record.
///
/// Keys are index metadata: the payload is only read (and decompressed) on
/// the first call to [`bytes`](Key::bytes), then kept.
#[derive(Clone)]
pub struct Key {
    nbytes: i32,
    version: i16,
    obj_len: i32,
    datime: u32,
    key_len: i16,
    cycle: i16,
    seek_key: i64,
    seek_pdir: i64,
    class: String,
    name: String,
    title: String,
    file: Option<Arc<FileInner>>,
    payload: OnceLock<Arc<[u8]>>,
}

impl Key {
    /// Read one record at the cursor.
    ///
    /// A negative leading byte count is a gap: nothing past it is decoded.
    pub fn read_record(r: &mut RBuffer<'_>) -> Result<KeyRecord> {
        let nbytes = r.read_i32()?;
        if nbytes < 0 {
            return Ok(KeyRecord::Gap(u64::from(nbytes.unsigned_abs())));
        }

        let version = r.read_i16()?;
        let obj_len = r.read_i32()?;
        let datime = r.read_u32()?;
        let key_len = r.read_i16()?;
        let cycle = r.read_i16()?;

        let (seek_key, seek_pdir) = if version > 1000 {
            (r.read_i64()?, r.read_i64()?)
        } else {
            (i64::from(r.read_i32()?), i64::from(r.read_i32()?))
        };

        let mut class = r.read_string()?;
        if class == "TDirectory" {
            class = DIRECTORY_CLASS.to_string();
        }
        let name = r.read_string()?;
        let title = r.read_string()?;

        log::trace!("key {:?} ({}) cycle {} at {}", name, class, cycle, seek_key);

        Ok(KeyRecord::Key(Key {
            nbytes,
            version,
            obj_len,
            datime,
            key_len,
            cycle,
            seek_key,
            seek_pdir,
            class,
            name,
            title,
            file: None,
            payload: OnceLock::new(),
        }))
    }

    /// Read the record stored at absolute `offset` and check that a key found
    /// there points back at `offset`.
    ///
    /// A stored seek-key of 0 is taken to mean `offset`.
    pub fn read_at(r: &mut RBuffer<'_>, offset: u64) -> Result<KeyRecord> {
        r.set_pos(offset)?;
        let mut key = match Self::read_record(r)? {
            KeyRecord::Key(key) => key,
            gap => return Ok(gap),
        };
        if key.seek_key == 0 {
            key.seek_key = offset as i64;
        }
        if key.seek_key as u64 != offset {
            return Err(RootError::SeekKeyMismatch {
                name: key.name,
                stored: key.seek_key as u64,
                actual: offset,
            });
        }
        Ok(KeyRecord::Key(key))
    }

    pub(crate) fn bind(mut self, file: &Arc<FileInner>) -> Self {
        self.file = Some(Arc::clone(file));
        self
    }

    pub(crate) fn file(&self) -> Result<&Arc<FileInner>> {
        self.file
            .as_ref()
            .ok_or_else(|| RootError::Consistency(format!("key {:?} is not attached to a file", self.name)))
    }

    /// Object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Class name of the stored object.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Cycle number of this name within its directory.
    pub fn cycle(&self) -> i16 {
        self.cycle
    }

    /// Uncompressed object length.
    pub fn obj_len(&self) -> i32 {
        self.obj_len
    }

    /// On-disk length of key header plus (possibly compressed) payload.
    pub fn nbytes(&self) -> i32 {
        self.nbytes
    }

    /// Length of the key header.
    pub fn key_len(&self) -> i16 {
        self.key_len
    }

    /// Key format version; above 1000 seek fields are 64-bit.
    pub fn version(&self) -> i16 {
        self.version
    }

    /// File offset of this key.
    pub fn seek_key(&self) -> i64 {
        self.seek_key
    }

    /// File offset of the directory holding this key.
    pub fn seek_pdir(&self) -> i64 {
        self.seek_pdir
    }

    /// Creation time.
    pub fn datime(&self) -> Datime {
        Datime::from_raw(self.datime)
    }

    /// Whether the payload is stored compressed.
    pub fn is_compressed(&self) -> bool {
        i64::from(self.obj_len) != i64::from(self.nbytes) - i64::from(self.key_len)
    }

    /// Whether this key names a nested directory.
    pub fn is_directory(&self) -> bool {
        self.class == DIRECTORY_CLASS
    }

    /// Uncompressed payload, loaded on first use.
    pub fn bytes(&self) -> Result<Arc<[u8]>> {
        if let Some(bytes) = self.payload.get() {
            return Ok(Arc::clone(bytes));
        }
        let file = self.file()?;
        if file.config.verify_seek_keys {
            self.verify(&file.data)?;
        }
        let loaded: Arc<[u8]> =
            self.read_payload(&file.data).map_err(|e| e.context(format!("key {:?}", self.name)))?.into();
        Ok(Arc::clone(self.payload.get_or_init(|| loaded)))
    }

    /// Decode the stored object.
    ///
    /// The class is looked up in the file's registry, falling back to the
    /// file's streamer infos. Directory keys yield a [`Directory`].
    pub fn object(&self) -> Result<Box<dyn Object>> {
        if self.is_directory() {
            return Ok(Box::new(Directory::from_key(self)?));
        }
        let file = self.file()?;
        let bytes = self.bytes()?;
        let ctx = DecodeContext::new(&file.registry).with_streamers(&file.streamers);
        let what = || format!("key {:?} ({})", self.name, self.class);

        let mut obj = ctx.create(&self.class).map_err(|e| e.context(what()))?;
        let mut r = RBuffer::new(&bytes)
            .with_offset(self.key_len as u64)
            .with_context(ctx)
            .with_max_depth(file.config.max_depth);
        obj.unmarshal(&mut r).map_err(|e| e.context(what()))?;
        Ok(obj)
    }

    /// Read and, when needed, decompress the payload from the file bytes.
    pub(crate) fn read_payload(&self, data: &DataSource) -> Result<Vec<u8>> {
        let start = self.offset_of(i64::from(self.key_len))?;
        let obj_len = usize::try_from(self.obj_len)
            .map_err(|_| RootError::Format(format!("negative object length {}", self.obj_len)))?;
        if self.is_compressed() {
            let stored = i64::from(self.nbytes) - i64::from(self.key_len);
            if stored < 0 {
                return Err(RootError::Format(format!(
                    "key length {} exceeds record length {}",
                    self.key_len, self.nbytes
                )));
            }
            decompress(data.range(start, stored as u64)?, obj_len)
        } else {
            Ok(data.range(start, obj_len as u64)?.to_vec())
        }
    }

    /// Re-read the key header at `seek_key` and check it describes this key.
    fn verify(&self, data: &DataSource) -> Result<()> {
        let at = self.offset_of(0)?;
        let mut r = RBuffer::new(data);
        match Self::read_at(&mut r, at)? {
            KeyRecord::Key(k) if k.nbytes == self.nbytes && k.name == self.name && k.cycle == self.cycle => {
                Ok(())
            }
            KeyRecord::Key(k) => Err(RootError::Consistency(format!(
                "key {:?};{} points at record {:?};{} at {}",
                self.name, self.cycle, k.name, k.cycle, at
            ))),
            KeyRecord::Gap(_) => Err(RootError::Consistency(format!(
                "key {:?} points at free space at {}",
                self.name, at
            ))),
        }
    }

    fn offset_of(&self, delta: i64) -> Result<u64> {
        self.seek_key
            .checked_add(delta)
            .and_then(|p| u64::try_from(p).ok())
            .ok_or_else(|| RootError::Format(format!("key {:?}: bad seek-key {}", self.name, self.seek_key)))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("cycle", &self.cycle)
            .field("nbytes", &self.nbytes)
            .field("obj_len", &self.obj_len)
            .field("key_len", &self.key_len)
            .field("seek_key", &self.seek_key)
            .field("seek_pdir", &self.seek_pdir)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::wbuffer::WBuffer;

    /// Write a key header for a payload of `obj_len` bytes stored in
    /// `stored_len` bytes, with 32-bit or 64-bit seek fields.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn write_key(
        w: &mut WBuffer,
        class: &str,
        name: &str,
        cycle: i16,
        seek_key: i64,
        obj_len: i32,
        stored_len: i32,
        large: bool,
    ) {
        let seeks = if large { 16 } else { 8 };
        let key_len =
            (4 + 2 + 4 + 4 + 2 + 2 + seeks + 1 + class.len() + 1 + name.len() + 1) as i16;
        w.write_i32(i32::from(key_len) + stored_len);
        w.write_i16(if large { 1004 } else { 4 });
        w.write_i32(obj_len);
        w.write_u32(Datime { year: 2024, month: 5, day: 17, hour: 9, minute: 30, second: 12 }.to_raw());
        w.write_i16(key_len);
        w.write_i16(cycle);
        if large {
            w.write_i64(seek_key);
            w.write_i64(100);
        } else {
            w.write_i32(seek_key as i32);
            w.write_i32(100);
        }
        w.write_string(class);
        w.write_string(name);
        w.write_string("");
    }

    fn read_key(bytes: &[u8], at: u64) -> Result<Key> {
        match Key::read_at(&mut RBuffer::new(bytes), at)? {
            KeyRecord::Key(k) => Ok(k),
            KeyRecord::Gap(n) => panic!("unexpected gap of {}", n),
        }
    }

    #[test]
    fn small_and_large_keys() {
        for large in [false, true] {
            let mut w = WBuffer::new();
            write_key(&mut w, "TNamed", "h", 3, 0, 20, 20, large);
            let bytes = w.into_bytes();
            let k = read_key(&bytes, 0).unwrap();
            assert_eq!(k.name(), "h");
            assert_eq!(k.class(), "TNamed");
            assert_eq!(k.cycle(), 3);
            assert_eq!(k.seek_pdir(), 100);
            assert_eq!(i64::from(k.key_len()), bytes.len() as i64);
            assert_eq!(k.version() > 1000, large);
            assert!(!k.is_compressed());
        }
    }

    #[test]
    fn zero_seek_key_defaults_to_offset() {
        let mut w = WBuffer::new();
        w.write_bytes(&[0; 40]);
        write_key(&mut w, "TNamed", "h", 1, 0, 0, 0, false);
        let k = read_key(&w.into_bytes(), 40).unwrap();
        assert_eq!(k.seek_key(), 40);
    }

    #[test]
    fn wrong_seek_key_is_rejected() {
        let mut w = WBuffer::new();
        w.write_bytes(&[0; 40]);
        write_key(&mut w, "TNamed", "h", 1, 44, 0, 0, false);
        let err = read_key(&w.into_bytes(), 40).unwrap_err();
        assert!(err.is_consistency());
        assert!(matches!(err, RootError::SeekKeyMismatch { stored: 44, actual: 40, .. }));
    }

    #[test]
    fn gap_stops_decoding() {
        let mut w = WBuffer::new();
        w.write_i32(-64);
        w.write_bytes(&[0xff; 3]);
        let bytes = w.into_bytes();
        let mut r = RBuffer::new(&bytes);
        assert!(matches!(Key::read_record(&mut r).unwrap(), KeyRecord::Gap(64)));
        assert_eq!(r.pos(), 4);
    }

    #[test]
    fn old_directory_class_is_renamed() {
        let mut w = WBuffer::new();
        write_key(&mut w, "TDirectory", "sub", 1, 0, 0, 0, false);
        let k = read_key(&w.into_bytes(), 0).unwrap();
        assert_eq!(k.class(), DIRECTORY_CLASS);
        assert!(k.is_directory());
    }

    #[test]
    fn compression_is_inferred_from_lengths() {
        let mut w = WBuffer::new();
        write_key(&mut w, "TNamed", "h", 1, 0, 2048, 100, false);
        let k = read_key(&w.into_bytes(), 0).unwrap();
        assert!(k.is_compressed());
        assert_eq!(k.nbytes() - i32::from(k.key_len()), 100);
    }

    #[test]
    fn payload_is_read_after_header() {
        let mut w = WBuffer::new();
        write_key(&mut w, "TObjString", "s", 1, 0, 5, 5, false);
        w.write_bytes(b"hello");
        let data = DataSource::Owned(w.into_bytes());
        let k = read_key(&data, 0).unwrap();
        assert_eq!(k.read_payload(&data).unwrap(), b"hello");
        assert!(k.verify(&data).is_ok());
    }

    #[test]
    fn compressed_payload_is_inflated() {
        let raw: Vec<u8> = (0..4096u32).map(|i| (i % 7) as u8).collect();
        let packed = crate::compress::compress(crate::compress::Settings::default(), &raw).unwrap();
        assert!(packed.len() < raw.len());

        let mut w = WBuffer::new();
        write_key(&mut w, "TObjString", "s", 1, 0, raw.len() as i32, packed.len() as i32, false);
        w.write_bytes(&packed);
        let data = DataSource::Owned(w.into_bytes());
        let k = read_key(&data, 0).unwrap();
        assert!(k.is_compressed());
        assert_eq!(k.read_payload(&data).unwrap(), raw);
    }

    #[test]
    fn unbound_key_has_no_payload() {
        let mut w = WBuffer::new();
        write_key(&mut w, "TNamed", "h", 1, 0, 0, 0, false);
        let k = read_key(&w.into_bytes(), 0).unwrap();
        assert!(k.bytes().unwrap_err().is_consistency());
    }

    #[test]
    fn datime_unpacks_bit_fields() {
        let d = Datime { year: 2017, month: 12, day: 31, hour: 23, minute: 59, second: 58 };
        assert_eq!(Datime::from_raw(d.to_raw()), d);
        assert_eq!(d.to_string(), "2017-12-31 23:59:58");
        assert_eq!(Datime::from_raw(0).year, 1995);
    }
}
