//! In-memory ROOT file builder for integration tests.
//!
//! Records are appended after a zeroed header area of `begin` bytes; the
//! header itself is written by [`FileBuilder::finish`].

#![allow(dead_code)]

use rootio::compress::{compress, Settings};
use rootio::WBuffer;

/// Version written by recent ROOT releases.
pub const SMALL_VERSION: i32 = 62206;
/// Same release, large-file layout.
pub const LARGE_VERSION: i32 = 1_062_206;

/// Key fields a test controls.
#[derive(Debug, Clone)]
pub struct KeyDef {
    pub class: String,
    pub name: String,
    pub title: String,
    pub cycle: i16,
    pub pdir: i64,
    /// Stored seek-key; `None` writes the record's real offset.
    pub stored_seek: Option<i64>,
}

impl KeyDef {
    pub fn new(class: &str, name: &str) -> Self {
        Self {
            class: class.to_string(),
            name: name.to_string(),
            title: String::new(),
            cycle: 1,
            pdir: 100,
            stored_seek: None,
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn cycle(mut self, cycle: i16) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn pdir(mut self, pdir: i64) -> Self {
        self.pdir = pdir;
        self
    }

    pub fn stored_seek(mut self, seek: i64) -> Self {
        self.stored_seek = Some(seek);
        self
    }
}

/// Where a record landed.
#[derive(Debug, Clone, Copy)]
pub struct Record {
    pub seek: i64,
    pub key_len: i16,
    pub nbytes: i32,
}

impl Record {
    /// Offset of the payload.
    pub fn payload_at(&self) -> i64 {
        self.seek + i64::from(self.key_len)
    }
}

/// Header fields not derived from the records.
#[derive(Debug, Clone, Default)]
pub struct Header {
    pub nbytes_name: i32,
    pub seek_free: i64,
    pub nbytes_free: i32,
    pub nfree: i32,
    pub seek_info: i64,
    pub nbytes_info: i32,
    pub compress: i32,
}

pub struct FileBuilder {
    data: Vec<u8>,
    begin: i64,
    version: i32,
}

impl FileBuilder {
    /// Small-layout file whose first record starts at `begin`.
    pub fn new(begin: i64) -> Self {
        Self::with_version(begin, SMALL_VERSION)
    }

    /// File written with format `version`; above 1,000,000 pointers are 64-bit.
    pub fn with_version(begin: i64, version: i32) -> Self {
        Self { data: vec![0; begin as usize], begin, version }
    }

    pub fn large(&self) -> bool {
        self.version > 1_000_000
    }

    pub fn begin(&self) -> i64 {
        self.begin
    }

    pub fn pos(&self) -> i64 {
        self.data.len() as i64
    }

    pub fn key_len(&self, class: &str, name: &str, title: &str) -> i16 {
        let seeks = if self.large() { 16 } else { 8 };
        (4 + 2 + 4 + 4 + 2 + 2 + seeks + string_len(class) + string_len(name) + string_len(title)) as i16
    }

    fn write_key_header(&self, w: &mut WBuffer, k: &KeyDef, seek: i64, obj_len: i32, stored_len: i32) {
        let key_len = self.key_len(&k.class, &k.name, &k.title);
        w.write_i32(i32::from(key_len) + stored_len);
        w.write_i16(if self.large() { 1004 } else { 4 });
        w.write_i32(obj_len);
        // 2024-03-01 12:00:00
        w.write_u32((29 << 26) | (3 << 22) | (1 << 17) | (12 << 12));
        w.write_i16(key_len);
        w.write_i16(k.cycle);
        let seek = k.stored_seek.unwrap_or(seek);
        if self.large() {
            w.write_i64(seek);
            w.write_i64(k.pdir);
        } else {
            w.write_i32(seek as i32);
            w.write_i32(k.pdir as i32);
        }
        w.write_string(&k.class);
        w.write_string(&k.name);
        w.write_string(&k.title);
    }

    fn payload(&self, k: &KeyDef, write: impl FnOnce(&mut WBuffer)) -> Vec<u8> {
        let key_len = self.key_len(&k.class, &k.name, &k.title);
        let mut w = WBuffer::with_offset(key_len as u64);
        write(&mut w);
        w.into_bytes()
    }

    fn append(&mut self, k: &KeyDef, obj_len: usize, stored: &[u8]) -> Record {
        let seek = self.pos();
        let mut w = WBuffer::new();
        self.write_key_header(&mut w, k, seek, obj_len as i32, stored.len() as i32);
        let key_len = w.pos() as i16;
        w.write_bytes(stored);
        let bytes = w.into_bytes();
        let nbytes = bytes.len() as i32;
        self.data.extend_from_slice(&bytes);
        Record { seek, key_len, nbytes }
    }

    /// Append an uncompressed record; `write` produces the payload.
    pub fn add_key(&mut self, k: &KeyDef, write: impl FnOnce(&mut WBuffer)) -> Record {
        let payload = self.payload(k, write);
        self.append(k, payload.len(), &payload)
    }

    /// Append a record whose payload is compressed with `settings`.
    pub fn add_packed_key(&mut self, k: &KeyDef, settings: Settings, write: impl FnOnce(&mut WBuffer)) -> Record {
        let payload = self.payload(k, write);
        let packed = compress(settings, &payload).unwrap();
        assert!(packed.len() < payload.len(), "fixture payload did not compress");
        self.append(k, payload.len(), &packed)
    }

    /// Append `n` bytes of free space announced by a negative byte count.
    pub fn add_gap(&mut self, n: i32) {
        self.data.extend_from_slice(&(-n).to_be_bytes());
        self.data.extend(std::iter::repeat(0xff).take(n as usize - 4));
    }

    /// A directory record with an empty key list, to be patched later.
    fn dir_record(&self, w: &mut WBuffer, seek_dir: i64, seek_parent: i64, nbytes_name: i32) {
        w.write_i16(if self.large() { 1005 } else { 5 });
        w.write_u32(0);
        w.write_u32(0);
        w.write_i32(0);
        w.write_i32(nbytes_name);
        if self.large() {
            w.write_i64(seek_dir);
            w.write_i64(seek_parent);
            w.write_i64(0);
        } else {
            w.write_i32(seek_dir as i32);
            w.write_i32(seek_parent as i32);
            w.write_i32(0);
        }
        w.write_u16(1);
        w.write_bytes(&[0x5a; 16]);
    }

    /// Append the `TFile` record at `begin`: name, title, top directory.
    ///
    /// Returns the `nbytesname` to put in the header; the top directory
    /// record starts at `begin + nbytesname`.
    pub fn add_top(&mut self, name: &str, title: &str) -> i32 {
        assert_eq!(self.pos(), self.begin);
        let k = KeyDef::new("TFile", name).title(title).pdir(0);
        let nbytes_name =
            i32::from(self.key_len(&k.class, &k.name, &k.title)) + string_len(name) as i32 + string_len(title) as i32;
        let begin = self.begin;
        let mut w = WBuffer::new();
        w.write_string(name);
        w.write_string(title);
        self.dir_record(&mut w, begin, 0, nbytes_name);
        let payload = w.into_bytes();
        self.append(&k, payload.len(), &payload);
        nbytes_name
    }

    /// Append a subdirectory record under `pdir`.
    pub fn add_dir(&mut self, name: &str, cycle: i16, pdir: i64) -> Record {
        let k = KeyDef::new("TDirectoryFile", name).cycle(cycle).pdir(pdir);
        let seek = self.pos();
        let mut w = WBuffer::new();
        self.dir_record(&mut w, seek, pdir, 0);
        let payload = w.into_bytes();
        self.append(&k, payload.len(), &payload)
    }

    /// Append the key-list record of the directory at `seek_dir`, listing
    /// `entries` (copied from the records they describe), and point the
    /// directory record at `dir_at` to it.
    pub fn add_key_list(&mut self, class: &str, name: &str, seek_dir: i64, dir_at: i64, entries: &[Record]) -> Record {
        let mut body = Vec::new();
        body.extend_from_slice(&(entries.len() as i32).to_be_bytes());
        for e in entries {
            let at = e.seek as usize;
            body.extend_from_slice(&self.data[at..at + e.key_len as usize]);
        }
        let k = KeyDef::new(class, name).pdir(seek_dir);
        let list = self.append(&k, body.len(), &body);
        self.point_dir_at(dir_at, &list);
        list
    }

    /// Patch the directory record at `dir_at` to use the key list `list`.
    pub fn point_dir_at(&mut self, dir_at: i64, list: &Record) {
        let at = dir_at as usize;
        self.data[at + 10..at + 14].copy_from_slice(&list.nbytes.to_be_bytes());
        if self.large() {
            self.data[at + 34..at + 42].copy_from_slice(&list.seek.to_be_bytes());
        } else {
            self.data[at + 26..at + 30].copy_from_slice(&(list.seek as i32).to_be_bytes());
        }
    }

    /// Copy of the key header stored at `rec`, for hand-made key lists.
    pub fn key_header(&self, rec: &Record) -> Vec<u8> {
        let at = rec.seek as usize;
        self.data[at..at + rec.key_len as usize].to_vec()
    }

    /// Overwrite bytes at `at`.
    pub fn patch(&mut self, at: i64, bytes: &[u8]) {
        let at = at as usize;
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Write the header and return the file bytes.
    pub fn finish(mut self, h: &Header) -> Vec<u8> {
        let end = self.pos();
        let large = self.large();
        let mut w = WBuffer::new();
        w.write_bytes(b"root");
        w.write_i32(self.version);
        w.write_i32(self.begin as i32);
        let ptr = |w: &mut WBuffer, v: i64| {
            if large {
                w.write_i64(v)
            } else {
                w.write_i32(v as i32)
            }
        };
        ptr(&mut w, end);
        ptr(&mut w, h.seek_free);
        w.write_i32(h.nbytes_free);
        w.write_i32(h.nfree);
        w.write_i32(h.nbytes_name);
        w.write_u8(if large { 8 } else { 4 });
        w.write_i32(h.compress);
        ptr(&mut w, h.seek_info);
        w.write_i32(h.nbytes_info);
        w.write_u16(4);
        w.write_bytes(&[0x11; 16]);
        let header = w.into_bytes();
        assert!(header.len() as i64 <= self.begin, "header overlaps first record");
        self.data[..header.len()].copy_from_slice(&header);
        self.data
    }
}

fn string_len(s: &str) -> usize {
    if s.len() < 255 {
        1 + s.len()
    } else {
        5 + s.len()
    }
}
