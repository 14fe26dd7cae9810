//! Binary reader for ROOT's big-endian serialization format.
//!
//! [`RBuffer`] is a cursor over a byte slice. Positions reported by
//! [`RBuffer::pos`] are *absolute*: they include the displacement of the
//! slice inside its key record (the key header length), because ROOT's
//! object-reference tags are expressed in that coordinate space.
//!
//! The cursor is sticky: the first failed read poisons it, and every later
//! read returns the same error without touching the data. Decoders can
//! therefore chain reads with `?` and never observe a half-valid state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, RootError};
use crate::factory::DecodeContext;
use crate::objects::Object;

/// Bit set in a leading u32 when it carries a byte count.
pub const K_BYTE_COUNT_MASK: u32 = 0x4000_0000;
/// Same flag, seen from the high half of the word (u16 reads).
pub const K_BYTE_COUNT_V_MASK: u16 = 0x4000;
/// Tag introducing a new class name in the stream.
pub const K_NEW_CLASS_TAG: u32 = 0xFFFF_FFFF;
/// Bit set on tags that reference an already-seen class.
pub const K_CLASS_MASK: u32 = 0x8000_0000;
/// Offset added to stream positions when registering references.
pub const K_MAP_OFFSET: u64 = 2;
/// Longest class name accepted after a new-class tag.
const MAX_CLASS_NAME: usize = 80;
/// Default limit on how deeply objects may be embedded in one another.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// A decoded version envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    /// Streamer version of the class.
    pub version: i16,
    /// Absolute position of the envelope's first byte.
    pub start: u64,
    /// Byte count with the mask bit removed; 0 when the envelope had none.
    pub bcnt: u32,
}

impl Version {
    /// Absolute position where the object ends, when a byte count is present.
    pub fn end(&self) -> Option<u64> {
        (self.bcnt > 0).then(|| self.start + u64::from(self.bcnt) + 4)
    }
}

/// What a reference tag in the stream points to.
enum Ref {
    Class(String),
    Object(Arc<dyn Object>),
}

/// The cursor's one-way failure state.
#[derive(Debug, Clone)]
enum Poison {
    Underflow { offset: usize, need: usize, have: usize },
    Other(String),
}

impl Poison {
    fn to_error(&self) -> RootError {
        match self {
            Poison::Underflow { offset, need, have } => {
                RootError::BufferUnderflow { offset: *offset, need: *need, have: *have }
            }
            Poison::Other(msg) => RootError::Format(format!("buffer poisoned by earlier error: {}", msg)),
        }
    }
}

/// A cursor-based reader over a byte slice, using ROOT's big-endian conventions.
pub struct RBuffer<'a> {
    data: &'a [u8],
    pos: usize,
    offset: u64,
    poison: Option<Poison>,
    refs: HashMap<u64, Ref>,
    ctx: Option<DecodeContext<'a>>,
    depth: usize,
    max_depth: usize,
}

macro_rules! read_arrays {
    ($($fast:ident, $stat:ident, $read:ident, $t:ty, $size:expr;)*) => {
        $(
            #[doc = concat!("Read `n` consecutive `", stringify!($t), "` values (no count prefix).")]
            pub fn $fast(&mut self, n: usize) -> Result<Vec<$t>> {
                self.ensure(n.saturating_mul($size))?;
                let mut out = Vec::with_capacity(n);
                for _ in 0..n {
                    out.push(self.$read()?);
                }
                Ok(out)
            }

            #[doc = concat!("Read an i32 count followed by that many `", stringify!($t), "` values.")]
            pub fn $stat(&mut self) -> Result<Vec<$t>> {
                let n = self.read_i32()?;
                if n <= 0 {
                    return Ok(Vec::new());
                }
                self.$fast(n as usize)
            }
        )*
    };
}

impl<'a> RBuffer<'a> {
    /// Create a new reader over the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            offset: 0,
            poison: None,
            refs: HashMap::new(),
            ctx: None,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Declare that `data` starts at absolute position `offset`.
    ///
    /// Key payloads are read with `offset = keylen`.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Attach the registry (and streamer infos) used to instantiate
    /// objects met in the stream.
    pub fn with_context(mut self, ctx: DecodeContext<'a>) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// Limit how many objects may be decoded inside one another.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Decode context, if one was attached.
    pub fn context(&self) -> Option<DecodeContext<'a>> {
        self.ctx
    }

    /// Current absolute read position.
    #[inline]
    pub fn pos(&self) -> u64 {
        self.offset + self.pos as u64
    }

    /// Move the cursor to absolute position `pos`.
    pub fn set_pos(&mut self, pos: u64) -> Result<()> {
        if let Some(p) = &self.poison {
            return Err(p.to_error());
        }
        let local = pos
            .checked_sub(self.offset)
            .and_then(|p| usize::try_from(p).ok())
            .filter(|&p| p <= self.data.len());
        match local {
            Some(p) => {
                self.pos = p;
                Ok(())
            }
            None => Err(self.poison(RootError::Format(format!(
                "seek to {} outside buffer [{}, {}]",
                pos,
                self.offset,
                self.offset + self.data.len() as u64
            )))),
        }
    }

    /// Total length of underlying buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Remaining bytes from current position.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Whether an earlier read failed.
    pub fn is_poisoned(&self) -> bool {
        self.poison.is_some()
    }

    /// The error that poisoned the cursor, if any.
    pub fn err(&self) -> Option<RootError> {
        self.poison.as_ref().map(Poison::to_error)
    }

    /// Record `err` as the cursor's permanent failure and hand it back.
    ///
    /// Only the first failure is kept.
    pub fn poison(&mut self, err: RootError) -> RootError {
        if self.poison.is_none() {
            self.poison = Some(match &err {
                RootError::BufferUnderflow { offset, need, have } => {
                    Poison::Underflow { offset: *offset, need: *need, have: *have }
                }
                other => Poison::Other(other.to_string()),
            });
        }
        err
    }

    /// Skip `n` bytes forward.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    /// Read a sub-slice of `n` bytes, advancing the cursor.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read a fixed-length byte array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    /// Read a signed byte.
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Read a one-byte boolean (any non-zero value is `true`).
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a big-endian u16.
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian i16.
    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian u32.
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian i32.
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian u64.
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian i64.
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian f32.
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian f64.
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.read_array()?))
    }

    /// Read a ROOT-encoded string.
    ///
    /// Format: length byte (if < 255), or 255 + u32 length, then the bytes.
    pub fn read_string(&mut self) -> Result<String> {
        let first = self.read_u8()?;
        let len = if first == 255 { self.read_u32()? as usize } else { first as usize };
        if len == 0 {
            return Ok(String::new());
        }
        let bytes = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read a `std::string` member; same wire format as [`read_string`](Self::read_string).
    pub fn read_std_string(&mut self) -> Result<String> {
        self.read_string()
    }

    /// Read a NUL-terminated string of at most `max` bytes.
    ///
    /// The terminator is consumed but not returned. Reaching `max` without a
    /// terminator returns the `max` bytes read.
    pub fn read_cstring(&mut self, max: usize) -> Result<String> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.read_u8()? {
                0 => break,
                b => out.push(b),
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    read_arrays! {
        read_fast_array_bool, read_static_array_bool, read_bool, bool, 1;
        read_fast_array_i8, read_static_array_i8, read_i8, i8, 1;
        read_fast_array_u8, read_static_array_u8, read_u8, u8, 1;
        read_fast_array_i16, read_static_array_i16, read_i16, i16, 2;
        read_fast_array_u16, read_static_array_u16, read_u16, u16, 2;
        read_fast_array_i32, read_static_array_i32, read_i32, i32, 4;
        read_fast_array_u32, read_static_array_u32, read_u32, u32, 4;
        read_fast_array_i64, read_static_array_i64, read_i64, i64, 8;
        read_fast_array_u64, read_static_array_u64, read_u64, u64, 8;
        read_fast_array_f32, read_static_array_f32, read_f32, f32, 4;
        read_fast_array_f64, read_static_array_f64, read_f64, f64, 8;
    }

    /// Read a ROOT streamer version envelope.
    ///
    /// ROOT uses `kByteCountMask = 0x4000_0000` on the first u32 to signal that
    /// a byte count is present. The byte count spans from right after the u32
    /// to the end of the object (i.e. it includes the version u16). Without
    /// the mask, the first two bytes are the version itself.
    ///
    /// A non-positive version of a class with a known streamer info is
    /// followed by the class checksum; when it matches, the streamer info's
    /// class version is reported instead.
    pub fn read_version(&mut self, class: &str) -> Result<Version> {
        let start = self.pos();
        let raw = self.read_u32()?;
        let (mut version, bcnt) = if raw & K_BYTE_COUNT_MASK != 0 {
            (self.read_i16()?, raw & !K_BYTE_COUNT_MASK)
        } else {
            self.set_pos(start)?;
            (self.read_i16()?, 0)
        };

        if version <= 0 && !class.is_empty() {
            let info = self.ctx.and_then(|ctx| ctx.streamer_info(class, -1));
            if let Some(si) = info {
                if i32::from(version) != si.class_version() {
                    let checksum = self.read_u32()?;
                    if checksum == si.checksum() {
                        version = si.class_version() as i16;
                    }
                }
            }
        }

        Ok(Version { version, start, bcnt })
    }

    /// Read the bare i16 version of a class streamed without a byte count
    /// (`TObject`), stepping over a byte count if one is present anyway.
    pub fn read_short_version(&mut self) -> Result<i16> {
        let version = self.read_i16()?;
        if version as u16 & K_BYTE_COUNT_V_MASK != 0 {
            self.skip(2)?;
            return self.read_i16();
        }
        Ok(version)
    }

    /// Check that the cursor sits exactly at the end announced by `v`.
    ///
    /// Envelopes without a byte count are not checked.
    pub fn check_byte_count(&mut self, v: &Version, class: &str) -> Result<()> {
        if let Some(p) = &self.poison {
            return Err(p.to_error());
        }
        let Some(expected) = v.end() else {
            return Ok(());
        };
        let got = self.pos();
        if got == expected {
            return Ok(());
        }
        Err(self.poison(RootError::ByteCount { class: class.to_string(), expected, got }))
    }

    /// Jump to the end of the envelope `v`, discarding unread trailing members.
    pub fn skip_to_end(&mut self, v: &Version, class: &str) -> Result<()> {
        match v.end() {
            Some(end) => self.set_pos(end),
            None => Err(self.poison(RootError::NotImplemented(format!(
                "cannot skip {} streamed without byte count",
                class
            )))),
        }
    }

    /// Read an envelope and step over the whole object it announces.
    pub fn skip_version(&mut self, class: &str) -> Result<Version> {
        let v = self.read_version(class)?;
        self.skip_to_end(&v, class)?;
        Ok(v)
    }

    /// Read a possibly-null, possibly-shared object pointer.
    ///
    /// Handles the three tag forms: a reference to an object already read
    /// from this buffer, a new class name followed by the object, or a
    /// reference to an already-seen class followed by the object.
    pub fn read_object_any(&mut self) -> Result<Option<Arc<dyn Object>>> {
        let beg = self.pos();
        let first = self.read_u32()?;

        let (tag, bcnt, class_pos) = if first & K_BYTE_COUNT_MASK == 0 || first == K_NEW_CLASS_TAG {
            (first, 0u32, None)
        } else {
            let start = self.pos();
            (self.read_u32()?, first & !K_BYTE_COUNT_MASK, Some(start))
        };

        if tag & K_CLASS_MASK == 0 {
            if tag == 0 {
                return Ok(None);
            }
            if tag == 1 {
                return Err(self.poison(RootError::NotImplemented(
                    "self-reference (tag == 1) in object stream".into(),
                )));
            }
            let found = match self.refs.get(&u64::from(tag)) {
                Some(Ref::Object(obj)) => Ok(Some(Arc::clone(obj))),
                Some(Ref::Class(class)) => {
                    Err(format!("object tag {} points at class {:?}", tag, class))
                }
                None => Ok(None),
            };
            return match found {
                Ok(Some(obj)) => Ok(Some(obj)),
                Ok(None) => {
                    log::debug!("unknown object tag {} at {}: skipping", tag, beg);
                    self.set_pos(beg + u64::from(bcnt) + 4)?;
                    Ok(None)
                }
                Err(msg) => Err(self.poison(RootError::Consistency(msg))),
            };
        }

        let class = if tag == K_NEW_CLASS_TAG {
            let name = self.read_cstring(MAX_CLASS_NAME)?;
            let slot = match class_pos {
                Some(start) => start + K_MAP_OFFSET,
                None => self.refs.len() as u64 + 1,
            };
            self.refs.insert(slot, Ref::Class(name.clone()));
            name
        } else {
            let slot = u64::from(tag & !K_CLASS_MASK);
            let known = match self.refs.get(&slot) {
                Some(Ref::Class(name)) => Some(name.clone()),
                _ => None,
            };
            match known {
                Some(name) => name,
                None => {
                    return Err(self.poison(RootError::Consistency(format!(
                        "invalid class-tag reference {} at {}",
                        slot, beg
                    ))))
                }
            }
        };

        let mut obj = match self.instantiate(&class) {
            Ok(obj) => obj,
            Err(e) => return Err(self.poison(e)),
        };
        if let Err(e) = self.nested(&class, |r| obj.unmarshal(r)) {
            let e = self.poison(e);
            return Err(e.context(format!("decoding {}", class)));
        }

        let obj: Arc<dyn Object> = Arc::from(obj);
        let slot = if class_pos.is_some() { beg + K_MAP_OFFSET } else { self.refs.len() as u64 + 1 };
        self.refs.insert(slot, Ref::Object(Arc::clone(&obj)));
        Ok(Some(obj))
    }

    /// Create an empty instance of `class` through the attached context.
    pub fn instantiate(&self, class: &str) -> Result<Box<dyn Object>> {
        match self.ctx {
            Some(ctx) => ctx.create(class),
            None => Err(RootError::NotImplemented(format!(
                "no decode context to instantiate {:?}",
                class
            ))),
        }
    }

    /// Run `f` one nesting level down.
    ///
    /// Fails with a format error, and poisons the cursor, once the limit set
    /// by [`with_max_depth`](Self::with_max_depth) would be passed.
    pub fn nested<T>(&mut self, class: &str, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= self.max_depth {
            return Err(self.poison(RootError::Format(format!(
                "{} nested deeper than {} objects at {}",
                class,
                self.max_depth,
                self.pos()
            ))));
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    /// Current nesting level.
    pub fn depth(&self) -> usize {
        self.depth
    }

    // ── internal ────────────────────────────────────────────────

    fn ensure(&mut self, n: usize) -> Result<()> {
        if let Some(p) = &self.poison {
            return Err(p.to_error());
        }
        if self.pos.saturating_add(n) > self.data.len() {
            let err = RootError::BufferUnderflow {
                offset: self.pos,
                need: n,
                have: self.data.len().saturating_sub(self.pos),
            };
            return Err(self.poison(err));
        }
        Ok(())
    }
}
