//! `TFree`: one entry of a file's free-space list.

use crate::error::Result;
use crate::factory::RootClass;
use crate::objects::{object_any, Object};
use crate::rbuffer::RBuffer;
use crate::wbuffer::WBuffer;

/// A free byte range `[first, last]` inside the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeSegment {
    /// First free byte.
    pub first: u64,
    /// Last free byte (inclusive).
    pub last: u64,
}

impl FreeSegment {
    /// Number of free bytes.
    pub fn len(&self) -> u64 {
        self.last.saturating_sub(self.first) + 1
    }

    /// Always false: a segment covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Serialize; versions above 1000 carry 64-bit bounds.
    pub fn write_to(&self, w: &mut WBuffer, large: bool) {
        if large {
            w.write_i16(1001);
            w.write_i64(self.first as i64);
            w.write_i64(self.last as i64);
        } else {
            w.write_i16(1);
            w.write_i32(self.first as i32);
            w.write_i32(self.last as i32);
        }
    }
}

impl RootClass for FreeSegment {
    const CLASS: &'static str = "TFree";
}

impl Object for FreeSegment {
    fn class(&self) -> &str {
        Self::CLASS
    }

    fn unmarshal(&mut self, r: &mut RBuffer<'_>) -> Result<()> {
        let version = r.read_i16()?;
        if version > 1000 {
            self.first = r.read_i64()? as u64;
            self.last = r.read_i64()? as u64;
        } else {
            self.first = r.read_i32()? as u32 as u64;
            self.last = r.read_i32()? as u32 as u64;
        }
        Ok(())
    }

    object_any!();
}
