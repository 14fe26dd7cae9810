//! `TObject` and `TNamed`, the bases of nearly every streamed class.

use crate::error::Result;
use crate::factory::RootClass;
use crate::objects::{object_any, Named, Object};
use crate::rbuffer::RBuffer;
use crate::wbuffer::WBuffer;

/// Set on every object read back from a file.
const K_IS_ON_HEAP: u32 = 0x0100_0000;
/// The object is referenced through a `TRef`; a process-id index follows.
const K_IS_REFERENCED: u32 = 1 << 4;

/// The root of ROOT's class hierarchy: an id and a bit field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TObject {
    unique_id: u32,
    bits: u32,
}

impl TObject {
    /// Object with the given id and no bits set.
    pub fn new(unique_id: u32) -> Self {
        Self { unique_id, bits: 0 }
    }

    /// Same object with `fBits` replaced.
    pub fn with_bits(mut self, bits: u32) -> Self {
        self.bits = bits;
        self
    }

    /// `fUniqueID`.
    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    /// `fBits`, with `kIsOnHeap` set once decoded.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Decode a `TObject` in place (it is streamed without a byte count).
    pub fn read(r: &mut RBuffer<'_>) -> Result<Self> {
        let _version = r.read_short_version()?;
        let unique_id = r.read_u32()?;
        let bits = r.read_u32()? | K_IS_ON_HEAP;
        if bits & K_IS_REFERENCED != 0 {
            // process-id index of the TRef
            r.skip(2)?;
        }
        Ok(Self { unique_id, bits })
    }

    /// Serialize as written by ROOT (version 1, no byte count).
    pub fn write_to(&self, w: &mut WBuffer) {
        w.write_i16(1);
        w.write_u32(self.unique_id);
        w.write_u32(self.bits & !K_IS_ON_HEAP);
        if self.bits & K_IS_REFERENCED != 0 {
            w.write_u16(0);
        }
    }
}

impl RootClass for TObject {
    const CLASS: &'static str = "TObject";
}

impl Object for TObject {
    fn class(&self) -> &str {
        Self::CLASS
    }

    fn unmarshal(&mut self, r: &mut RBuffer<'_>) -> Result<()> {
        *self = Self::read(r)?;
        Ok(())
    }

    object_any!();
}

/// A `TObject` with a name and a title.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TNamed {
    object: TObject,
    name: String,
    title: String,
}

impl TNamed {
    /// Build a named object (used when writing fixtures).
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self { object: TObject::default(), name: name.into(), title: title.into() }
    }

    /// Same name and title over a different `TObject` base.
    pub fn with_object(mut self, object: TObject) -> Self {
        self.object = object;
        self
    }

    /// Object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// The `TObject` base.
    pub fn object(&self) -> &TObject {
        &self.object
    }

    /// Decode a `TNamed` sub-object.
    pub fn read(r: &mut RBuffer<'_>) -> Result<Self> {
        let v = r.read_version(Self::CLASS)?;
        let object = TObject::read(r)?;
        let name = r.read_string()?;
        let title = r.read_string()?;
        r.check_byte_count(&v, Self::CLASS)?;
        Ok(Self { object, name, title })
    }

    /// Serialize with a version-1 envelope.
    pub fn write_to(&self, w: &mut WBuffer) -> Result<()> {
        let beg = w.write_version(1);
        self.object.write_to(w);
        w.write_string(&self.name);
        w.write_string(&self.title);
        w.set_byte_count(beg)?;
        Ok(())
    }
}

impl RootClass for TNamed {
    const CLASS: &'static str = "TNamed";
}

impl Named for TNamed {
    fn name(&self) -> &str {
        &self.name
    }

    fn title(&self) -> &str {
        &self.title
    }
}

impl Object for TNamed {
    fn class(&self) -> &str {
        Self::CLASS
    }

    fn unmarshal(&mut self, r: &mut RBuffer<'_>) -> Result<()> {
        *self = Self::read(r)?;
        Ok(())
    }

    object_any!();

    fn as_named(&self) -> Option<&dyn Named> {
        Some(self)
    }
}
