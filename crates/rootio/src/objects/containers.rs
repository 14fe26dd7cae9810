//! Collection classes: `TList`, `THashList`, `TObjArray`, and `TObjString`.

use std::ops::Deref;
use std::sync::Arc;

use crate::error::{Result, RootError};
use crate::factory::RootClass;
use crate::objects::{object_any, Named, Object, TObject};
use crate::rbuffer::RBuffer;
use crate::wbuffer::WBuffer;

/// A doubly linked list of objects, each with a draw-option string.
#[derive(Debug, Default, Clone)]
pub struct TList {
    object: TObject,
    name: String,
    objs: Vec<Option<Arc<dyn Object>>>,
    options: Vec<String>,
}

impl TList {
    /// List name (usually empty).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of entries, null entries included.
    pub fn len(&self) -> usize {
        self.objs.len()
    }

    /// Whether the list has no entries.
    pub fn is_empty(&self) -> bool {
        self.objs.is_empty()
    }

    /// Entry `i`; `None` for null entries and out-of-range indices.
    pub fn at(&self, i: usize) -> Option<&Arc<dyn Object>> {
        self.objs.get(i).and_then(Option::as_ref)
    }

    /// All non-null entries, in order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Object>> {
        self.objs.iter().flatten()
    }

    /// Draw option stored next to entry `i`.
    pub fn option(&self, i: usize) -> Option<&str> {
        self.options.get(i).map(String::as_str)
    }

    fn read_as(&mut self, r: &mut RBuffer<'_>, class: &str) -> Result<()> {
        let v = r.read_version(class)?;
        if v.version <= 3 {
            return Err(RootError::NotImplemented(format!(
                "{} version {} (<= 3)",
                class, v.version
            )));
        }
        self.object = TObject::read(r)?;
        self.name = r.read_string()?;
        let n = r.read_i32()?;
        let n = usize::try_from(n)
            .map_err(|_| RootError::Format(format!("{}: negative entry count {}", class, n)))?;

        self.objs = Vec::with_capacity(n.min(r.remaining()));
        self.options = Vec::with_capacity(n.min(r.remaining()));
        for _ in 0..n {
            self.objs.push(r.read_object_any()?);
            let olen = r.read_u8()? as usize;
            let opt = r.read_bytes(olen)?;
            self.options.push(String::from_utf8_lossy(opt).into_owned());
        }
        r.check_byte_count(&v, class)
    }

    /// Write the list header for `n` entries (used for fixtures); each entry
    /// must then be written as an object pointer followed by
    /// [`write_option`](Self::write_option), and the envelope closed with
    /// [`WBuffer::set_byte_count`].
    pub fn write_header(w: &mut WBuffer, name: &str, n: i32) -> u64 {
        let beg = w.write_version(5);
        TObject::default().write_to(w);
        w.write_string(name);
        w.write_i32(n);
        beg
    }

    /// Write an entry's option string.
    pub fn write_option(w: &mut WBuffer, opt: &str) {
        w.write_u8(opt.len().min(255) as u8);
        w.write_bytes(&opt.as_bytes()[..opt.len().min(255)]);
    }
}

impl RootClass for TList {
    const CLASS: &'static str = "TList";
}

impl Object for TList {
    fn class(&self) -> &str {
        Self::CLASS
    }

    fn unmarshal(&mut self, r: &mut RBuffer<'_>) -> Result<()> {
        self.read_as(r, Self::CLASS)
    }

    object_any!();
}

/// A `TList` with a hash index; streamed exactly like `TList`.
#[derive(Debug, Default, Clone)]
pub struct THashList {
    list: TList,
}

impl Deref for THashList {
    type Target = TList;

    fn deref(&self) -> &TList {
        &self.list
    }
}

impl RootClass for THashList {
    const CLASS: &'static str = "THashList";
}

impl Object for THashList {
    fn class(&self) -> &str {
        Self::CLASS
    }

    fn unmarshal(&mut self, r: &mut RBuffer<'_>) -> Result<()> {
        self.list.read_as(r, Self::CLASS)
    }

    object_any!();
}

/// An array of object pointers with a lower bound.
#[derive(Debug, Default, Clone)]
pub struct TObjArray {
    object: TObject,
    name: String,
    lower_bound: i32,
    objs: Vec<Option<Arc<dyn Object>>>,
}

impl TObjArray {
    /// Array name (usually empty).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the first slot.
    pub fn lower_bound(&self) -> i32 {
        self.lower_bound
    }

    /// Number of slots, null slots included.
    pub fn len(&self) -> usize {
        self.objs.len()
    }

    /// Whether the array has no slots.
    pub fn is_empty(&self) -> bool {
        self.objs.is_empty()
    }

    /// Slot `i` (zero-based, ignoring the lower bound).
    pub fn at(&self, i: usize) -> Option<&Arc<dyn Object>> {
        self.objs.get(i).and_then(Option::as_ref)
    }

    /// All slots, null ones as `None`.
    pub fn slots(&self) -> &[Option<Arc<dyn Object>>] {
        &self.objs
    }

    /// Write the array header for `n` slots (used for fixtures). Slots are
    /// then written as object pointers and the envelope closed with
    /// [`WBuffer::set_byte_count`].
    pub fn write_header(w: &mut WBuffer, name: &str, n: i32) -> u64 {
        let beg = w.write_version(3);
        TObject::default().write_to(w);
        w.write_string(name);
        w.write_i32(n);
        w.write_i32(0);
        beg
    }
}

impl RootClass for TObjArray {
    const CLASS: &'static str = "TObjArray";
}

impl Object for TObjArray {
    fn class(&self) -> &str {
        Self::CLASS
    }

    fn unmarshal(&mut self, r: &mut RBuffer<'_>) -> Result<()> {
        let v = r.read_version(Self::CLASS)?;
        if v.version > 2 {
            self.object = TObject::read(r)?;
        }
        if v.version > 1 {
            self.name = r.read_string()?;
        }
        let n = r.read_i32()?;
        let n = usize::try_from(n)
            .map_err(|_| RootError::Format(format!("TObjArray: negative slot count {}", n)))?;
        self.lower_bound = r.read_i32()?;

        self.objs = Vec::with_capacity(n.min(r.remaining()));
        for _ in 0..n {
            self.objs.push(r.read_object_any()?);
        }
        r.check_byte_count(&v, Self::CLASS)
    }

    object_any!();
}

/// A string wrapped as an object.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TObjString {
    object: TObject,
    value: String,
}

impl TObjString {
    /// New string object.
    pub fn new(value: impl Into<String>) -> Self {
        Self { object: TObject::default(), value: value.into() }
    }

    /// The wrapped string.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Serialize with a version-1 envelope.
    pub fn write_to(&self, w: &mut WBuffer) -> Result<()> {
        let beg = w.write_version(1);
        self.object.write_to(w);
        w.write_string(&self.value);
        w.set_byte_count(beg)?;
        Ok(())
    }
}

impl RootClass for TObjString {
    const CLASS: &'static str = "TObjString";
}

impl Named for TObjString {
    fn name(&self) -> &str {
        &self.value
    }

    fn title(&self) -> &str {
        "Collectable string class"
    }
}

impl Object for TObjString {
    fn class(&self) -> &str {
        Self::CLASS
    }

    fn unmarshal(&mut self, r: &mut RBuffer<'_>) -> Result<()> {
        let v = r.read_version(Self::CLASS)?;
        self.object = TObject::read(r)?;
        self.value = r.read_string()?;
        r.check_byte_count(&v, Self::CLASS)
    }

    object_any!();

    fn as_named(&self) -> Option<&dyn Named> {
        Some(self)
    }
}
