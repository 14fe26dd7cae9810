//! Class layout descriptions (`TStreamerInfo`) and the per-file schema store.
//!
//! A file's streamer record lists, for every class written into it, the
//! ordered members of that class with their type codes. Classes without a
//! hand-written decoder are read member by member through [`GenericObject`].

mod element;
mod generic;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, RootError};
use crate::factory::{RegistryBuilder, RootClass};
use crate::objects::{object_any, Named, Object, TList, TNamed, TObjArray};
use crate::rbuffer::RBuffer;
use crate::wbuffer::WBuffer;

pub use element::{Counter, ElementBase, StreamerElement};
pub use generic::{GenericObject, Value};

/// Member type codes (`TVirtualStreamerInfo::EReadWrite`).
pub mod etype {
    /// `kBase`.
    pub const BASE: i32 = 0;
    /// `kChar`.
    pub const CHAR: i32 = 1;
    /// `kShort`.
    pub const SHORT: i32 = 2;
    /// `kInt`.
    pub const INT: i32 = 3;
    /// `kLong`.
    pub const LONG: i32 = 4;
    /// `kFloat`.
    pub const FLOAT: i32 = 5;
    /// `kCounter`.
    pub const COUNTER: i32 = 6;
    /// `kCharStar`.
    pub const CHAR_STAR: i32 = 7;
    /// `kDouble`.
    pub const DOUBLE: i32 = 8;
    /// `kDouble32`.
    pub const DOUBLE32: i32 = 9;
    /// `kLegacyChar`.
    pub const LEGACY_CHAR: i32 = 10;
    /// `kUChar`.
    pub const UCHAR: i32 = 11;
    /// `kUShort`.
    pub const USHORT: i32 = 12;
    /// `kUInt`.
    pub const UINT: i32 = 13;
    /// `kULong`.
    pub const ULONG: i32 = 14;
    /// `kBits`.
    pub const BITS: i32 = 15;
    /// `kLong64`.
    pub const LONG64: i32 = 16;
    /// `kULong64`.
    pub const ULONG64: i32 = 17;
    /// `kBool`.
    pub const BOOL: i32 = 18;
    /// `kFloat16`.
    pub const FLOAT16: i32 = 19;
    /// Added to a basic code for fixed-size arrays.
    pub const OFFSET_L: i32 = 20;
    /// Added to a basic code for counter-sized arrays.
    pub const OFFSET_P: i32 = 40;
    /// `kObject`.
    pub const OBJECT: i32 = 61;
    /// `kAny`.
    pub const ANY: i32 = 62;
    /// `kObjectp`.
    pub const OBJECT_PTR: i32 = 63;
    /// `kObjectP`.
    pub const OBJECT_PTR_NULLABLE: i32 = 64;
    /// `kTString`.
    pub const TSTRING: i32 = 65;
    /// `kTObject`.
    pub const TOBJECT: i32 = 66;
    /// `kTNamed`.
    pub const TNAMED: i32 = 67;
    /// `kAnyp`.
    pub const ANY_PTR: i32 = 68;
    /// `kAnyP`.
    pub const ANY_PTR_NULLABLE: i32 = 69;
    /// `kSTL`.
    pub const STL: i32 = 300;
    /// `kSTLstring`.
    pub const STL_STRING: i32 = 365;
    /// `kStreamer`.
    pub const STREAMER: i32 = 500;
}

/// STL container kinds (`ROOT::ESTLType`).
pub mod stl {
    /// `std::vector`.
    pub const VECTOR: i32 = 1;
    /// `std::list`.
    pub const LIST: i32 = 2;
    /// `std::deque`.
    pub const DEQUE: i32 = 3;
    /// `std::map`.
    pub const MAP: i32 = 4;
    /// `std::multimap`.
    pub const MULTIMAP: i32 = 5;
    /// `std::set`.
    pub const SET: i32 = 6;
    /// `std::multiset`.
    pub const MULTISET: i32 = 7;
    /// `std::bitset`.
    pub const BITSET: i32 = 8;
}

/// Layout of one version of one class.
#[derive(Debug, Clone, Default)]
pub struct StreamerInfo {
    named: TNamed,
    checksum: u32,
    class_version: i32,
    elements: Vec<StreamerElement>,
}

impl StreamerInfo {
    /// Describe version `class_version` of class `name`.
    pub fn new(
        name: impl Into<String>,
        class_version: i32,
        checksum: u32,
        elements: Vec<StreamerElement>,
    ) -> Self {
        Self { named: TNamed::new(name, ""), checksum, class_version, elements }
    }

    /// Class name.
    pub fn name(&self) -> &str {
        self.named.name()
    }

    /// Class comment.
    pub fn title(&self) -> &str {
        self.named.title()
    }

    /// Class checksum, written before non-positive versions.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Class version described.
    pub fn class_version(&self) -> i32 {
        self.class_version
    }

    /// Members, in streaming order.
    pub fn elements(&self) -> &[StreamerElement] {
        &self.elements
    }

    /// Member named `name`.
    pub fn element(&self, name: &str) -> Option<&StreamerElement> {
        self.elements.iter().find(|e| e.name() == name)
    }

    /// Serialize as ROOT writes it (used for fixtures).
    pub fn write_to(&self, w: &mut WBuffer) -> Result<()> {
        let beg = w.write_version(9);
        self.named.write_to(w)?;
        w.write_u32(self.checksum);
        w.write_i32(self.class_version);

        let arr = w.write_object_header(TObjArray::CLASS);
        let arr_beg = TObjArray::write_header(w, "", self.elements.len() as i32);
        for elem in &self.elements {
            let obj = w.write_object_header(elem.class_name());
            elem.write_to(w)?;
            w.finish_object(obj)?;
        }
        w.set_byte_count(arr_beg)?;
        w.finish_object(arr)?;
        w.set_byte_count(beg)?;
        Ok(())
    }
}

impl RootClass for StreamerInfo {
    const CLASS: &'static str = "TStreamerInfo";
}

impl Named for StreamerInfo {
    fn name(&self) -> &str {
        self.named.name()
    }

    fn title(&self) -> &str {
        self.named.title()
    }
}

impl Object for StreamerInfo {
    fn class(&self) -> &str {
        Self::CLASS
    }

    fn unmarshal(&mut self, r: &mut RBuffer<'_>) -> Result<()> {
        let v = r.read_version(Self::CLASS)?;
        self.named = TNamed::read(r)?;
        self.checksum = r.read_u32()?;
        self.class_version = r.read_i32()?;

        let obj = r.read_object_any()?;
        self.elements.clear();
        if let Some(obj) = obj {
            let Some(arr) = obj.downcast_ref::<TObjArray>() else {
                return Err(r.poison(RootError::Consistency(format!(
                    "streamer info {:?}: elements stored as {} instead of TObjArray",
                    self.named.name(),
                    obj.class()
                ))));
            };
            self.elements.reserve(arr.len());
            for (i, slot) in arr.slots().iter().enumerate() {
                match slot.as_ref().and_then(|o| o.downcast_ref::<StreamerElement>()) {
                    Some(elem) => self.elements.push(elem.clone()),
                    None => {
                        let what = slot.as_ref().map_or("null", |o| o.class());
                        return Err(r.poison(RootError::Consistency(format!(
                            "streamer info {:?}: element {} is {} instead of a streamer element",
                            self.named.name(),
                            i,
                            what
                        ))));
                    }
                }
            }
        }

        r.check_byte_count(&v, Self::CLASS)
    }

    object_any!();

    fn as_named(&self) -> Option<&dyn Named> {
        Some(self)
    }
}

/// The streamer infos of one file, keyed by class, version and checksum.
#[derive(Debug, Clone, Default)]
pub struct StreamerDb {
    infos: Vec<Arc<StreamerInfo>>,
    by_name: BTreeMap<String, Vec<usize>>,
}

impl StreamerDb {
    /// Add `info` unless an entry with the same class, version and checksum exists.
    ///
    /// Returns whether it was added.
    pub fn add(&mut self, info: Arc<StreamerInfo>) -> bool {
        let slots = self.by_name.entry(info.name().to_string()).or_default();
        let dup = slots.iter().any(|&i| {
            let known = &self.infos[i];
            known.class_version() == info.class_version() && known.checksum() == info.checksum()
        });
        if dup {
            return false;
        }
        slots.push(self.infos.len());
        self.infos.push(info);
        true
    }

    /// Info for `name` at `version`; a negative version selects the highest.
    pub fn get(&self, name: &str, version: i32) -> Option<Arc<StreamerInfo>> {
        let mut infos = self.by_name(name);
        let found = if version < 0 {
            infos.max_by_key(|si| si.class_version())
        } else {
            infos.find(|si| si.class_version() == version)
        };
        found.cloned()
    }

    /// Every version of `name`, in load order.
    pub fn by_name<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Arc<StreamerInfo>> + 'a {
        let slots = self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[]);
        slots.iter().map(move |&i| &self.infos[i])
    }

    /// All infos, in load order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<StreamerInfo>> {
        self.infos.iter()
    }

    /// Number of infos.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Collect the infos of a decoded streamer record.
    ///
    /// The record is a `TList` of `TStreamerInfo`s, usually followed by a
    /// list of schema-evolution rules; anything else is skipped.
    pub fn from_list(list: &TList) -> Self {
        let mut db = Self::default();
        for obj in list.iter() {
            match obj.downcast_ref::<StreamerInfo>() {
                Some(si) => {
                    if !db.add(Arc::new(si.clone())) {
                        log::debug!("duplicate streamer info {} v{}", si.name(), si.class_version());
                    }
                }
                None => log::debug!("streamer record: skipping {} {:?}", obj.class(), obj.name()),
            }
        }
        db
    }
}

/// Register the classes of this module.
pub(crate) fn register(b: &mut RegistryBuilder) {
    b.register::<StreamerInfo>();
    for (name, ctor) in element::constructors() {
        b.register_fn(name, ctor);
    }
}
