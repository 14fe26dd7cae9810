//! `TStreamerElement` and its subclasses.

use crate::error::{Result, RootError};
use crate::objects::{object_any, Named, Object, TNamed, TObject};
use crate::rbuffer::RBuffer;
use crate::streamer::etype;
use crate::wbuffer::WBuffer;

/// `TStreamerElement::kHasRange`: the title carries a `[xmin,xmax,nbits]` range.
const K_HAS_RANGE: u32 = 1 << 6;

/// Size of `char*` members.
const PTR_SIZE: i32 = 8;

/// Version written for `TStreamerElement` fixtures.
const ELEMENT_VERSION: i16 = 4;

/// Members shared by every streamer element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementBase {
    named: TNamed,
    etype: i32,
    esize: i32,
    arrlen: i32,
    arrdim: i32,
    maxidx: [i32; 5],
    ename: String,
    xmin: f64,
    xmax: f64,
    factor: f64,
}

impl ElementBase {
    /// Element for member `name` of type code `etype` spelled `type_name` in C++.
    ///
    /// A `[xmin,xmax,nbits]` prefix in `title` sets the packing range of
    /// `Double32_t`/`Float16_t` members.
    pub fn new(name: &str, title: &str, etype: i32, type_name: &str) -> Self {
        let (xmin, xmax, factor) = parse_range(title).unwrap_or_default();
        Self {
            named: TNamed::new(name, title),
            etype,
            ename: type_name.to_string(),
            xmin,
            xmax,
            factor,
            ..Self::default()
        }
    }

    /// Same element as a fixed-size array of `len` entries.
    pub fn with_array(mut self, len: i32) -> Self {
        self.arrlen = len;
        self.arrdim = 1;
        self.maxidx[0] = len;
        self
    }

    /// Same element with an explicit byte size.
    pub fn with_size(mut self, size: i32) -> Self {
        self.esize = size;
        self
    }

    /// Member name.
    pub fn name(&self) -> &str {
        self.named.name()
    }

    /// Member comment.
    pub fn title(&self) -> &str {
        self.named.title()
    }

    /// Type code (see [`etype`]).
    pub fn etype(&self) -> i32 {
        self.etype
    }

    /// Size in bytes.
    pub fn size(&self) -> i32 {
        self.esize
    }

    /// Total number of array entries, `0` for scalars.
    pub fn array_len(&self) -> i32 {
        self.arrlen
    }

    /// Number of array dimensions.
    pub fn array_dim(&self) -> i32 {
        self.arrdim
    }

    /// Extent of each array dimension.
    pub fn max_index(&self) -> &[i32; 5] {
        &self.maxidx
    }

    /// C++ type name.
    pub fn type_name(&self) -> &str {
        &self.ename
    }

    /// Packing range of `Double32_t`/`Float16_t` members: `(xmin, xmax, factor)`.
    pub fn range(&self) -> (f64, f64, f64) {
        (self.xmin, self.xmax, self.factor)
    }

    fn read(&mut self, r: &mut RBuffer<'_>) -> Result<()> {
        let v = r.read_version("TStreamerElement")?;
        self.named = TNamed::read(r)?;
        self.etype = r.read_i32()?;
        self.esize = r.read_i32()?;
        self.arrlen = r.read_i32()?;
        self.arrdim = r.read_i32()?;

        let maxidx =
            if v.version == 1 { r.read_static_array_i32()? } else { r.read_fast_array_i32(5)? };
        self.maxidx = [0; 5];
        for (slot, v) in self.maxidx.iter_mut().zip(maxidx) {
            *slot = v;
        }
        self.ename = r.read_string()?;

        if self.etype == etype::UCHAR && (self.ename == "Bool_t" || self.ename == "bool") {
            self.etype = etype::BOOL;
        }

        (self.xmin, self.xmax, self.factor) = (0.0, 0.0, 0.0);
        if v.version == 3 {
            self.xmin = r.read_f64()?;
            self.xmax = r.read_f64()?;
            self.factor = r.read_f64()?;
        } else if v.version > 3 && self.named.object().bits() & K_HAS_RANGE != 0 {
            if let Some(range) = parse_range(self.named.title()) {
                (self.xmin, self.xmax, self.factor) = range;
            }
        }

        r.check_byte_count(&v, "TStreamerElement")
    }

    fn write_to(&self, w: &mut WBuffer) -> Result<()> {
        let beg = w.write_version(ELEMENT_VERSION);
        let mut named = self.named.clone();
        if self.factor != 0.0 {
            named = named.with_object(TObject::default().with_bits(K_HAS_RANGE));
        }
        named.write_to(w)?;
        w.write_i32(self.etype);
        w.write_i32(self.esize);
        w.write_i32(self.arrlen);
        w.write_i32(self.arrdim);
        for v in self.maxidx {
            w.write_i32(v);
        }
        w.write_string(&self.ename);
        w.set_byte_count(beg)?;
        Ok(())
    }

    fn fix_basic_size(&mut self) -> Result<()> {
        let mut t = self.etype;
        if etype::OFFSET_L < t && t < etype::OFFSET_P {
            t -= etype::OFFSET_L;
        }
        let size = match t {
            etype::BOOL | etype::UCHAR | etype::CHAR => 1,
            etype::USHORT | etype::SHORT => 2,
            etype::BITS | etype::UINT | etype::INT | etype::COUNTER => 4,
            etype::ULONG | etype::ULONG64 | etype::LONG | etype::LONG64 => 8,
            etype::FLOAT | etype::FLOAT16 => 4,
            etype::DOUBLE | etype::DOUBLE32 => 8,
            etype::CHAR_STAR => PTR_SIZE,
            _ => return Ok(()),
        };
        self.esize = if self.arrlen > 0 {
            size.checked_mul(self.arrlen).ok_or_else(|| {
                RootError::Format(format!(
                    "{}: array of {} elements overflows the element size",
                    self.name(),
                    self.arrlen
                ))
            })?
        } else {
            size
        };
        Ok(())
    }
}

/// Parse a `[xmin,xmax]` or `[xmin,xmax,nbits]` title prefix.
fn parse_range(title: &str) -> Option<(f64, f64, f64)> {
    let body = title.trim_start().strip_prefix('[')?;
    let body = &body[..body.find(']')?];
    let parts: Vec<&str> = body.split(',').map(str::trim).collect();
    let (xmin, xmax, nbits) = match parts.as_slice() {
        [lo, hi] => (lo.parse::<f64>().ok()?, hi.parse::<f64>().ok()?, 32),
        [lo, hi, bits] => (
            lo.parse::<f64>().ok()?,
            hi.parse::<f64>().ok()?,
            bits.parse::<u32>().ok()?.clamp(2, 32),
        ),
        _ => return None,
    };
    if xmin < xmax {
        let bigint = if nbits < 32 { f64::from(1u32 << nbits) } else { f64::from(u32::MAX) };
        Some((xmin, xmax, bigint / (xmax - xmin)))
    } else {
        None
    }
}

/// Count member of a variable-length array or loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counter {
    /// Version of the class holding the counter.
    pub version: i32,
    /// Name of the counter member.
    pub name: String,
    /// Class holding the counter.
    pub class: String,
}

impl Counter {
    /// Counter `name` in `class`.
    pub fn new(name: &str, class: &str, version: i32) -> Self {
        Self { version, name: name.to_string(), class: class.to_string() }
    }

    fn read(r: &mut RBuffer<'_>) -> Result<Self> {
        Ok(Self { version: r.read_i32()?, name: r.read_string()?, class: r.read_string()? })
    }

    fn write_to(&self, w: &mut WBuffer) {
        w.write_i32(self.version);
        w.write_string(&self.name);
        w.write_string(&self.class);
    }
}

/// One member of a class layout description.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamerElement {
    /// A base class.
    Base {
        /// Shared members.
        elem: ElementBase,
        /// Version of the base class.
        vbase: i32,
    },
    /// A scalar or fixed-size array of a basic type.
    BasicType(ElementBase),
    /// A variable-length array of a basic type, sized by a sibling counter.
    BasicPointer {
        /// Shared members.
        elem: ElementBase,
        /// The sizing member.
        count: Counter,
    },
    /// A variable-length array of objects.
    Loop {
        /// Shared members.
        elem: ElementBase,
        /// The sizing member.
        count: Counter,
    },
    /// An embedded `TObject`-derived member.
    Object(ElementBase),
    /// A pointer to a `TObject`-derived member.
    ObjectPointer(ElementBase),
    /// An embedded member of a non-`TObject` class.
    ObjectAny(ElementBase),
    /// A pointer to a non-`TObject` class.
    ObjectAnyPointer(ElementBase),
    /// A `TString` member.
    String(ElementBase),
    /// An STL container.
    Stl {
        /// Shared members.
        elem: ElementBase,
        /// Container kind (see [`stl`](crate::streamer::stl)).
        vtype: i32,
        /// Type code of the contained values.
        ctype: i32,
    },
    /// A `std::string` member.
    StlString {
        /// Shared members.
        elem: ElementBase,
        /// Container kind.
        vtype: i32,
        /// Type code of the contained values.
        ctype: i32,
    },
    /// A member with a custom streamer.
    Artificial(ElementBase),
}

impl StreamerElement {
    /// ROOT class name of this element kind.
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Base { .. } => "TStreamerBase",
            Self::BasicType(_) => "TStreamerBasicType",
            Self::BasicPointer { .. } => "TStreamerBasicPointer",
            Self::Loop { .. } => "TStreamerLoop",
            Self::Object(_) => "TStreamerObject",
            Self::ObjectPointer(_) => "TStreamerObjectPointer",
            Self::ObjectAny(_) => "TStreamerObjectAny",
            Self::ObjectAnyPointer(_) => "TStreamerObjectAnyPointer",
            Self::String(_) => "TStreamerString",
            Self::Stl { .. } => "TStreamerSTL",
            Self::StlString { .. } => "TStreamerSTLstring",
            Self::Artificial(_) => "TStreamerArtificial",
        }
    }

    /// Shared members.
    pub fn elem(&self) -> &ElementBase {
        match self {
            Self::Base { elem, .. }
            | Self::BasicPointer { elem, .. }
            | Self::Loop { elem, .. }
            | Self::Stl { elem, .. }
            | Self::StlString { elem, .. } => elem,
            Self::BasicType(elem)
            | Self::Object(elem)
            | Self::ObjectPointer(elem)
            | Self::ObjectAny(elem)
            | Self::ObjectAnyPointer(elem)
            | Self::String(elem)
            | Self::Artificial(elem) => elem,
        }
    }

    fn elem_mut(&mut self) -> &mut ElementBase {
        match self {
            Self::Base { elem, .. }
            | Self::BasicPointer { elem, .. }
            | Self::Loop { elem, .. }
            | Self::Stl { elem, .. }
            | Self::StlString { elem, .. } => elem,
            Self::BasicType(elem)
            | Self::Object(elem)
            | Self::ObjectPointer(elem)
            | Self::ObjectAny(elem)
            | Self::ObjectAnyPointer(elem)
            | Self::String(elem)
            | Self::Artificial(elem) => elem,
        }
    }

    /// Member name.
    pub fn name(&self) -> &str {
        self.elem().name()
    }

    /// Type code.
    pub fn etype(&self) -> i32 {
        self.elem().etype()
    }

    /// C++ type name.
    pub fn type_name(&self) -> &str {
        self.elem().type_name()
    }

    /// Serialize with the envelopes ROOT writes (used for fixtures).
    pub fn write_to(&self, w: &mut WBuffer) -> Result<()> {
        let beg = w.write_version(self.written_version());
        match self {
            Self::Base { elem, vbase } => {
                elem.write_to(w)?;
                w.write_i32(*vbase);
            }
            Self::BasicPointer { elem, count } | Self::Loop { elem, count } => {
                elem.write_to(w)?;
                count.write_to(w);
            }
            Self::Stl { elem, vtype, ctype } => {
                elem.write_to(w)?;
                w.write_i32(*vtype);
                w.write_i32(*ctype);
            }
            Self::StlString { elem, vtype, ctype } => {
                let inner = w.write_version(3);
                elem.write_to(w)?;
                w.write_i32(*vtype);
                w.write_i32(*ctype);
                w.set_byte_count(inner)?;
            }
            other => other.elem().write_to(w)?,
        }
        w.set_byte_count(beg)?;
        Ok(())
    }

    fn written_version(&self) -> i16 {
        match self {
            Self::Base { .. } | Self::Stl { .. } => 3,
            _ => 2,
        }
    }

    fn read_stl(elem: &ElementBase, r: &mut RBuffer<'_>) -> Result<(i32, i32)> {
        let mut vtype = r.read_i32()?;
        let ctype = r.read_i32()?;
        if vtype == crate::streamer::stl::MULTIMAP || vtype == crate::streamer::stl::SET {
            let ename = elem.type_name();
            if ename.starts_with("std::set") || ename.starts_with("set") {
                vtype = crate::streamer::stl::SET;
            } else if ename.starts_with("std::multimap") || ename.starts_with("multimap") {
                vtype = crate::streamer::stl::MULTIMAP;
            }
        }
        Ok((vtype, ctype))
    }
}

macro_rules! ctor {
    ($variant:expr) => {{
        fn make() -> Box<dyn Object> {
            Box::new($variant)
        }
        make
    }};
}

/// Constructors for every element class, keyed by ROOT name.
pub(crate) fn constructors() -> [(&'static str, crate::factory::Constructor); 12] {
    use StreamerElement as E;
    [
        ("TStreamerBase", ctor!(E::Base { elem: ElementBase::default(), vbase: 0 })),
        ("TStreamerBasicType", ctor!(E::BasicType(ElementBase::default()))),
        (
            "TStreamerBasicPointer",
            ctor!(E::BasicPointer { elem: ElementBase::default(), count: Counter::default() }),
        ),
        ("TStreamerLoop", ctor!(E::Loop { elem: ElementBase::default(), count: Counter::default() })),
        ("TStreamerObject", ctor!(E::Object(ElementBase::default()))),
        ("TStreamerObjectPointer", ctor!(E::ObjectPointer(ElementBase::default()))),
        ("TStreamerObjectAny", ctor!(E::ObjectAny(ElementBase::default()))),
        ("TStreamerObjectAnyPointer", ctor!(E::ObjectAnyPointer(ElementBase::default()))),
        ("TStreamerString", ctor!(E::String(ElementBase::default()))),
        ("TStreamerSTL", ctor!(E::Stl { elem: ElementBase::default(), vtype: 0, ctype: 0 })),
        ("TStreamerSTLstring", ctor!(E::StlString { elem: ElementBase::default(), vtype: 0, ctype: 0 })),
        ("TStreamerArtificial", ctor!(E::Artificial(ElementBase::default()))),
    ]
}

impl Named for StreamerElement {
    fn name(&self) -> &str {
        self.elem().name()
    }

    fn title(&self) -> &str {
        self.elem().title()
    }
}

impl Object for StreamerElement {
    fn class(&self) -> &str {
        self.class_name()
    }

    fn unmarshal(&mut self, r: &mut RBuffer<'_>) -> Result<()> {
        let class = self.class_name();
        let v = r.read_version(class)?;

        if let Self::StlString { elem, vtype, ctype } = self {
            let inner = r.read_version("TStreamerSTL")?;
            elem.read(r)?;
            (*vtype, *ctype) = Self::read_stl(elem, r)?;
            r.check_byte_count(&inner, "TStreamerSTL")?;
            return r.check_byte_count(&v, class);
        }

        self.elem_mut().read(r)?;
        match self {
            Self::Base { vbase, .. } => {
                if v.version > 2 {
                    *vbase = r.read_i32()?;
                }
            }
            Self::BasicType(elem) => elem.fix_basic_size()?,
            Self::BasicPointer { count, .. } | Self::Loop { count, .. } => {
                *count = Counter::read(r)?;
            }
            Self::Stl { elem, vtype, ctype } => {
                (*vtype, *ctype) = Self::read_stl(elem, r)?;
            }
            _ => {}
        }
        r.check_byte_count(&v, class)
    }

    object_any!();

    fn as_named(&self) -> Option<&dyn Named> {
        Some(self)
    }
}
