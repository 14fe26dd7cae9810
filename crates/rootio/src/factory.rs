//! Class-name → constructor registry.
//!
//! A [`Registry`] is built once and never mutated; files receive it through
//! [`OpenOptions`](crate::OpenOptions), so independent readers can use
//! independent registries.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, RootError};
use crate::objects::{self, Object};
use crate::streamer::{self, GenericObject, StreamerDb, StreamerInfo};

/// Produces a fresh, empty instance ready for [`Object::unmarshal`].
pub type Constructor = fn() -> Box<dyn Object>;

/// Implemented by types with a fixed ROOT class name.
pub trait RootClass: Object + Default {
    /// ROOT class name, e.g. `"TNamed"`.
    const CLASS: &'static str;
}

fn construct<T: RootClass>() -> Box<dyn Object> {
    Box::new(T::default())
}

/// Immutable map from class name to constructor.
#[derive(Clone)]
pub struct Registry {
    ctors: BTreeMap<String, Constructor>,
}

impl Registry {
    /// Start an empty registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder { ctors: BTreeMap::new() }
    }

    /// Every class this crate knows how to decode.
    pub fn builtin() -> Self {
        Self::builder().builtins().build()
    }

    /// Constructor registered under `name`.
    pub fn get(&self, name: &str) -> Result<Constructor> {
        self.ctors.get(name).copied().ok_or_else(|| RootError::UnknownClass(name.to_string()))
    }

    /// Create an empty instance of `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn Object>> {
        Ok((self.get(name)?)())
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.ctors.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ctors.keys().map(String::as_str)
    }

    /// Number of registered names (aliases included).
    pub fn len(&self) -> usize {
        self.ctors.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.ctors.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ctors.keys()).finish()
    }
}

/// Mutable stage of a [`Registry`].
pub struct RegistryBuilder {
    ctors: BTreeMap<String, Constructor>,
}

impl RegistryBuilder {
    /// Register `T` under its ROOT class name and its Rust type path.
    pub fn register<T: RootClass>(&mut self) -> &mut Self {
        self.register_fn(T::CLASS, construct::<T>);
        self.register_fn(std::any::type_name::<T>(), construct::<T>)
    }

    /// Register every class this crate knows how to decode.
    pub fn builtins(&mut self) -> &mut Self {
        objects::register(self);
        streamer::register(self);
        self
    }

    /// Register an arbitrary constructor; a later registration of the same
    /// name replaces the earlier one.
    pub fn register_fn(&mut self, name: &str, ctor: Constructor) -> &mut Self {
        self.ctors.insert(name.to_string(), ctor);
        self
    }

    /// Freeze the registry.
    pub fn build(&mut self) -> Registry {
        Registry { ctors: std::mem::take(&mut self.ctors) }
    }
}

/// What a decoder needs to instantiate objects found in a stream.
#[derive(Clone, Copy)]
pub struct DecodeContext<'a> {
    registry: &'a Registry,
    streamers: Option<&'a StreamerDb>,
}

impl<'a> DecodeContext<'a> {
    /// Context with a registry and no streamer infos.
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry, streamers: None }
    }

    /// Add the streamer infos used for classes missing from the registry.
    pub fn with_streamers(mut self, streamers: &'a StreamerDb) -> Self {
        self.streamers = Some(streamers);
        self
    }

    /// The registry.
    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    /// The streamer infos, if any.
    pub fn streamers(&self) -> Option<&'a StreamerDb> {
        self.streamers
    }

    /// Streamer info for `class`; a negative `version` selects the highest.
    pub fn streamer_info(&self, class: &str, version: i32) -> Option<Arc<StreamerInfo>> {
        self.streamers.and_then(|db| db.get(class, version))
    }

    /// Instantiate `class`: registry first, then a schema-driven generic object.
    pub fn create(&self, class: &str) -> Result<Box<dyn Object>> {
        match self.registry.create(class) {
            Ok(obj) => Ok(obj),
            Err(err) => match self.streamer_info(class, -1) {
                Some(info) => Ok(Box::new(GenericObject::new(info))),
                None => Err(err),
            },
        }
    }
}

impl fmt::Debug for DecodeContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeContext")
            .field("registry", &self.registry.len())
            .field("streamers", &self.streamers.map(StreamerDb::len))
            .finish()
    }
}
