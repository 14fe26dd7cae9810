//! Decodable ROOT objects and the trait they share.

mod base;
mod containers;
mod free;

use std::any::Any;
use std::fmt;

use crate::error::Result;
use crate::factory::RegistryBuilder;
use crate::rbuffer::RBuffer;

pub use base::{TNamed, TObject};
pub use containers::{THashList, TList, TObjArray, TObjString};
pub use free::FreeSegment;

/// A value that can be decoded from a ROOT object stream.
///
/// Instances start empty (from a [`Constructor`](crate::Constructor)) and are
/// filled in by [`unmarshal`](Object::unmarshal), which must consume exactly
/// the bytes of one streamed object.
pub trait Object: Any + fmt::Debug + Send + Sync {
    /// ROOT class name of this object.
    fn class(&self) -> &str;

    /// Decode the object from `r`, starting at its version envelope.
    fn unmarshal(&mut self, r: &mut RBuffer<'_>) -> Result<()>;

    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Name and title, for objects that carry them.
    fn as_named(&self) -> Option<&dyn Named> {
        None
    }
}

/// Objects with a name and a title (`TNamed` and its descendants).
pub trait Named {
    /// Object name.
    fn name(&self) -> &str;
    /// Object title.
    fn title(&self) -> &str;
}

impl dyn Object {
    /// Whether the concrete type is `T`.
    pub fn is<T: Object>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Borrow as the concrete type `T`.
    pub fn downcast_ref<T: Object>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    /// Mutably borrow as the concrete type `T`.
    pub fn downcast_mut<T: Object>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut()
    }

    /// Object name, or `""` for unnamed objects.
    pub fn name(&self) -> &str {
        self.as_named().map_or("", |n| n.name())
    }

    /// Object title, or `""` for unnamed objects.
    pub fn title(&self) -> &str {
        self.as_named().map_or("", |n| n.title())
    }
}

/// Implements the `as_any` pair of [`Object`] methods.
macro_rules! object_any {
    () => {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    };
}
pub(crate) use object_any;

/// Register the classes of this module.
pub(crate) fn register(b: &mut RegistryBuilder) {
    b.register::<TObject>()
        .register::<TNamed>()
        .register::<TList>()
        .register::<THashList>()
        .register::<TObjArray>()
        .register::<TObjString>()
        .register::<FreeSegment>();
}
