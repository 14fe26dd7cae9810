//! # rootio
//!
//! Reader for the ROOT binary container format.
//!
//! Decodes the file header, the nested key index and the objects stored under
//! each key, without requiring ROOT itself. User classes are decoded from the
//! streamer infos embedded in the file. Supports zlib, LZ4, ZSTD and XZ
//! compressed records.
//!
//! ## Example
//!
//! ```no_run
//! use rootio::{RootFile, WalkAction};
//!
//! let f = RootFile::open("data.root").unwrap();
//! for key in f.keys() {
//!     println!("{};{} ({})", key.name(), key.cycle(), key.class());
//! }
//! let obj = f.get("dir/hist;1").unwrap();
//! println!("{} is a {}", obj.name(), obj.class());
//!
//! f.walk(|path, obj| {
//!     if let Ok(obj) = obj {
//!         println!("{}: {}", path, obj.class());
//!     }
//!     WalkAction::Continue
//! });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compress;
pub mod config;
pub mod datasource;
pub mod directory;
pub mod error;
pub mod factory;
pub mod file;
pub mod key;
pub mod objects;
pub mod rbuffer;
pub mod streamer;
pub mod wbuffer;

pub use compress::{Algorithm, Settings};
pub use config::ReaderConfig;
pub use directory::{decode_name_cycle, Directory, WalkAction};
pub use error::{Result, RootError};
pub use factory::{Constructor, DecodeContext, Registry, RegistryBuilder, RootClass};
pub use file::{FileHeader, OpenOptions, RootFile};
pub use key::{Datime, Key, KeyRecord};
pub use objects::{FreeSegment, Named, Object, TList, TNamed, TObjArray, TObjString, TObject, THashList};
pub use rbuffer::{RBuffer, Version, DEFAULT_MAX_DEPTH};
pub use streamer::{GenericObject, StreamerDb, StreamerElement, StreamerInfo, Value};
pub use wbuffer::WBuffer;
