//! TDirectory parsing and key-list navigation.

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, RootError};
use crate::file::FileInner;
use crate::key::{Datime, Key, KeyRecord, DIRECTORY_CLASS};
use crate::objects::{object_any, Named, Object, TNamed};
use crate::rbuffer::{RBuffer, DEFAULT_MAX_DEPTH};

/// Cycle value meaning "highest cycle".
const ANY_CYCLE: i16 = 9999;

/// What [`Directory::walk`] does after visiting an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    /// Keep going; descend into the entry if it is a directory.
    Continue,
    /// Keep going, but do not descend into this directory.
    SkipDir,
    /// End the walk.
    Stop,
}

/// A directory: a named, ordered list of keys, possibly nested.
#[derive(Clone, Default)]
pub struct Directory {
    named: TNamed,
    version: i16,
    ctime: u32,
    mtime: u32,
    nbytes_keys: i32,
    nbytes_name: i32,
    seek_dir: i64,
    seek_parent: i64,
    seek_keys: i64,
    uuid: [u8; 16],
    keys: Vec<Key>,
    file: Option<Arc<FileInner>>,
}

impl Directory {
    /// Decode the directory record found at absolute `offset` of the file.
    pub(crate) fn read_at(file: &Arc<FileInner>, named: TNamed, offset: u64) -> Result<Self> {
        let mut dir = Directory { named, ..Default::default() };
        let mut r = RBuffer::new(&file.data);
        r.set_pos(offset)?;
        dir.unmarshal(&mut r)?;
        dir.file = Some(Arc::clone(file));
        Ok(dir)
    }

    /// A directory with no record of its own, located at `seek_dir`.
    pub(crate) fn bare(file: &Arc<FileInner>, named: TNamed, seek_dir: i64) -> Self {
        Directory { named, seek_dir, file: Some(Arc::clone(file)), ..Default::default() }
    }

    pub(crate) fn set_keys(&mut self, keys: Vec<Key>) {
        self.keys = keys;
    }

    /// Decode the subdirectory stored under `key`, key list included.
    pub(crate) fn from_key(key: &Key) -> Result<Self> {
        let what = || format!("directory {:?}", key.name());
        let file = key.file()?;
        let bytes = key.bytes()?;
        let mut dir = Directory { named: TNamed::new(key.name(), key.title()), ..Default::default() };
        let mut r = RBuffer::new(&bytes).with_offset(key.key_len() as u64);
        dir.unmarshal(&mut r).map_err(|e| e.context(what()))?;
        dir.file = Some(Arc::clone(file));
        dir.read_keys().map_err(|e| e.context(what()))?;
        Ok(dir)
    }

    /// Load the key list stored at `seek_keys`.
    ///
    /// The list is a key header (which must point back at itself), an i32
    /// count, then that many keys. A non-positive `seek_keys` means empty.
    pub(crate) fn read_keys(&mut self) -> Result<()> {
        self.keys.clear();
        if self.seek_keys <= 0 {
            return Ok(());
        }
        let file = match &self.file {
            Some(file) => Arc::clone(file),
            None => return Err(RootError::Consistency("directory is not attached to a file".into())),
        };
        let at = self.seek_keys as u64;
        let mut r = RBuffer::new(&file.data);
        let header = match Key::read_at(&mut r, at)? {
            KeyRecord::Key(k) => k,
            KeyRecord::Gap(_) => {
                return Err(RootError::Format(format!("key list at {} is free space", at)));
            }
        };
        r.set_pos(at + header.key_len() as u64)?;

        let nkeys = r.read_i32()?;
        if nkeys < 0 {
            return Err(RootError::Format(format!("negative key count {} at {}", nkeys, at)));
        }
        let mut keys = Vec::with_capacity(nkeys.min(1024) as usize);
        for i in 0..nkeys {
            match Key::read_record(&mut r)? {
                KeyRecord::Key(k) => keys.push(k.bind(&file)),
                KeyRecord::Gap(_) => {
                    return Err(RootError::Format(format!("gap at entry {} of key list at {}", i, at)));
                }
            }
        }
        self.keys = keys;
        Ok(())
    }

    /// Directory name.
    pub fn name(&self) -> &str {
        self.named.name()
    }

    /// Directory title.
    pub fn title(&self) -> &str {
        self.named.title()
    }

    /// This directory's keys, in file order.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Offset of this directory's record.
    pub fn seek_dir(&self) -> i64 {
        self.seek_dir
    }

    /// Offset of the parent directory's record; 0 for the top directory.
    pub fn parent_seek(&self) -> i64 {
        self.seek_parent
    }

    /// Offset of the key-list record; 0 when the directory has none.
    pub fn seek_keys(&self) -> i64 {
        self.seek_keys
    }

    /// Length in bytes of the key-list record.
    pub fn nbytes_keys(&self) -> i32 {
        self.nbytes_keys
    }

    /// `TNamed` length recorded at creation.
    pub fn nbytes_name(&self) -> i32 {
        self.nbytes_name
    }

    /// Streamer version of the directory record.
    pub fn version(&self) -> i16 {
        self.version
    }

    /// Creation time.
    pub fn ctime(&self) -> Datime {
        Datime::from_raw(self.ctime)
    }

    /// Last modification time.
    pub fn mtime(&self) -> Datime {
        Datime::from_raw(self.mtime)
    }

    /// UUID bytes (all zero for records that predate them).
    pub fn uuid(&self) -> &[u8; 16] {
        &self.uuid
    }

    /// Look up `namecycle` among this directory's own keys.
    fn find(&self, namecycle: &str) -> Result<Option<&Key>> {
        let (name, cycle) = decode_name_cycle(namecycle)?;
        let mut matches = self.keys.iter().filter(|k| k.name() == name);
        Ok(match cycle {
            Some(c) => matches.find(|k| k.cycle() == c),
            None => matches.max_by_key(|k| k.cycle()),
        })
    }

    /// Key for `path`: `name`, `name;cycle`, or `a/b/name;cycle`.
    pub fn key(&self, path: &str) -> Result<Key> {
        let not_found = || RootError::KeyNotFound(path.to_string());
        let (parent, leaf) = split_path(path);
        if leaf.is_empty() {
            return Err(not_found());
        }
        if parent.is_empty() {
            return self.find(leaf)?.cloned().ok_or_else(not_found);
        }
        let dir = self.subdir(parent)?;
        let found = dir.find(leaf)?.cloned();
        found.ok_or_else(not_found)
    }

    /// Decode the object at `path`.
    ///
    /// Paths that are empty or end in `/` name directories.
    pub fn get(&self, path: &str) -> Result<Box<dyn Object>> {
        let (parent, leaf) = split_path(path);
        if leaf.is_empty() {
            return Ok(Box::new(self.subdir(parent)?));
        }
        self.key(path)?.object()
    }

    /// Whether `path` resolves to a key (or to a directory, for directory paths).
    pub fn has(&self, path: &str) -> bool {
        let (parent, leaf) = split_path(path);
        if leaf.is_empty() {
            return self.subdir(parent).is_ok();
        }
        self.key(path).is_ok()
    }

    /// Open the subdirectory at `path`; the empty path is this directory.
    pub fn subdir(&self, path: &str) -> Result<Directory> {
        let mut cur = self.clone();
        let mut walked = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !walked.is_empty() {
                walked.push('/');
            }
            walked.push_str(part);
            let key = cur.find(part)?.ok_or_else(|| RootError::KeyNotFound(path.to_string()))?;
            if !key.is_directory() {
                return Err(RootError::NotADirectory(format!("{} ({})", walked, key.class())));
            }
            let next = Directory::from_key(key)?;
            cur = next;
        }
        Ok(cur)
    }

    /// Visit every object below this directory, depth first.
    ///
    /// The visitor receives each entry's `path;cycle` and its decoded object
    /// or decode error. Errors do not end the walk unless the visitor says so.
    /// A subdirectory that reuses the key list of an enclosing directory, or
    /// sits deeper than the configured `max_depth`, is reported as an error
    /// and not entered.
    pub fn walk<F>(&self, mut visitor: F)
    where
        F: FnMut(&str, Result<&dyn Object>) -> WalkAction,
    {
        let mut lists = vec![self.seek_keys];
        self.walk_from("", &mut lists, &mut visitor);
    }

    fn walk_from<F>(&self, prefix: &str, lists: &mut Vec<i64>, visitor: &mut F) -> bool
    where
        F: FnMut(&str, Result<&dyn Object>) -> WalkAction,
    {
        for key in &self.keys {
            let path = format!("{}{};{}", prefix, key.name(), key.cycle());
            let decoded = key.object().and_then(|obj| {
                let entered = match obj.downcast_ref::<Directory>() {
                    Some(sub) => sub.check_descent(lists),
                    None => Ok(()),
                };
                entered.map(|()| obj)
            });
            let boxed = match decoded {
                Ok(obj) => obj,
                Err(e) => {
                    if visitor(&path, Err(e)) == WalkAction::Stop {
                        return false;
                    }
                    continue;
                }
            };
            let obj: &dyn Object = &*boxed;
            match visitor(&path, Ok(obj)) {
                WalkAction::Stop => return false,
                WalkAction::SkipDir => {}
                WalkAction::Continue => {
                    if let Some(sub) = obj.downcast_ref::<Directory>() {
                        let inner = format!("{}{}/", prefix, key.name());
                        lists.push(sub.seek_keys);
                        let more = sub.walk_from(&inner, lists, visitor);
                        lists.pop();
                        if !more {
                            return false;
                        }
                    }
                }
            }
        }
        true
    }

    /// Whether the walk may enter this directory below the enclosing
    /// directories whose key lists are `lists`.
    fn check_descent(&self, lists: &[i64]) -> Result<()> {
        if self.seek_keys > 0 && lists.contains(&self.seek_keys) {
            return Err(RootError::Consistency(format!(
                "directory {:?} at {} reuses the key list at {} of an enclosing directory",
                self.name(),
                self.seek_dir,
                self.seek_keys
            )));
        }
        let max_depth = self.file.as_ref().map_or(DEFAULT_MAX_DEPTH, |f| f.config.max_depth);
        if lists.len() > max_depth {
            return Err(RootError::Format(format!(
                "directory {:?} nested deeper than {} levels",
                self.name(),
                max_depth
            )));
        }
        Ok(())
    }
}

impl Named for Directory {
    fn name(&self) -> &str {
        self.named.name()
    }

    fn title(&self) -> &str {
        self.named.title()
    }
}

impl Object for Directory {
    fn class(&self) -> &str {
        DIRECTORY_CLASS
    }

    /// Decode the directory record. The key list is loaded separately.
    fn unmarshal(&mut self, r: &mut RBuffer<'_>) -> Result<()> {
        let version = r.read_i16()?;
        self.version = version;
        self.ctime = r.read_u32()?;
        self.mtime = r.read_u32()?;
        self.nbytes_keys = r.read_i32()?;
        self.nbytes_name = r.read_i32()?;

        if version > 1000 {
            self.seek_dir = r.read_i64()?;
            self.seek_parent = r.read_i64()?;
            self.seek_keys = r.read_i64()?;
        } else {
            self.seek_dir = i64::from(r.read_i32()?);
            self.seek_parent = i64::from(r.read_i32()?);
            self.seek_keys = i64::from(r.read_i32()?);
        }

        match version % 1000 {
            2 => self.uuid = r.read_array()?,
            v if v > 2 => {
                let _uuid_version = r.read_u16()?;
                self.uuid = r.read_array()?;
            }
            _ => {}
        }
        Ok(())
    }

    fn as_named(&self) -> Option<&dyn Named> {
        Some(self)
    }

    object_any!();
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("name", &self.name())
            .field("seek_dir", &self.seek_dir)
            .field("seek_keys", &self.seek_keys)
            .field("keys", &self.keys.len())
            .finish()
    }
}

/// Split `name;cycle` into the name and the requested cycle.
///
/// An absent or empty cycle, and the value 9999, mean "highest cycle".
pub fn decode_name_cycle(namecycle: &str) -> Result<(&str, Option<i16>)> {
    let Some((name, cycle)) = namecycle.rsplit_once(';') else {
        return Ok((namecycle, None));
    };
    if cycle.is_empty() {
        return Ok((name, None));
    }
    match cycle.parse::<i16>() {
        Ok(ANY_CYCLE) => Ok((name, None)),
        Ok(c) => Ok((name, Some(c))),
        Err(_) => Err(RootError::KeyNotFound(format!("{} (invalid cycle)", namecycle))),
    }
}

/// Split a path into its directory part and its last component.
fn split_path(path: &str) -> (&str, &str) {
    let path = path.trim_start_matches('/');
    match path.rsplit_once('/') {
        Some((parent, leaf)) => (parent, leaf),
        None => ("", path),
    }
}
