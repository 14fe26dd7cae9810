//! Integration tests: open synthetic ROOT files and read top-level objects.

mod common;

use std::sync::Arc;

use common::{FileBuilder, Header, KeyDef};
use rootio::compress::{Algorithm, Settings};
use rootio::{
    FileHeader, Object, OpenOptions, RBuffer, ReaderConfig, Registry, RootClass, RootError, RootFile,
    TNamed, TObjString, WBuffer,
};

fn named(name: &str, title: &str) -> impl FnOnce(&mut WBuffer) {
    let obj = TNamed::new(name, title);
    move |w| obj.write_to(w).unwrap()
}

#[test]
fn minimal_file_with_one_named_object() {
    let mut b = FileBuilder::new(100);
    b.add_key(&KeyDef::new("TNamed", "obj").pdir(0), named("my-name", "my-title"));
    let f = RootFile::from_bytes(b.finish(&Header::default()), "minimal.root").unwrap();

    assert_eq!(f.begin(), 100);
    assert_eq!(f.keys().len(), 1);
    let obj = f.get("obj").unwrap();
    assert_eq!(obj.class(), "TNamed");
    let n = obj.downcast_ref::<TNamed>().unwrap();
    assert_eq!(n.name(), "my-name");
    assert_eq!(n.title(), "my-title");
    assert!(f.has("obj"));
    assert!(!f.has("other"));
}

#[test]
fn pointer_width_follows_version() {
    for (version, large) in [(1_000_000, false), (1_000_001, true)] {
        let mut b = FileBuilder::with_version(100, version);
        assert_eq!(b.large(), large);
        b.add_key(&KeyDef::new("TNamed", "obj"), named("n", "t"));
        let bytes = b.finish(&Header::default());
        let end = bytes.len() as i64;

        let f = RootFile::from_bytes(bytes, "width.root").unwrap();
        assert_eq!(f.is_large(), large, "version {}", version);
        assert_eq!(f.end(), end);
        assert_eq!(f.get("obj").unwrap().name(), "n");
    }
}

#[test]
fn small_layout_misread_as_large() {
    let mut b = FileBuilder::new(100);
    b.add_key(&KeyDef::new("TNamed", "obj"), named("n", "t"));
    let mut bytes = b.finish(&Header::default());
    let end = bytes.len() as i64;
    bytes[4..8].copy_from_slice(&1_000_001i32.to_be_bytes());

    let h = FileHeader::parse(&bytes).unwrap();
    assert!(h.large);
    assert_ne!(h.end, end);
}

#[test]
fn gaps_are_skipped_without_decoding() {
    let mut b = FileBuilder::new(100);
    b.add_key(&KeyDef::new("TNamed", "a"), named("a", ""));
    b.add_gap(37);
    b.add_key(&KeyDef::new("TNamed", "b"), named("b", ""));
    let f = RootFile::from_bytes(b.finish(&Header::default()), "gap.root").unwrap();

    let names: Vec<_> = f.keys().iter().map(|k| k.name().to_string()).collect();
    assert_eq!(names, ["a", "b"]);
    assert_eq!(f.get("b").unwrap().name(), "b");
}

#[test]
fn scanned_key_at_wrong_offset_is_fatal() {
    let mut b = FileBuilder::new(100);
    b.add_key(&KeyDef::new("TNamed", "a"), named("a", ""));
    let at = b.pos();
    b.add_key(&KeyDef::new("TNamed", "b").stored_seek(at + 8), named("b", ""));
    let err = RootFile::from_bytes(b.finish(&Header::default()), "bad.root").unwrap_err();

    assert!(err.is_consistency());
    match err.root_cause() {
        RootError::SeekKeyMismatch { name, stored, actual } => {
            assert_eq!(name, "b");
            assert_eq!(*stored, (at + 8) as u64);
            assert_eq!(*actual, at as u64);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn zero_stored_seek_means_here() {
    let mut b = FileBuilder::new(100);
    b.add_key(&KeyDef::new("TNamed", "a").stored_seek(0), named("a", ""));
    let f = RootFile::from_bytes(b.finish(&Header::default()), "zero.root").unwrap();
    assert_eq!(f.keys()[0].seek_key(), 100);
    assert_eq!(f.get("a").unwrap().name(), "a");
}

#[test]
fn listed_key_pointing_elsewhere_is_caught_on_read() {
    let mut b = FileBuilder::new(100);
    let nbytes_name = b.add_top("list.root", "");
    let a = b.add_key(&KeyDef::new("TNamed", "a"), named("a", ""));
    let c = b.add_key(&KeyDef::new("TNamed", "c"), named("c", ""));

    // entry for "a" whose seek-key field points at "c"
    let mut forged = b.key_header(&a);
    forged[18..22].copy_from_slice(&(c.seek as i32).to_be_bytes());
    let list_at = b.pos();
    let top_dir = 100 + i64::from(nbytes_name);
    let list = b.add_key_list("TFile", "list.root", 100, top_dir, &[a]);
    // key header of the list record, then nkeys, then the single entry
    b.patch(list.payload_at() + 4, &forged);
    assert_eq!(list.seek, list_at);
    let bytes = b.finish(&Header { nbytes_name, ..Header::default() });

    let f = RootFile::from_bytes(bytes.clone(), "list.root").unwrap();
    assert_eq!(f.keys()[0].seek_key(), c.seek);
    let err = f.get("a").unwrap_err();
    assert!(err.is_consistency(), "{}", err);

    let lax = OpenOptions::new()
        .config(ReaderConfig { verify_seek_keys: false, ..ReaderConfig::default() })
        .from_bytes(bytes, "list.root")
        .unwrap();
    assert_eq!(lax.get("a").unwrap().name(), "c");
}

#[test]
fn compressed_objects_are_inflated() {
    let long = "abcdefgh".repeat(200);
    for settings in [Settings::new(Algorithm::Zlib, 6), Settings::new(Algorithm::Zstd, 3), Settings::new(Algorithm::Lzma, 1)] {
        let mut b = FileBuilder::new(100);
        let value = TObjString::new(long.clone());
        b.add_packed_key(&KeyDef::new("TObjString", "s"), settings, |w| value.write_to(w).unwrap());
        let f = RootFile::from_bytes(b.finish(&Header::default()), "packed.root").unwrap();

        let key = &f.keys()[0];
        assert!(key.is_compressed());
        assert!(key.bytes().unwrap().len() > key.nbytes() as usize);
        let obj = f.get("s").unwrap();
        assert_eq!(obj.downcast_ref::<TObjString>().unwrap().value(), long, "{}", settings);
    }
}

#[test]
fn unknown_compression_tag_is_reported() {
    let mut b = FileBuilder::new(100);
    let value = TObjString::new("x".repeat(1000));
    let rec = b.add_packed_key(&KeyDef::new("TObjString", "s"), Settings::default(), |w| value.write_to(w).unwrap());
    b.patch(rec.payload_at(), b"QQ");
    let f = RootFile::from_bytes(b.finish(&Header::default()), "tag.root").unwrap();

    let err = f.get("s").unwrap_err();
    assert!(err.is_format());
    assert!(matches!(err.root_cause(), RootError::UnknownCompression(tag) if tag.starts_with("QQ")));
}

#[test]
fn open_from_disk() {
    let mut b = FileBuilder::new(100);
    b.add_key(&KeyDef::new("TNamed", "obj"), named("on-disk", ""));
    let path = std::env::temp_dir().join(format!("rootio-open-{}.root", std::process::id()));
    std::fs::write(&path, b.finish(&Header::default())).unwrap();

    let f = RootFile::open(&path).unwrap();
    assert_eq!(f.path(), path.as_path());
    assert_eq!(f.get("obj").unwrap().name(), "on-disk");
    f.close();
    std::fs::remove_file(&path).unwrap();

    let err = RootFile::open(&path).unwrap_err();
    assert!(err.is_io());
}

#[test]
fn names_and_titles_are_quoted_in_errors() {
    let mut b = FileBuilder::new(100);
    b.add_key(&KeyDef::new("TNamed", "obj"), named("n", ""));
    let f = RootFile::from_bytes(b.finish(&Header::default()), "quote.root").unwrap();
    let err = f.get("missing;3").unwrap_err();
    assert!(matches!(err.root_cause(), RootError::KeyNotFound(q) if q == "missing;3"));
    assert!(err.to_string().contains("quote.root"));
}

/// A user class decoded by hand: a version envelope around one i32.
#[derive(Debug, Default)]
struct Tally {
    count: i32,
}

impl RootClass for Tally {
    const CLASS: &'static str = "Tally";
}

impl Object for Tally {
    fn class(&self) -> &str {
        Self::CLASS
    }

    fn unmarshal(&mut self, r: &mut RBuffer<'_>) -> rootio::Result<()> {
        let v = r.read_version(Self::CLASS)?;
        self.count = r.read_i32()?;
        r.check_byte_count(&v, Self::CLASS)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[test]
fn registries_are_per_file() {
    let mut b = FileBuilder::new(100);
    b.add_key(&KeyDef::new("Tally", "t"), |w| {
        let beg = w.write_version(1);
        w.write_i32(42);
        w.set_byte_count(beg).unwrap();
    });
    b.add_key(&KeyDef::new("TNamed", "n"), named("n", ""));
    let bytes = b.finish(&Header::default());

    let custom = Arc::new(Registry::builder().builtins().register::<Tally>().build());
    let with = OpenOptions::new().registry(Arc::clone(&custom)).from_bytes(bytes.clone(), "a.root").unwrap();
    let without = RootFile::from_bytes(bytes.clone(), "b.root").unwrap();

    assert_eq!(with.get("t").unwrap().downcast_ref::<Tally>().unwrap().count, 42);
    let err = without.get("t").unwrap_err();
    assert!(matches!(err.root_cause(), RootError::UnknownClass(c) if c == "Tally"));
    assert!(!Registry::builtin().contains("Tally"));

    let bare = Arc::new(Registry::builder().register::<Tally>().build());
    let only_tally = OpenOptions::new().registry(bare).from_bytes(bytes, "c.root").unwrap();
    assert!(only_tally.get("t").is_ok());
    assert!(matches!(only_tally.get("n").unwrap_err().root_cause(), RootError::UnknownClass(_)));
}

#[test]
fn files_can_be_shared_across_threads() {
    let mut b = FileBuilder::new(100);
    for i in 0..8 {
        b.add_key(&KeyDef::new("TNamed", &format!("o{}", i)), named(&format!("n{}", i), ""));
    }
    let f = Arc::new(RootFile::from_bytes(b.finish(&Header::default()), "mt.root").unwrap());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let f = Arc::clone(&f);
            std::thread::spawn(move || {
                for i in 0..8 {
                    let obj = f.get(&format!("o{}", (i + t) % 8)).unwrap();
                    assert_eq!(obj.name(), format!("n{}", (i + t) % 8));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}
