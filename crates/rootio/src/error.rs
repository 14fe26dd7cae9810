//! Error types for ROOT file decoding.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while decoding ROOT files.
///
/// Variants fall into four classes that callers can test for with
/// [`is_format`](Self::is_format), [`is_consistency`](Self::is_consistency),
/// [`is_not_implemented`](Self::is_not_implemented) and [`is_io`](Self::is_io).
#[derive(Error, Debug)]
pub enum RootError {
    /// I/O error from the underlying byte source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error annotated with the file and the failing operation.
    #[error("{op} {path:?}: {source}")]
    FileIo {
        /// File being accessed.
        path: PathBuf,
        /// Operation that failed ("open", "map", ...).
        op: &'static str,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid ROOT file magic bytes.
    #[error("not a ROOT file (bad magic)")]
    BadMagic,

    /// Buffer underflow (tried to read past end).
    #[error("unexpected end of buffer at offset {offset}, need {need} bytes, have {have}")]
    BufferUnderflow {
        /// Current offset in buffer.
        offset: usize,
        /// Bytes requested.
        need: usize,
        /// Bytes remaining.
        have: usize,
    },

    /// Bytes consumed by a decoder disagree with the envelope byte count.
    #[error(
        "read too {} bytes for class {class:?}: expected end at {expected}, cursor at {got}",
        many_or_few(.got, .expected)
    )]
    ByteCount {
        /// Class whose envelope was checked.
        class: String,
        /// Position the envelope says the object ends at.
        expected: u64,
        /// Position the cursor actually reached.
        got: u64,
    },

    /// Compression block with an algorithm tag this reader does not know.
    #[error("unknown compression algorithm: {0:?}")]
    UnknownCompression(String),

    /// Decompression failure.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// Malformed on-disk data.
    #[error("format error: {0}")]
    Format(String),

    /// A key read at one offset claims to live at another.
    #[error("key {name:?}: stored seek-key {stored} does not match its offset {actual}")]
    SeekKeyMismatch {
        /// Key name (empty when unknown).
        name: String,
        /// seekkey value stored in the record.
        stored: u64,
        /// Offset the record was actually read from.
        actual: u64,
    },

    /// Data decoded fine but contradicts other data in the file.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// A decode path that exists in the format but not in this reader.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Key not found in directory.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Class name not present in the registry nor in the streamer infos.
    #[error("unknown class: {0}")]
    UnknownClass(String),

    /// A path component that had to be a directory is something else.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// No streamer info for the requested class.
    #[error("no streamer info for class {0:?}")]
    StreamerNotFound(String),

    /// Another error with added context (key, class or path).
    #[error("{context}: {source}")]
    Context {
        /// What was being decoded.
        context: String,
        /// Underlying error.
        #[source]
        source: Box<RootError>,
    },
}

impl RootError {
    /// Wrap the error with a description of what was being decoded.
    pub fn context(self, context: impl fmt::Display) -> Self {
        RootError::Context { context: context.to_string(), source: Box::new(self) }
    }

    /// The innermost error, past any [`RootError::Context`] layers.
    pub fn root_cause(&self) -> &RootError {
        let mut err = self;
        while let RootError::Context { source, .. } = err {
            err = source.as_ref();
        }
        err
    }

    /// Malformed or undecodable bytes.
    pub fn is_format(&self) -> bool {
        matches!(
            self.root_cause(),
            RootError::BadMagic
                | RootError::BufferUnderflow { .. }
                | RootError::ByteCount { .. }
                | RootError::UnknownCompression(_)
                | RootError::Decompression(_)
                | RootError::Format(_)
        )
    }

    /// Self-contradicting file contents.
    pub fn is_consistency(&self) -> bool {
        matches!(self.root_cause(), RootError::SeekKeyMismatch { .. } | RootError::Consistency(_))
    }

    /// Valid input that this reader does not support.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self.root_cause(), RootError::NotImplemented(_))
    }

    /// Failure of the underlying byte source.
    pub fn is_io(&self) -> bool {
        matches!(self.root_cause(), RootError::Io(_) | RootError::FileIo { .. })
    }
}

fn many_or_few(got: &u64, expected: &u64) -> &'static str {
    if got > expected {
        "many"
    } else {
        "few"
    }
}

/// Result alias for ROOT operations.
pub type Result<T> = std::result::Result<T, RootError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_error_class() {
        let err = RootError::SeekKeyMismatch { name: "h".into(), stored: 10, actual: 20 }
            .context("reading key list")
            .context("file.root");
        assert!(err.is_consistency());
        assert!(!err.is_format());
        assert!(matches!(err.root_cause(), RootError::SeekKeyMismatch { stored: 10, .. }));
        let msg = err.to_string();
        assert!(msg.starts_with("file.root: reading key list:"), "{}", msg);
    }

    #[test]
    fn byte_count_message_names_direction() {
        let many = RootError::ByteCount { class: "TNamed".into(), expected: 10, got: 12 };
        let few = RootError::ByteCount { class: "TNamed".into(), expected: 10, got: 8 };
        assert!(many.to_string().contains("too many"));
        assert!(few.to_string().contains("too few"));
        assert!(few.to_string().contains("TNamed"));
    }

    #[test]
    fn classes_are_disjoint() {
        let ni = RootError::NotImplemented("CS compression".into());
        assert!(ni.is_not_implemented());
        assert!(!ni.is_format() && !ni.is_consistency() && !ni.is_io());

        let io = RootError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(io.is_io());
    }
}
