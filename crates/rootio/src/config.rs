//! Reader configuration.

/// Knobs controlling what [`RootFile`](crate::RootFile) decodes at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Decode the streamer-info record pointed to by the header.
    /// Default: `true`.
    pub read_streamers: bool,
    /// Decode the free-segments record pointed to by the header.
    /// Default: `true`.
    pub read_free_segments: bool,
    /// Rebuild the top-level key list by scanning records from `begin` to `end`
    /// instead of trusting the directory's key-list record. Files without a
    /// key-list record are always scanned.
    /// Default: `false`.
    pub scan_keys: bool,
    /// Re-read the key header at `seekkey` before loading a payload and check
    /// that it points back at itself.
    /// Default: `true`.
    pub verify_seek_keys: bool,
    /// How deeply objects may be embedded in one another, and directories
    /// nested under the top directory, before decoding gives up.
    /// Default: [`DEFAULT_MAX_DEPTH`](crate::rbuffer::DEFAULT_MAX_DEPTH).
    pub max_depth: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            read_streamers: true,
            read_free_segments: true,
            scan_keys: false,
            verify_seek_keys: true,
            max_depth: crate::rbuffer::DEFAULT_MAX_DEPTH,
        }
    }
}

impl ReaderConfig {
    /// Only the header and the key index; no streamers, no free list.
    pub fn minimal() -> Self {
        Self { read_streamers: false, read_free_segments: false, ..Self::default() }
    }

    /// Recover keys by scanning the record stream.
    pub fn recover() -> Self {
        Self { scan_keys: true, ..Self::default() }
    }
}
