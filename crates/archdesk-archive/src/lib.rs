//! Archive inspection and search for archdesk
//!
//! Everything in this crate is synchronous and reads archives through the
//! [`ArchiveReader`] trait, so ZIP and TAR uploads are handled the same way.
//!
//! # Features
//!
//! - **Entry tables**: [`open_archive`] and [`list_archive_entries`] for ZIP,
//!   TAR, TAR.GZ and TAR.BZ2, with path sanitization
//! - **Inspection**: [`analyze_archive`] scans names and small text entries
//!   against the [`WalletCategory`] signature table and picks a screenshot-like
//!   image entry
//! - **Caching**: [`AnalysisCache`] keeps results for a fixed TTL
//! - **Search**: [`search_archive`] and [`search_many_archives`] match entry
//!   names or decoded text line by line
//!
//! # Usage
//!
//! ```no_run
//! use archdesk_archive::{analyze_archive, search_archive, SearchMode, SearchOptions};
//! use std::path::Path;
//!
//! let analysis = analyze_archive(Path::new("upload.zip")).unwrap();
//! if analysis.has_wallet_indicators() {
//!     println!("flagged: {:?}", analysis.matched_categories);
//! }
//!
//! let options = SearchOptions::default().with_mode(SearchMode::Content);
//! for hit in search_archive(Path::new("upload.zip"), "password", &options).unwrap() {
//!     println!("{}", hit.path());
//! }
//! ```

pub mod cache;
pub mod error;
pub mod inspector;
pub mod reader;
pub mod search;
pub mod signatures;
pub mod text;

/// Maximum size for a single file within an archive (100 MB).
///
/// Entries above this limit are never read fully into memory.
pub const MAX_FILE_SIZE: u64 = 100_000_000;

pub use cache::{AnalysisCache, DEFAULT_CACHE_TTL};
pub use error::{ArchiveError, ArchiveResult};
pub use inspector::{
    analyze_archive, analyze_reader, extract_entry, extract_screenshot, AnalysisResult,
    SampledText, TEXT_SAMPLE_LIMIT,
};
pub use reader::{
    list_archive_entries, open_archive, sanitize_path, ArchiveEntry, ArchiveFormat, ArchiveReader,
    EntryVisitor, ReadBody, TarCompression,
};
pub use search::{
    list_archives, search_archive, search_many_archives, search_reader, ArchiveMatches,
    EntryMatch, LineMatch, SearchMode, SearchOptions, DEFAULT_MAX_LINE_MATCHES,
};
pub use signatures::{match_signatures, WalletCategory};
