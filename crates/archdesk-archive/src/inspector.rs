//! Single-pass archive content inspection

use crate::error::ArchiveResult;
use crate::reader::{open_archive, ArchiveReader};
use crate::signatures::{match_signatures, WalletCategory};
use crate::text::{decode_text, entry_extension, truncate_chars};
use crate::MAX_FILE_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, warn};

/// Byte cap when sampling a text entry (10 KB)
pub const TEXT_SAMPLE_LIMIT: usize = 10 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

const SCREENSHOT_HINTS: &[&str] = &[
    "screen",
    "screenshot",
    "capture",
    "snap",
    "image",
    "pic",
    "photo",
    "desktop",
];

const SAMPLED_TEXT_EXTENSIONS: &[&str] = &["txt", "log", "conf", "json"];

/// Decoded prefix of a small text entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampledText {
    pub name: String,
    pub content: String,
}

/// Outcome of [`analyze_archive`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub has_screenshot_like_entry: bool,
    pub screenshot_entry_path: Option<String>,
    pub matched_categories: BTreeSet<WalletCategory>,
    pub sampled_text_entries: Vec<SampledText>,
    /// Non-directory entries
    pub total_entries: usize,
    pub entry_names: Vec<String>,
}

impl AnalysisResult {
    pub fn has_wallet_indicators(&self) -> bool {
        !self.matched_categories.is_empty()
    }
}

#[derive(Debug, Default)]
enum ScreenshotCandidate {
    #[default]
    None,
    /// Image extension only
    Fallback(String),
    /// Image extension and a suggestive name
    Strong(String),
}

impl ScreenshotCandidate {
    fn offer(&mut self, name: &str, suggestive: bool) {
        match self {
            ScreenshotCandidate::Strong(_) => {}
            _ if suggestive => *self = ScreenshotCandidate::Strong(name.to_string()),
            ScreenshotCandidate::None => *self = ScreenshotCandidate::Fallback(name.to_string()),
            ScreenshotCandidate::Fallback(_) => {}
        }
    }

    fn into_path(self) -> Option<String> {
        match self {
            ScreenshotCandidate::None => None,
            ScreenshotCandidate::Fallback(path) | ScreenshotCandidate::Strong(path) => Some(path),
        }
    }
}

/// Scan entry names and small text entries of the archive at `path`
pub fn analyze_archive(path: &Path) -> ArchiveResult<AnalysisResult> {
    let mut reader = open_archive(path)?;
    let result = analyze_reader(reader.as_mut());
    debug!(
        path = %path.display(),
        entries = result.total_entries,
        categories = result.matched_categories.len(),
        "archive analyzed"
    );
    Ok(result)
}

/// Scan an already opened archive.
///
/// Entries that cannot be read or decoded are skipped, and a stream that breaks
/// part way keeps what was scanned before the break; the scan itself never fails.
pub fn analyze_reader(reader: &mut dyn ArchiveReader) -> AnalysisResult {
    let mut result = AnalysisResult::default();
    let mut candidate = ScreenshotCandidate::default();

    let scan = reader.visit_entries(&mut |entry, read| {
        if entry.is_dir {
            return;
        }
        let name = entry.name.clone();

        result.total_entries += 1;
        result.entry_names.push(name.clone());

        let lowercase = name.to_lowercase();
        let extension = entry_extension(&name);
        let extension = extension.as_deref();

        if extension.is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext)) {
            let suggestive = SCREENSHOT_HINTS.iter().any(|hint| lowercase.contains(hint));
            candidate.offer(&name, suggestive);
        }

        result.matched_categories.extend(match_signatures(&name));

        if !extension.is_some_and(|ext| SAMPLED_TEXT_EXTENSIONS.contains(&ext)) {
            return;
        }

        let bytes = match read(TEXT_SAMPLE_LIMIT as u64) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Skipping unreadable text entry {name}: {e}");
                return;
            }
        };
        let Some(content) = decode_text(&bytes) else {
            debug!("Skipping undecodable text entry {name}");
            return;
        };

        result.matched_categories.extend(match_signatures(&content));
        result.sampled_text_entries.push(SampledText {
            name,
            content: truncate_chars(&content, TEXT_SAMPLE_LIMIT).to_string(),
        });
    });
    if let Err(e) = scan {
        warn!("Archive scan stopped early: {e}");
    }

    result.screenshot_entry_path = candidate.into_path();
    result.has_screenshot_like_entry = result.screenshot_entry_path.is_some();
    result
}

/// Bytes of the entry named exactly `entry_path`, or `None` when absent
pub fn extract_entry(path: &Path, entry_path: &str) -> ArchiveResult<Option<Vec<u8>>> {
    let mut reader = open_archive(path)?;
    let Some(index) = reader.find(entry_path) else {
        return Ok(None);
    };
    if reader.entries()[index].is_dir {
        return Ok(None);
    }
    reader.read_entry(index, MAX_FILE_SIZE).map(Some)
}

/// Bytes of the screenshot candidate chosen by a previous analysis
pub fn extract_screenshot(path: &Path, analysis: &AnalysisResult) -> ArchiveResult<Option<Vec<u8>>> {
    match &analysis.screenshot_entry_path {
        Some(entry_path) => extract_entry(path, entry_path),
        None => Ok(None),
    }
}
