//! Filename and content search inside archives

use crate::error::{ArchiveError, ArchiveResult};
use crate::reader::{open_archive, ArchiveReader};
use crate::text::{decode_text, entry_extension, truncate_chars};
use crate::MAX_FILE_SIZE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Line matches kept per entry unless configured otherwise
pub const DEFAULT_MAX_LINE_MATCHES: usize = 5;

/// Longest line text reported in a match, in characters
pub const MAX_LINE_TEXT_CHARS: usize = 200;

/// Extensions whose entries are decoded for content search
const CONTENT_EXTENSIONS: &[&str] = &[
    "txt", "md", "json", "xml", "csv", "log", "js", "ts", "jsx", "tsx", "py", "java", "cpp", "c",
    "h", "cs", "php", "rb", "go", "rs", "html", "css", "scss", "yml", "yaml", "toml", "ini", "conf",
    "sh", "bat",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Filename,
    Content,
    #[default]
    All,
}

impl SearchMode {
    fn names(self) -> bool {
        matches!(self, SearchMode::Filename | SearchMode::All)
    }

    fn contents(self) -> bool {
        matches!(self, SearchMode::Content | SearchMode::All)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Filename => "filename",
            Self::Content => "content",
            Self::All => "all",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "filename" | "name" => Ok(Self::Filename),
            "content" | "text" => Ok(Self::Content),
            "all" => Ok(Self::All),
            _ => Err(format!(
                "Unknown search mode '{s}'. Expected: filename, content, all"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub case_sensitive: bool,
    pub mode: SearchMode,
    /// Line matches kept per entry; the total is still counted past this
    pub max_line_matches: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            mode: SearchMode::All,
            max_line_matches: DEFAULT_MAX_LINE_MATCHES,
        }
    }
}

impl SearchOptions {
    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn with_max_line_matches(mut self, max_line_matches: usize) -> Self {
        self.max_line_matches = max_line_matches;
        self
    }
}

/// One matching line inside a text entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMatch {
    /// 1-based
    pub line_number: usize,
    pub text: String,
    /// Matching line prefixed `>>> `, with up to one context line (prefixed
    /// with four spaces) on each side
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntryMatch {
    Filename {
        path: String,
    },
    Content {
        path: String,
        matches: Vec<LineMatch>,
        total_matches: usize,
    },
}

impl EntryMatch {
    pub fn path(&self) -> &str {
        match self {
            EntryMatch::Filename { path } | EntryMatch::Content { path, .. } => path,
        }
    }
}

/// Matches for one archive in a multi-archive search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMatches {
    pub filename: String,
    pub matches: Vec<EntryMatch>,
    /// Number of matching entries
    pub total_matches: usize,
}

struct Needle {
    pattern: String,
    case_sensitive: bool,
}

impl Needle {
    fn new(term: &str, case_sensitive: bool) -> ArchiveResult<Self> {
        if term.is_empty() {
            return Err(ArchiveError::EmptyQuery);
        }
        let pattern = if case_sensitive {
            term.to_string()
        } else {
            term.to_lowercase()
        };
        Ok(Self {
            pattern,
            case_sensitive,
        })
    }

    fn found_in(&self, haystack: &str) -> bool {
        if self.case_sensitive {
            haystack.contains(&self.pattern)
        } else {
            haystack.to_lowercase().contains(&self.pattern)
        }
    }
}

/// Search one archive by entry name and/or decoded text content
pub fn search_archive(path: &Path, term: &str, options: &SearchOptions) -> ArchiveResult<Vec<EntryMatch>> {
    let needle = Needle::new(term, options.case_sensitive)?;
    let mut reader = open_archive(path)?;
    Ok(search_entries(reader.as_mut(), &needle, options))
}

/// Search an already opened archive
pub fn search_reader(
    reader: &mut dyn ArchiveReader,
    term: &str,
    options: &SearchOptions,
) -> ArchiveResult<Vec<EntryMatch>> {
    let needle = Needle::new(term, options.case_sensitive)?;
    Ok(search_entries(reader, &needle, options))
}

fn search_entries(reader: &mut dyn ArchiveReader, needle: &Needle, options: &SearchOptions) -> Vec<EntryMatch> {
    let mut found = Vec::new();

    let scan = reader.visit_entries(&mut |entry, read| {
        if entry.is_dir {
            return;
        }
        let name = entry.name.clone();
        let size = entry.uncompressed_size;

        if options.mode.names() && needle.found_in(&name) {
            found.push(EntryMatch::Filename { path: name.clone() });
        }

        if !options.mode.contents() {
            return;
        }
        let searchable = entry_extension(&name).is_some_and(|ext| CONTENT_EXTENSIONS.contains(&ext.as_str()));
        if !searchable || size > MAX_FILE_SIZE {
            return;
        }

        // Binary or unreadable entries are skipped silently.
        let content = match read(MAX_FILE_SIZE) {
            Ok(bytes) => decode_text(&bytes),
            Err(e) => {
                debug!("Skipping {name} during search: {e}");
                None
            }
        };
        let Some(content) = content else {
            return;
        };

        let (matches, total_matches) = match_lines(&content, needle, options.max_line_matches);
        if total_matches > 0 {
            found.push(EntryMatch::Content {
                path: name,
                matches,
                total_matches,
            });
        }
    });
    if let Err(e) = scan {
        warn!("Search stopped early: {e}");
    }

    found
}

fn match_lines(content: &str, needle: &Needle, keep: usize) -> (Vec<LineMatch>, usize) {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut kept = Vec::new();
    let mut total = 0;

    for (index, line) in lines.iter().enumerate() {
        if !needle.found_in(line) {
            continue;
        }
        total += 1;
        if kept.len() < keep {
            kept.push(LineMatch {
                line_number: index + 1,
                text: truncate_chars(line.trim(), MAX_LINE_TEXT_CHARS).to_string(),
                preview: context_preview(&lines, index),
            });
        }
    }

    (kept, total)
}

fn context_preview(lines: &[&str], index: usize) -> String {
    let start = index.saturating_sub(1);
    let end = (index + 1).min(lines.len() - 1);

    (start..=end)
        .map(|i| {
            let marker = if i == index { ">>> " } else { "    " };
            format!("{marker}{}", lines[i].trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Search several archives, leaving out those without matches.
///
/// An archive that cannot be read is logged and skipped.
pub fn search_many_archives<P: AsRef<Path>>(
    paths: &[P],
    term: &str,
    options: &SearchOptions,
) -> ArchiveResult<Vec<ArchiveMatches>> {
    let needle = Needle::new(term, options.case_sensitive)?;
    let mut results = Vec::new();

    for path in paths {
        let path = path.as_ref();
        let matches = match open_archive(path) {
            Ok(mut reader) => search_entries(reader.as_mut(), &needle, options),
            Err(e) => {
                warn!("Error searching {}: {e}", path.display());
                continue;
            }
        };

        if !matches.is_empty() {
            results.push(ArchiveMatches {
                filename: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string()),
                total_matches: matches.len(),
                matches,
            });
        }
    }

    Ok(results)
}

/// `.zip` files directly inside `dir`, sorted by path
pub fn list_archives(dir: &Path) -> ArchiveResult<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_zip = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if is_zip && entry.file_type()?.is_file() {
            archives.push(path);
        }
    }
    archives.sort();
    Ok(archives)
}
