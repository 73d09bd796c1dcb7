//! Read-only access to archive entry tables
//!
//! [`open_archive`] picks a reader from the file extension. ZIP archives are
//! random access; TAR archives (plain, gzip, bzip2) are streams, so each
//! [`ArchiveReader::read_entry`] call on them re-reads the archive up to the
//! requested entry. Scans over many entries go through
//! [`ArchiveReader::visit_entries`], which reads a TAR stream once.

use crate::error::{ArchiveError, ArchiveResult};
use crate::MAX_FILE_SIZE;
use bzip2::read::BzDecoder;
use chrono::NaiveDateTime;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tracing::warn;
use zip::ZipArchive;

/// One row of an archive's entry table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Sanitized path within the archive, forward-slash separated
    pub name: String,
    pub is_dir: bool,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub modified: Option<NaiveDateTime>,
    pub comment: Option<String>,
}

/// An opened, read-only archive
pub trait ArchiveReader {
    /// Entries in archive order, with unusable paths already dropped
    fn entries(&self) -> &[ArchiveEntry];

    /// Read at most `limit` bytes of the entry at `index`
    fn read_entry(&mut self, index: usize, limit: u64) -> ArchiveResult<Vec<u8>>;

    /// Call `visit` for every entry in archive order.
    ///
    /// The second argument reads at most the given number of bytes of the
    /// entry being visited; entries the visitor does not read are skipped
    /// without being decompressed.
    fn visit_entries(&mut self, visit: &mut EntryVisitor<'_>) -> ArchiveResult<()> {
        for index in 0..self.entries().len() {
            let entry = self.entries()[index].clone();
            visit(&entry, &mut |limit| self.read_entry(index, limit));
        }
        Ok(())
    }

    /// Index of the entry named exactly `name`
    fn find(&self, name: &str) -> Option<usize> {
        self.entries().iter().position(|entry| entry.name == name)
    }
}

/// Reads the body of the entry being visited, capped at the given byte count
pub type ReadBody<'a> = dyn FnMut(u64) -> ArchiveResult<Vec<u8>> + 'a;

/// Callback for [`ArchiveReader::visit_entries`]
pub type EntryVisitor<'a> = dyn FnMut(&ArchiveEntry, &mut ReadBody<'_>) + 'a;

/// Compression wrapped around a TAR stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TarCompression {
    #[default]
    None,
    Gzip,
    Bzip2,
}

/// Container format, detected from the file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveFormat {
    Zip,
    Tar(TarCompression),
}

impl ArchiveFormat {
    /// Detect the format from the extension; anything unrecognized is treated as ZIP
    #[must_use = "returns the detected archive format"]
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if name.ends_with(".tar") {
            Self::Tar(TarCompression::None)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Self::Tar(TarCompression::Gzip)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") || name.ends_with(".tbz") {
            Self::Tar(TarCompression::Bzip2)
        } else {
            Self::Zip
        }
    }
}

/// Normalize an entry path: `..` removes the previous segment, and `.`, root
/// and drive prefixes are stripped. A `..` with nothing left to remove is
/// dropped, so the result never climbs above the archive root.
///
/// Returns `None` when nothing usable is left (e.g. just `..`).
pub fn sanitize_path(path: &str) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Open `path` with the reader matching its extension
pub fn open_archive(path: &Path) -> ArchiveResult<Box<dyn ArchiveReader + Send>> {
    match ArchiveFormat::from_path(path) {
        ArchiveFormat::Zip => Ok(Box::new(ZipReader::open(path)?)),
        ArchiveFormat::Tar(compression) => Ok(Box::new(TarReader::open(path, compression)?)),
    }
}

/// Full entry table of the archive at `path`, directories included
pub fn list_archive_entries(path: &Path) -> ArchiveResult<Vec<ArchiveEntry>> {
    Ok(open_archive(path)?.entries().to_vec())
}

fn check_size(entry: &ArchiveEntry, limit: u64) -> ArchiveResult<()> {
    if limit >= MAX_FILE_SIZE && entry.uncompressed_size > MAX_FILE_SIZE {
        return Err(ArchiveError::FileTooLarge {
            name: entry.name.clone(),
            size: entry.uncompressed_size,
            max: MAX_FILE_SIZE,
        });
    }
    Ok(())
}

fn read_limited(source: impl Read, entry: &ArchiveEntry, limit: u64) -> ArchiveResult<Vec<u8>> {
    let limit = limit.min(MAX_FILE_SIZE);
    let capacity = usize::try_from(entry.uncompressed_size.min(limit)).unwrap_or(0);
    let mut contents = Vec::with_capacity(capacity);
    source.take(limit).read_to_end(&mut contents)?;
    Ok(contents)
}

/// ZIP archive reader backed by the `zip` crate
pub struct ZipReader {
    archive: ZipArchive<BufReader<File>>,
    entries: Vec<ArchiveEntry>,
    /// Position of each entry in the underlying central directory
    raw_indices: Vec<usize>,
}

impl ZipReader {
    pub fn open(path: &Path) -> ArchiveResult<Self> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(BufReader::new(file))?;

        let mut entries = Vec::with_capacity(archive.len());
        let mut raw_indices = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            // Raw access reads metadata without requiring a password.
            let zip_file = archive.by_index_raw(i)?;
            let raw_name = zip_file.name().to_string();

            // SECURITY: entries like "../../../etc/passwd" must not escape
            let Some(name) = sanitize_path(&raw_name) else {
                warn!("Skipping invalid path: {raw_name} (path traversal attempt or empty)");
                continue;
            };

            let comment = zip_file.comment();
            entries.push(ArchiveEntry {
                name,
                is_dir: zip_file.is_dir(),
                uncompressed_size: zip_file.size(),
                compressed_size: zip_file.compressed_size(),
                modified: zip_file.last_modified().and_then(zip_datetime),
                comment: (!comment.is_empty()).then(|| comment.to_string()),
            });
            raw_indices.push(i);
        }

        Ok(Self {
            archive,
            entries,
            raw_indices,
        })
    }
}

fn zip_datetime(dt: zip::DateTime) -> Option<NaiveDateTime> {
    chrono::NaiveDate::from_ymd_opt(i32::from(dt.year()), u32::from(dt.month()), u32::from(dt.day()))?
        .and_hms_opt(u32::from(dt.hour()), u32::from(dt.minute()), u32::from(dt.second()))
}

impl ArchiveReader for ZipReader {
    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn read_entry(&mut self, index: usize, limit: u64) -> ArchiveResult<Vec<u8>> {
        let entry = self.entries.get(index).ok_or(ArchiveError::NoSuchEntry(index))?;
        let raw_index = self.raw_indices[index];
        check_size(entry, limit)?;

        if self.archive.by_index_raw(raw_index)?.encrypted() {
            return Err(ArchiveError::PasswordProtected);
        }

        let zip_file = self.archive.by_index(raw_index)?;
        read_limited(zip_file, entry, limit)
    }
}

/// TAR archive reader; re-opens the stream for every [`ArchiveReader::read_entry`]
pub struct TarReader {
    path: PathBuf,
    compression: TarCompression,
    entries: Vec<ArchiveEntry>,
    /// Position of each entry in the raw stream
    raw_indices: Vec<usize>,
}

fn tar_stream(path: &Path, compression: TarCompression) -> ArchiveResult<tar::Archive<Box<dyn Read>>> {
    let file = BufReader::new(File::open(path)?);
    let reader: Box<dyn Read> = match compression {
        TarCompression::None => Box::new(file),
        TarCompression::Gzip => Box::new(GzDecoder::new(file)),
        TarCompression::Bzip2 => Box::new(BzDecoder::new(file)),
    };
    Ok(tar::Archive::new(reader))
}

impl TarReader {
    pub fn open(path: &Path, compression: TarCompression) -> ArchiveResult<Self> {
        let mut archive = tar_stream(path, compression)?;
        let mut entries = Vec::new();
        let mut raw_indices = Vec::new();

        for (i, entry) in archive.entries()?.enumerate() {
            let entry = entry?;
            let header = entry.header();
            let raw_name = entry.path()?.to_string_lossy().into_owned();

            let Some(name) = sanitize_path(&raw_name) else {
                warn!("Skipping invalid path: {raw_name} (path traversal attempt or empty)");
                continue;
            };

            let size = header.size()?;
            entries.push(ArchiveEntry {
                name,
                is_dir: header.entry_type().is_dir(),
                uncompressed_size: size,
                compressed_size: size,
                modified: header
                    .mtime()
                    .ok()
                    .and_then(|secs| i64::try_from(secs).ok())
                    .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
                    .map(|dt| dt.naive_utc()),
                comment: None,
            });
            raw_indices.push(i);
        }

        Ok(Self {
            path: path.to_path_buf(),
            compression,
            entries,
            raw_indices,
        })
    }
}

impl ArchiveReader for TarReader {
    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn read_entry(&mut self, index: usize, limit: u64) -> ArchiveResult<Vec<u8>> {
        let entry = self.entries.get(index).ok_or(ArchiveError::NoSuchEntry(index))?;
        let raw_index = self.raw_indices[index];
        check_size(entry, limit)?;

        let mut archive = tar_stream(&self.path, self.compression)?;
        let found = archive.entries()?.nth(raw_index);
        match found {
            Some(tar_entry) => read_limited(tar_entry?, entry, limit),
            None => Err(ArchiveError::NoSuchEntry(index)),
        }
    }

    fn visit_entries(&mut self, visit: &mut EntryVisitor<'_>) -> ArchiveResult<()> {
        let mut archive = tar_stream(&self.path, self.compression)?;
        let mut next = 0;

        for (raw_index, tar_entry) in archive.entries()?.enumerate() {
            let mut tar_entry = tar_entry?;
            let Some(&wanted) = self.raw_indices.get(next) else {
                break;
            };
            // Entries dropped by sanitize_path keep their place in the stream.
            if raw_index != wanted {
                continue;
            }

            let entry = &self.entries[next];
            next += 1;
            visit(entry, &mut |limit| {
                check_size(entry, limit)?;
                read_limited(&mut tar_entry, entry, limit)
            });
        }
        Ok(())
    }
}
