//! tar.zst codec for workload trees.
//!
//! Archives hold plain files addressed by `/`-separated relative paths.
//! Packing and unpacking run on the blocking pool.

use std::io::{Cursor, Read};
use std::path::{Component, Path};

use tokio::task::spawn_blocking;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{StateError, StateResult};
use crate::types::FileEntry;

const COMPRESSION_LEVEL: i32 = 3;

/// Filters and rewrites applied to a tree before it is packed.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Paths starting with any of these prefixes are left out.
    pub exclude_prefixes: Vec<String>,
    /// Substring replacement applied to the content of `.json` files.
    pub rewrite: Option<Rewrite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub from: String,
    pub to: String,
}

impl Rewrite {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Apply to every `.json` file. Non-UTF-8 files are left as-is.
    pub fn apply_to_json(&self, files: &mut [FileEntry]) {
        if self.from.is_empty() {
            return;
        }
        for file in files.iter_mut().filter(|f| f.path.ends_with(".json")) {
            if let Ok(text) = std::str::from_utf8(&file.content) {
                if text.contains(&self.from) {
                    file.content = text.replace(&self.from, &self.to).into_bytes();
                }
            }
        }
    }
}

impl ExportOptions {
    pub fn excluding<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exclude_prefixes: prefixes.into_iter().map(Into::into).collect(),
            rewrite: None,
        }
    }

    pub fn with_rewrite(mut self, rewrite: Rewrite) -> Self {
        self.rewrite = Some(rewrite);
        self
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude_prefixes.iter().any(|p| path.starts_with(p))
    }

    pub fn apply(&self, files: Vec<FileEntry>) -> Vec<FileEntry> {
        let mut kept: Vec<FileEntry> = files
            .into_iter()
            .filter(|f| !self.is_excluded(&f.path))
            .collect();
        if let Some(rewrite) = &self.rewrite {
            rewrite.apply_to_json(&mut kept);
        }
        kept
    }
}

/// Pack files into a tar.zst archive.
pub async fn pack(files: Vec<FileEntry>) -> StateResult<Vec<u8>> {
    spawn_blocking(move || pack_sync(&files))
        .await
        .map_err(|e| StateError::Archive(e.to_string()))?
}

/// Decode a tar.zst archive into in-memory file entries.
pub async fn unpack(data: Vec<u8>) -> StateResult<Vec<FileEntry>> {
    spawn_blocking(move || unpack_sync(&data))
        .await
        .map_err(|e| StateError::Archive(e.to_string()))?
}

/// Extract a tar.zst archive under `dest`, creating it if needed.
pub async fn unpack_to_dir(data: Vec<u8>, dest: &Path) -> StateResult<()> {
    let dest = dest.to_owned();
    spawn_blocking(move || -> StateResult<()> {
        for entry in unpack_sync(&data)? {
            let target = dest.join(safe_relative(&entry.path)?);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, &entry.content)?;
        }
        Ok(())
    })
    .await
    .map_err(|e| StateError::Archive(e.to_string()))?
}

/// Read every regular file below `dir`, with paths relative to `dir`.
pub async fn read_dir_files(dir: &Path) -> StateResult<Vec<FileEntry>> {
    let dir = dir.to_owned();
    spawn_blocking(move || read_dir_files_sync(&dir))
        .await
        .map_err(|e| StateError::Archive(e.to_string()))?
}

fn pack_sync(files: &[FileEntry]) -> StateResult<Vec<u8>> {
    let mut tar_data = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_data);
        for file in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(file.content.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder
                .append_data(&mut header, &file.path, file.content.as_slice())
                .map_err(|e| StateError::Archive(format!("{}: {e}", file.path)))?;
        }
        builder
            .finish()
            .map_err(|e| StateError::Archive(e.to_string()))?;
    }

    let compressed = zstd::encode_all(Cursor::new(&tar_data), COMPRESSION_LEVEL)
        .map_err(|e| StateError::Archive(e.to_string()))?;
    debug!(
        files = files.len(),
        uncompressed_size = tar_data.len(),
        compressed_size = compressed.len(),
        "packed archive"
    );
    Ok(compressed)
}

fn unpack_sync(data: &[u8]) -> StateResult<Vec<FileEntry>> {
    let decompressed =
        zstd::decode_all(Cursor::new(data)).map_err(|e| StateError::Archive(e.to_string()))?;
    let mut archive = tar::Archive::new(Cursor::new(decompressed));
    let mut files = Vec::new();
    for entry in archive
        .entries()
        .map_err(|e| StateError::Archive(e.to_string()))?
    {
        let mut entry = entry.map_err(|e| StateError::Archive(e.to_string()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = to_slash_path(
            &entry
                .path()
                .map_err(|e| StateError::Archive(e.to_string()))?,
        );
        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(|e| StateError::Archive(e.to_string()))?;
        files.push(FileEntry::new(path, content));
    }
    debug!(files = files.len(), compressed_size = data.len(), "unpacked archive");
    Ok(files)
}

fn read_dir_files_sync(dir: &Path) -> StateResult<Vec<FileEntry>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| StateError::Io(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| StateError::Io(e.to_string()))?;
        let content = std::fs::read(entry.path())?;
        files.push(FileEntry::new(to_slash_path(relative), content));
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Reject absolute paths and parent traversal inside archives.
fn safe_relative(path: &str) -> StateResult<&Path> {
    let p = Path::new(path);
    if p.components().all(|c| matches!(c, Component::Normal(_))) && !path.is_empty() {
        Ok(p)
    } else {
        Err(StateError::Archive(format!("unsafe archive path: {path}")))
    }
}
