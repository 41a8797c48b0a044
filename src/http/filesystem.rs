// Copyright 2025 Europa Software
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Webroot file index for the filesystem request handler.
//!
//! The allowed-paths list is the security boundary: only files discovered
//! under the canonicalized webroot during a refresh are ever servable, and
//! each is re-checked to be an absolute, regular file at load time.
//! Everything else is NOT_FOUND. File ids are 1-based indices into the
//! list; 0 means "no match".

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use std::fs;

use tracing::{debug, info, warn};

/// One servable file.
#[derive(Debug, Clone)]
struct FileEntry {
    /// Webroot-relative path, normalized to `/`-separated form with a
    /// leading slash, as it appears in request URLs.
    relative: String,
    /// Canonical absolute path used for loading.
    full: PathBuf,
    /// Extension without the dot, lower-cased; empty when absent.
    extension: String,
}

/// Index of the files a server is allowed to serve.
// NOTE: lookup is linear; a tree would pay off only for very large roots.
#[derive(Debug, Default)]
pub struct HttpFilesystem {
    webroot: PathBuf,
    entries: Vec<FileEntry>,
    last_refresh: Option<Instant>,
}

impl HttpFilesystem {
    /// An empty index; call [`HttpFilesystem::refresh_full`] to populate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rescans `webroot` recursively and replaces the allowed-paths list.
    /// Entries whose canonical path escapes the webroot are skipped.
    pub fn refresh_full(&mut self, webroot: &Path) -> io::Result<()> {
        let root = webroot.canonicalize()?;
        let mut entries = Vec::new();
        collect_files(&root, &root, &mut entries)?;
        info!(
            webroot = %root.display(),
            files = entries.len(),
            "refreshed filesystem paths under webroot"
        );
        self.webroot = root;
        self.entries = entries;
        self.last_refresh = Some(Instant::now());
        Ok(())
    }

    /// Rescans the current webroot if `interval` has elapsed since the last
    /// refresh. A scan failure keeps the previous list.
    pub fn refresh_timed(&mut self, interval: Duration) {
        if self.webroot.as_os_str().is_empty() {
            return;
        }
        let due = match self.last_refresh {
            Some(at) => at.elapsed() >= interval,
            None => true,
        };
        if due {
            let webroot = self.webroot.clone();
            if let Err(e) = self.refresh_full(&webroot) {
                warn!(error = %e, "webroot rescan failed, keeping previous file list");
                self.last_refresh = Some(Instant::now());
            }
        }
    }

    /// Looks up a URL path in the allowed list. Directory URLs also match
    /// `<dir>/index.html` and `<dir>/<dir>.html`. Returns the 1-based file
    /// id, or 0 for no match.
    pub fn find_file(&self, url_path: &str) -> usize {
        let normalized = normalize_url_path(url_path);
        if let Some(id) = self.lookup(&normalized) {
            return id;
        }

        let dir = normalized.trim_end_matches('/');
        if let Some(id) = self.lookup(&format!("{dir}/index.html")) {
            return id;
        }
        if let Some(last) = dir.rsplit('/').next().filter(|s| !s.is_empty()) {
            if let Some(id) = self.lookup(&format!("{dir}/{last}.html")) {
                return id;
            }
        }
        0
    }

    fn lookup(&self, normalized: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.relative == normalized)
            .map(|i| i + 1)
    }

    /// Loads a file by id, re-asserting that the path is absolute and a
    /// regular file. `None` covers both a bad id and an unreadable file.
    pub fn read_file(&self, id: usize) -> Option<Vec<u8>> {
        let entry = self.entry(id)?;
        if !(entry.full.is_absolute() && entry.full.is_file()) {
            warn!(path = %entry.full.display(), "indexed file is no longer loadable");
            return None;
        }
        fs::read(&entry.full).ok()
    }

    /// Extension of the file behind `id`, without the dot.
    pub fn extension(&self, id: usize) -> Option<&str> {
        self.entry(id).map(|e| e.extension.as_str())
    }

    /// Number of servable files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no servable files.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, id: usize) -> Option<&FileEntry> {
        if id < 1 {
            return None;
        }
        self.entries.get(id - 1)
    }
}

fn collect_files(root: &Path, dir: &Path, entries: &mut Vec<FileEntry>) -> io::Result<()> {
    for item in fs::read_dir(dir)? {
        let item = item?;
        let path = item.path();
        // Does not follow directory symlinks, so link cycles cannot recurse.
        if item.file_type()?.is_dir() {
            collect_files(root, &path, entries)?;
            continue;
        }
        let Ok(full) = path.canonicalize() else {
            continue;
        };
        if !full.starts_with(root) {
            warn!(path = %path.display(), "path escapes the webroot, not serving it");
            continue;
        }
        let Ok(relative) = full.strip_prefix(root) else {
            continue;
        };
        let relative = format!(
            "/{}",
            relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/")
        );
        let extension = full
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        debug!(relative = %relative, "file allowed under webroot");
        entries.push(FileEntry {
            relative,
            full,
            extension,
        });
    }
    Ok(())
}

/// Normalizes a request URL path for comparison against the allowed list:
/// backslashes become slashes and a leading slash is guaranteed.
fn normalize_url_path(url_path: &str) -> String {
    let cleaned = url_path.replace('\\', "/");
    if cleaned.starts_with('/') {
        cleaned
    } else {
        format!("/{cleaned}")
    }
}

/// `Content-Type` header value for a file extension (without the dot).
/// Text formats carry a UTF-8 charset; unknown extensions default to plain
/// text.
pub fn content_type_for(extension: &str) -> String {
    let (media_type, is_text) = match extension {
        "html" => ("text/html", true),
        "css" => ("text/css", true),
        "js" => ("text/javascript", true),
        "json" => ("application/json", true),
        "csv" => ("text/csv", true),
        "txt" => ("text/plain", true),
        "png" => ("image/png", false),
        "svg" => ("image/svg+xml", false),
        "webp" => ("image/webp", false),
        _ => ("text/plain", true),
    };
    if is_text {
        format!("{media_type}; charset=utf-8")
    } else {
        media_type.to_string()
    }
}
