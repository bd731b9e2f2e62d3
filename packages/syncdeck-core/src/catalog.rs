//! Media catalog: the playable files under the media root.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::state::Config;

/// Lists media files under a root directory.
#[derive(Debug, Clone)]
pub struct MediaCatalog {
    root: PathBuf,
    extensions: Vec<String>,
}

impl MediaCatalog {
    pub fn new(root: impl Into<PathBuf>, extensions: &[String]) -> Self {
        Self {
            root: root.into(),
            extensions: extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.media_root, &config.media_extensions)
    }

    /// Returns every matching file as a `/`-separated path relative to the
    /// root, sorted. A missing or unreadable root yields an empty list.
    ///
    /// Blocking; call from `spawn_blocking` in async contexts.
    pub fn list(&self) -> Vec<String> {
        if !self.root.is_dir() {
            log::warn!(
                "[Catalog] Media root {} does not exist",
                self.root.display()
            );
            return Vec::new();
        }

        let mut files: Vec<String> = WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::debug!("[Catalog] Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && self.matches(entry.path()))
            .filter_map(|entry| relative_path(&self.root, entry.path()))
            .collect();

        files.sort();
        log::debug!("[Catalog] {} media file(s) found", files.len());
        files
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}
