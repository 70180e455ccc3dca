//! Media library: the set of playable files under the media root.
//!
//! Only the configured top-level folders are walked.  Names are `/`-separated
//! paths relative to the root, which is exactly what clients send back in
//! `play` requests.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pilot_proto::config::LibraryConfig;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub struct Library {
    config: LibraryConfig,
    files: Vec<String>,
    index: HashSet<String>,
    etag: String,
}

impl Library {
    pub fn scan(config: LibraryConfig) -> Self {
        let files = scan_files(&config);
        info!(
            "Library: {} files under {}",
            files.len(),
            config.root.display()
        );
        Self::build(config, files)
    }

    /// A library with a fixed file list and no backing directory.
    #[cfg(test)]
    pub fn from_files(files: Vec<String>) -> Self {
        Self::build(LibraryConfig::default(), files)
    }

    fn build(config: LibraryConfig, mut files: Vec<String>) -> Self {
        files.sort();
        files.dedup();
        let etag = etag_of(&files);
        let index = files.iter().cloned().collect();
        Self {
            config,
            files,
            index,
            etag,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains(name)
    }

    /// On-disk location of a library entry.
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.config.root.join(name)
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Quoted entity tag for the current file list.
    pub fn etag(&self) -> &str {
        &self.etag
    }
}

/// Re-walk the media root on the blocking pool; the write lock is only held
/// to swap the new list in.  Returns the new file count.
pub async fn reload(library: &RwLock<Library>) -> usize {
    let config = library.read().await.config.clone();
    let scanned = tokio::task::spawn_blocking({
        let config = config.clone();
        move || scan_files(&config)
    })
    .await;

    let files = match scanned {
        Ok(files) => files,
        Err(e) => {
            warn!("Library: rescan failed: {}", e);
            return library.read().await.files.len();
        }
    };

    let mut library = library.write().await;
    *library = Library::build(config, files);
    info!("Library: reloaded, {} files", library.files.len());
    library.files.len()
}

fn scan_files(config: &LibraryConfig) -> Vec<String> {
    let mut files = Vec::new();
    for folder in &config.folders {
        let top = config.root.join(folder);
        if !top.is_dir() {
            debug!("Library: skipping missing folder {}", top.display());
            continue;
        }
        for entry in WalkDir::new(&top).follow_links(true) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Library: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_video(entry.path(), &config.extensions) {
                continue;
            }
            if let Some(name) = relative_name(&config.root, entry.path()) {
                files.push(name);
            }
        }
    }
    files
}

fn is_video(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel: PathBuf = path.strip_prefix(root).ok()?.to_path_buf();
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

fn etag_of(files: &[String]) -> String {
    let mut hasher = Sha256::new();
    for name in files {
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
    }
    format!("\"{}\"", STANDARD.encode(hasher.finalize()))
}
