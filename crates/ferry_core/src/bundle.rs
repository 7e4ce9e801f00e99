//! On-disk layout of a snapshot bundle.
//!
//! ```text
//! <bundle>/
//!   documents/<item path>.<ext>      one snapshot file per document
//!   binaries/<item path>.<ext>       one snapshot file per binary item
//!   _attachments/...                 externalized binary payloads
//!   _stop                            stop signal, checked before each item
//!   _logs/execution.log
//!   _logs/documents-summary.log
//!   _logs/binaries-summary.log
//! ```
//!
//! A bundle is packed into a gzip-compressed tar archive for transport.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Component, Path, PathBuf};

use flate2::Compression;
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use tar::Archive;
use tokio::task::spawn_blocking;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{CoreError, Result};
use crate::model::SnapshotFormat;
use crate::record::{Category, MigrationResult};

pub const ATTACHMENTS_DIR: &str = "_attachments";
pub const STOP_FILE: &str = "_stop";
pub const LOGS_DIR: &str = "_logs";
pub const EXECUTION_LOG: &str = "_logs/execution.log";

/// Bundle-relative path of a category's summary log.
pub fn summary_log(category: Category) -> String {
    format!("{}/{}-summary.log", LOGS_DIR, category)
}

/// Directory holding the snapshot files of a category.
pub fn category_dir(category: Category) -> &'static str {
    category.as_str()
}

/// Bundle-relative snapshot file of the item at `item_path`.
pub fn item_file(category: Category, item_path: &str, format: SnapshotFormat) -> String {
    format!(
        "{}/{}.{}",
        category_dir(category),
        item_path.trim_start_matches('/'),
        format.extension()
    )
}

/// Escape a path segment into a portable file name.
///
/// ASCII letters, digits, `-` and non-leading `.` are kept; every other byte
/// becomes `_XX` (upper-case hex). The mapping is injective, so distinct
/// segments never share a file, and the output never contains `~` or `/`.
pub fn escape_segment(segment: &str) -> String {
    let mut escaped = String::with_capacity(segment.len());
    for (i, c) in segment.char_indices() {
        if c.is_ascii_alphanumeric() || c == '-' || (c == '.' && i > 0) {
            escaped.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                escaped.push_str(&format!("_{:02X}", byte));
            }
        }
    }
    escaped
}

#[derive(Debug, Clone)]
pub struct Bundle {
    root: PathBuf,
}

impl Bundle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the bundle directory if needed.
    pub async fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let bundle = Self::new(root);
        tokio::fs::create_dir_all(&bundle.root)
            .await
            .map_err(|e| CoreError::io(format!("create bundle {}", bundle.root.display()), e))?;
        Ok(bundle)
    }

    /// Open an existing bundle directory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let bundle = Self::new(root);
        let metadata = tokio::fs::metadata(&bundle.root)
            .await
            .map_err(|e| CoreError::bundle(bundle.root.display().to_string(), e.to_string()))?;
        if !metadata.is_dir() {
            return Err(CoreError::bundle(
                bundle.root.display().to_string(),
                "not a directory",
            ));
        }
        Ok(bundle)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a bundle-relative path, refusing anything that escapes the bundle.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let relative_path = Path::new(relative);
        let escapes = relative_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.is_empty() || escapes {
            return Err(CoreError::bundle(
                relative,
                "path must be relative and stay inside the bundle",
            ));
        }
        Ok(self.root.join(relative_path))
    }

    pub async fn write_file(&self, relative: &str, contents: &[u8]) -> Result<()> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::io(format!("create {}", parent.display()), e))?;
        }
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| CoreError::io(format!("write {}", path.display()), e))
    }

    pub async fn read_file(&self, relative: &str) -> Result<Vec<u8>> {
        let path = self.resolve(relative)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| CoreError::io(format!("read {}", path.display()), e))
    }

    pub async fn read_to_string(&self, relative: &str) -> Result<String> {
        let path = self.resolve(relative)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CoreError::io(format!("read {}", path.display()), e))
    }

    // ========== Stop signal ==========

    pub async fn stop_requested(&self) -> bool {
        tokio::fs::try_exists(self.root.join(STOP_FILE))
            .await
            .unwrap_or(false)
    }

    pub async fn request_stop(&self) -> Result<()> {
        self.write_file(STOP_FILE, b"").await
    }

    pub async fn clear_stop(&self) -> Result<()> {
        match tokio::fs::remove_file(self.root.join(STOP_FILE)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::io("remove stop signal", e)),
        }
    }

    // ========== Discovery ==========

    /// Snapshot files of a category, as bundle-relative paths sorted by path.
    ///
    /// Files whose extension is not a known snapshot format are ignored.
    pub fn discover(&self, category: Category) -> Result<Vec<String>> {
        let dir = self.root.join(category_dir(category));
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).follow_links(false) {
            let entry =
                entry.map_err(|e| CoreError::bundle(dir.display().to_string(), e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let known = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .and_then(SnapshotFormat::from_extension)
                .is_some();
            if !known {
                debug!("Ignoring {}", entry.path().display());
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| CoreError::bundle(entry.path().display().to_string(), e.to_string()))?;
            files.push(relative_to_string(relative));
        }
        files.sort();
        Ok(files)
    }

    // ========== Logs ==========

    /// Write the execution log and one summary per category.
    pub async fn write_logs(&self, execution_log: &str, result: &MigrationResult) -> Result<()> {
        self.write_file(EXECUTION_LOG, execution_log.as_bytes())
            .await?;
        for category in Category::ALL {
            let summary = result.summary(category)?;
            self.write_file(&summary_log(category), summary.as_bytes())
                .await?;
        }
        Ok(())
    }

    // ========== Archives ==========

    /// Pack the bundle into a `.tar.gz` archive at `archive`.
    pub async fn pack(&self, archive: impl Into<PathBuf>) -> Result<PathBuf> {
        let root = self.root.clone();
        let archive = archive.into();
        spawn_blocking(move || pack_dir(&root, &archive).map(|()| archive))
            .await
            .map_err(|e| CoreError::bundle("archive", e.to_string()))?
    }

    /// Unpack a `.tar.gz` archive into `dest` and open it as a bundle.
    pub async fn unpack(archive: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Result<Self> {
        let archive = archive.into();
        let dest = dest.into();
        let target = dest.clone();
        spawn_blocking(move || unpack_archive(&archive, &target))
            .await
            .map_err(|e| CoreError::bundle("archive", e.to_string()))??;
        Self::open(dest).await
    }
}

fn relative_to_string(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

// Runs inside `spawn_blocking`.
fn pack_dir(root: &Path, archive: &Path) -> Result<()> {
    if let Some(parent) = archive.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CoreError::io(format!("create {}", parent.display()), e))?;
    }
    let file = File::create(archive)
        .map_err(|e| CoreError::io(format!("create {}", archive.display()), e))?;
    let mut tar = tar::Builder::new(GzEncoder::new(BufWriter::new(file), Compression::default()));
    tar.append_dir_all(".", root)
        .map_err(|e| CoreError::bundle(root.display().to_string(), e.to_string()))?;
    let encoder = tar
        .into_inner()
        .map_err(|e| CoreError::io("finish archive", e))?;
    encoder
        .finish()
        .map_err(|e| CoreError::io("finish archive", e))?;
    info!("Packed bundle {} into {}", root.display(), archive.display());
    Ok(())
}

// Runs inside `spawn_blocking`.
fn unpack_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)
        .map_err(|e| CoreError::bundle(archive.display().to_string(), e.to_string()))?;
    std::fs::create_dir_all(dest)
        .map_err(|e| CoreError::io(format!("create {}", dest.display()), e))?;
    let mut tar = Archive::new(GzDecoder::new(BufReader::new(file)));
    tar.unpack(dest)
        .map_err(|e| CoreError::bundle(archive.display().to_string(), e.to_string()))?;
    info!("Unpacked {} into {}", archive.display(), dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordContext, ResultBuilder};

    #[test]
    fn test_item_file_mirrors_location() {
        assert_eq!(
            item_file(
                Category::Documents,
                "/content/documents/news/launch",
                SnapshotFormat::Xml
            ),
            "documents/content/documents/news/launch.xml"
        );
        assert_eq!(summary_log(Category::Binaries), "_logs/binaries-summary.log");
        assert_eq!(escape_segment("site:body[2]"), "site_3Abody_5B2_5D");
        assert_eq!(escape_segment("a..b.bin"), "a..b.bin");
        assert_eq!(escape_segment(".."), "_2E.");
        assert_ne!(escape_segment("ferry:data"), escape_segment("ferry_data"));
        assert_ne!(escape_segment("block[2]"), escape_segment("block_2_"));
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let bundle = Bundle::new("/tmp/b");
        assert!(bundle.resolve("../x").is_err());
        assert!(bundle.resolve("/etc/passwd").is_err());
        assert!(bundle.resolve("").is_err());
        assert_eq!(
            bundle.resolve("documents/a.json").unwrap(),
            PathBuf::from("/tmp/b/documents/a.json")
        );
    }

    #[tokio::test]
    async fn test_discover_sorts_and_skips_unknown_files() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = Bundle::create(dir.path()).await.unwrap();
        bundle.write_file("documents/b.json", b"{}").await.unwrap();
        bundle.write_file("documents/a/z.xml", b"<x/>").await.unwrap();
        bundle.write_file("documents/notes.txt", b"").await.unwrap();
        bundle.write_file("binaries/logo.json", b"{}").await.unwrap();

        assert_eq!(
            bundle.discover(Category::Documents).unwrap(),
            vec!["documents/a/z.xml", "documents/b.json"]
        );
        assert_eq!(
            bundle.discover(Category::Binaries).unwrap(),
            vec!["binaries/logo.json"]
        );
    }

    #[tokio::test]
    async fn test_stop_signal() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = Bundle::create(dir.path()).await.unwrap();
        assert!(!bundle.stop_requested().await);
        bundle.request_stop().await.unwrap();
        assert!(bundle.stop_requested().await);
        bundle.clear_stop().await.unwrap();
        bundle.clear_stop().await.unwrap();
        assert!(!bundle.stop_requested().await);
    }

    #[tokio::test]
    async fn test_pack_and_unpack() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = Bundle::create(dir.path().join("bundle")).await.unwrap();
        bundle
            .write_file("documents/content/a.json", b"{\"name\":\"a\"}")
            .await
            .unwrap();
        let mut builder = ResultBuilder::new();
        builder.push(RecordContext::begin(Category::Documents, "/content/a").succeed());
        bundle.write_logs("run started\n", &builder.finish()).await.unwrap();

        let archive = bundle.pack(dir.path().join("out/bundle.tar.gz")).await.unwrap();
        let restored = Bundle::unpack(&archive, dir.path().join("restored"))
            .await
            .unwrap();
        assert_eq!(
            restored.read_file("documents/content/a.json").await.unwrap(),
            b"{\"name\":\"a\"}"
        );
        let summary = restored
            .read_to_string(&summary_log(Category::Documents))
            .await
            .unwrap();
        assert!(summary.contains("Total:     1"));
    }

    #[tokio::test]
    async fn test_open_missing_bundle_is_bundle_error() {
        let err = Bundle::open("/definitely/not/here").await.unwrap_err();
        assert!(err.is_run_scoped());
    }
}
