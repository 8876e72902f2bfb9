//! File storage service: uploads, downloads, listing, hybrid memory layer.
//!
//! Files live under `files/{environment}/…`. When the memory layer is
//! enabled, uploads buffer in memory marked dirty and reach disk on the
//! periodic flush tick or when the memory budget forces eviction (oldest
//! access first, dirty entries flushed before they leave). The service
//! mutex guards only the in-memory maps; disk traffic runs outside it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::error::{FileError, FileResult};
use crate::id::{self, FileRef};

/// Tuning knobs for the file engine.
#[derive(Debug, Clone)]
pub struct FileServiceOptions {
    /// Storage root; environment directories live directly under it.
    pub root: PathBuf,
    /// Upload size ceiling in bytes.
    pub max_file_size_bytes: u64,
    /// Whether the hybrid memory layer is enabled.
    pub memory_cache_enabled: bool,
    /// Total memory budget in bytes.
    pub max_total_memory_bytes: u64,
    /// Extensions rejected on upload (lowercase, with dot).
    pub blocked_extensions: Vec<String>,
}

/// Descriptor of one stored file.
#[derive(Debug, Clone, Serialize)]
pub struct FileMetadata {
    /// Opaque identifier handed to callers.
    #[serde(rename = "fileId")]
    pub file_id: String,
    /// Path relative to the environment directory.
    #[serde(rename = "relativePath")]
    pub relative_path: String,
    /// Guessed or declared content type.
    #[serde(rename = "contentType")]
    pub content_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification instant.
    #[serde(rename = "lastModifiedUtc")]
    pub last_modified_utc: DateTime<Utc>,
    /// Whether the newest bytes exist only in memory.
    #[serde(rename = "inMemoryOnly")]
    pub in_memory_only: bool,
}

struct MemoryEntry {
    content: Bytes,
    dirty: bool,
    last_access: Instant,
    environment: String,
    relative_path: String,
}

#[derive(Default)]
struct ServiceState {
    memory: HashMap<String, MemoryEntry>,
    memory_bytes: u64,
    index: HashMap<String, HashMap<String, FileMetadata>>,
}

struct FlushItem {
    file_id: String,
    environment: String,
    relative_path: String,
    content: Bytes,
}

/// Per-environment file storage with a hybrid memory layer.
pub struct FileService {
    options: FileServiceOptions,
    state: Mutex<ServiceState>,
}

impl FileService {
    /// Service over the configured storage root.
    #[must_use]
    pub fn new(options: FileServiceOptions) -> Self {
        Self {
            options,
            state: Mutex::new(ServiceState::default()),
        }
    }

    /// Store an upload and return its file id.
    ///
    /// # Errors
    ///
    /// Returns size, extension, existence, and path-safety violations, plus
    /// IO failures when the memory layer is disabled.
    pub async fn upload(
        &self,
        environment: &str,
        file_name: &str,
        content: Bytes,
        overwrite: bool,
        endpoint_extensions: &[String],
    ) -> FileResult<FileMetadata> {
        let size = content.len() as u64;
        if size > self.options.max_file_size_bytes {
            return Err(FileError::FileTooLarge {
                size,
                max: self.options.max_file_size_bytes,
            });
        }

        let sanitized = sanitize_file_name(file_name)?;
        self.check_extension(&sanitized, endpoint_extensions)?;

        let file_id = id::encode(environment, &sanitized);
        let disk_path = self.relative_disk_path(environment, &sanitized);

        let in_memory = self
            .lock_state()
            .memory
            .contains_key(&file_id);
        let on_disk = tokio::fs::try_exists(&disk_path)
            .await
            .unwrap_or(false);
        if (in_memory || on_disk) && !overwrite {
            return Err(FileError::FileExists { path: sanitized });
        }

        let metadata = FileMetadata {
            file_id: file_id.clone(),
            relative_path: sanitized.clone(),
            content_type: guess_content_type(&sanitized),
            size,
            last_modified_utc: Utc::now(),
            in_memory_only: self.options.memory_cache_enabled,
        };

        if self.options.memory_cache_enabled {
            let flush_items = {
                let mut state = self.lock_state();
                let victims = Self::make_room(&mut state, size, self.options.max_total_memory_bytes);
                Self::insert_memory(
                    &mut state,
                    &file_id,
                    environment,
                    &sanitized,
                    content,
                    true,
                );
                Self::index_insert(&mut state, environment, metadata.clone());
                victims
            };
            self.write_flush_items(flush_items).await;
        } else {
            self.write_disk(&disk_path, &content).await?;
            let mut state = self.lock_state();
            Self::index_insert(&mut state, environment, metadata.clone());
        }

        debug!(environment, file = %sanitized, size, "file stored");
        Ok(metadata)
    }

    /// Register a file by absolute path under the storage root.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::PathEscape`] for paths outside the root and IO
    /// failures from the write.
    pub async fn upload_absolute(
        &self,
        environment: &str,
        absolute_path: &Path,
        content: Bytes,
        overwrite: bool,
    ) -> FileResult<String> {
        if !absolute_path.starts_with(&self.options.root) {
            return Err(FileError::PathEscape {
                path: absolute_path.display().to_string(),
            });
        }
        let size = content.len() as u64;
        if size > self.options.max_file_size_bytes {
            return Err(FileError::FileTooLarge {
                size,
                max: self.options.max_file_size_bytes,
            });
        }
        if !overwrite
            && tokio::fs::try_exists(absolute_path).await.unwrap_or(false)
        {
            return Err(FileError::FileExists {
                path: absolute_path.display().to_string(),
            });
        }
        self.write_disk(absolute_path, &content).await?;
        Ok(id::encode_absolute(
            environment,
            &absolute_path.display().to_string(),
        ))
    }

    /// Fetch a file's bytes and metadata.
    ///
    /// Memory hits return a fresh copy; disk reads populate the memory layer
    /// (marked clean) when enabled and under the size cap.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::FileNotFound`] for unknown ids and IO failures
    /// from the disk read.
    pub async fn download(
        &self,
        environment: &str,
        file_id: &str,
    ) -> FileResult<(FileMetadata, Bytes)> {
        let reference = self.resolve_reference(environment, file_id)?;

        if let Some((content, dirty)) = self.memory_hit(file_id) {
            let metadata = FileMetadata {
                file_id: file_id.to_string(),
                relative_path: reference.path.clone(),
                content_type: guess_content_type(&reference.path),
                size: content.len() as u64,
                last_modified_utc: Utc::now(),
                in_memory_only: dirty,
            };
            return Ok((metadata, content));
        }

        let disk_path = if reference.absolute {
            PathBuf::from(&reference.path)
        } else {
            self.relative_disk_path(environment, &reference.path)
        };
        if reference.absolute && !disk_path.starts_with(&self.options.root) {
            return Err(FileError::PathEscape {
                path: reference.path.clone(),
            });
        }

        let content = match tokio::fs::read(&disk_path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileError::FileNotFound {
                    file_id: file_id.to_string(),
                });
            }
            Err(source) => {
                return Err(FileError::Io {
                    operation: "files.read",
                    source,
                });
            }
        };

        let modified = tokio::fs::metadata(&disk_path)
            .await
            .ok()
            .and_then(|metadata| metadata.modified().ok())
            .map_or_else(Utc::now, DateTime::<Utc>::from);

        if self.options.memory_cache_enabled
            && !reference.absolute
            && content.len() as u64 <= self.options.max_file_size_bytes
        {
            let flush_items = {
                let mut state = self.lock_state();
                let victims = Self::make_room(
                    &mut state,
                    content.len() as u64,
                    self.options.max_total_memory_bytes,
                );
                Self::insert_memory(
                    &mut state,
                    file_id,
                    environment,
                    &reference.path,
                    content.clone(),
                    false,
                );
                victims
            };
            self.write_flush_items(flush_items).await;
        }

        let metadata = FileMetadata {
            file_id: file_id.to_string(),
            relative_path: reference.path.clone(),
            content_type: guess_content_type(&reference.path),
            size: content.len() as u64,
            last_modified_utc: modified,
            in_memory_only: false,
        };
        Ok((metadata, content))
    }

    /// Remove a file from memory, disk, and the index.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::FileNotFound`] when nothing existed under the id.
    pub async fn delete(&self, environment: &str, file_id: &str) -> FileResult<()> {
        let reference = self.resolve_reference(environment, file_id)?;
        let disk_path = if reference.absolute {
            PathBuf::from(&reference.path)
        } else {
            self.relative_disk_path(environment, &reference.path)
        };

        let had_memory = {
            let mut state = self.lock_state();
            let removed = state.memory.remove(file_id);
            if let Some(entry) = &removed {
                state.memory_bytes = state.memory_bytes.saturating_sub(entry.content.len() as u64);
            }
            Self::index_remove(&mut state, environment, file_id);
            removed.is_some()
        };

        let had_disk = match tokio::fs::remove_file(&disk_path).await {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(source) => {
                return Err(FileError::Io {
                    operation: "files.delete",
                    source,
                });
            }
        };

        if had_memory || had_disk {
            debug!(environment, file_id, "file deleted");
            Ok(())
        } else {
            Err(FileError::FileNotFound {
                file_id: file_id.to_string(),
            })
        }
    }

    /// List indexed files, optionally filtered by a prefix matching either
    /// the relative path or the base name.
    #[must_use]
    pub fn list(&self, environment: &str, prefix: Option<&str>) -> Vec<FileMetadata> {
        let state = self.lock_state();
        let mut entries: Vec<FileMetadata> = state
            .index
            .get(&environment.to_ascii_lowercase())
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default();
        if let Some(prefix) = prefix {
            entries.retain(|entry| {
                entry.relative_path.starts_with(prefix)
                    || entry
                        .relative_path
                        .rsplit('/')
                        .next()
                        .is_some_and(|base| base.starts_with(prefix))
            });
        }
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        entries
    }

    /// Rebuild an environment's index from the filesystem, preserving
    /// entries that exist only in memory.
    pub fn rebuild_index(&self, environment: &str) {
        let dir = self.options.root.join(environment);
        let mut discovered = HashMap::new();
        for entry in WalkDir::new(&dir).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&dir) else {
                continue;
            };
            let relative_path = relative.to_string_lossy().replace('\\', "/");
            let file_id = id::encode(environment, &relative_path);
            let metadata = entry.metadata().ok();
            discovered.insert(
                file_id.clone(),
                FileMetadata {
                    file_id,
                    relative_path: relative_path.clone(),
                    content_type: guess_content_type(&relative_path),
                    size: metadata.as_ref().map_or(0, std::fs::Metadata::len),
                    last_modified_utc: metadata
                        .and_then(|meta| meta.modified().ok())
                        .map_or_else(Utc::now, DateTime::<Utc>::from),
                    in_memory_only: false,
                },
            );
        }

        let mut state = self.lock_state();
        let key = environment.to_ascii_lowercase();
        if let Some(existing) = state.index.get(&key) {
            for (file_id, metadata) in existing {
                if metadata.in_memory_only && !discovered.contains_key(file_id) {
                    discovered.insert(file_id.clone(), metadata.clone());
                }
            }
        }
        state.index.insert(key, discovered);
        debug!(environment, "file index rebuilt");
    }

    /// Write every dirty memory entry to disk and mark it clean.
    pub async fn flush_dirty(&self) {
        let items: Vec<FlushItem> = {
            let state = self.lock_state();
            state
                .memory
                .iter()
                .filter(|(_, entry)| entry.dirty)
                .map(|(file_id, entry)| FlushItem {
                    file_id: file_id.clone(),
                    environment: entry.environment.clone(),
                    relative_path: entry.relative_path.clone(),
                    content: entry.content.clone(),
                })
                .collect()
        };
        if items.is_empty() {
            return;
        }

        let mut flushed = Vec::with_capacity(items.len());
        for item in items {
            let path = self.relative_disk_path(&item.environment, &item.relative_path);
            match self.write_disk(&path, &item.content).await {
                Ok(()) => flushed.push((item.file_id, item.environment)),
                Err(err) => {
                    error!(error = %err, file = %item.relative_path, "dirty flush failed");
                }
            }
        }

        let mut state = self.lock_state();
        for (file_id, environment) in flushed {
            if let Some(entry) = state.memory.get_mut(&file_id) {
                entry.dirty = false;
            }
            let key = environment.to_ascii_lowercase();
            if let Some(metadata) = state
                .index
                .get_mut(&key)
                .and_then(|members| members.get_mut(&file_id))
            {
                metadata.in_memory_only = false;
            }
        }
    }

    /// Current memory layer usage in bytes.
    #[must_use]
    pub fn memory_usage_bytes(&self) -> u64 {
        self.lock_state().memory_bytes
    }

    fn resolve_reference(&self, environment: &str, file_id: &str) -> FileResult<FileRef> {
        let reference = id::decode(file_id)?;
        if !reference.environment.eq_ignore_ascii_case(environment) {
            // A file id never spans environments.
            return Err(FileError::FileNotFound {
                file_id: file_id.to_string(),
            });
        }
        if reference.path.contains("..") {
            return Err(FileError::PathEscape {
                path: reference.path,
            });
        }
        Ok(reference)
    }

    fn memory_hit(&self, file_id: &str) -> Option<(Bytes, bool)> {
        let mut state = self.lock_state();
        let entry = state.memory.get_mut(file_id)?;
        entry.last_access = Instant::now();
        Some((entry.content.clone(), entry.dirty))
    }

    fn check_extension(&self, file_name: &str, endpoint_extensions: &[String]) -> FileResult<()> {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| format!(".{}", ext.to_ascii_lowercase()))
            .unwrap_or_default();
        if self
            .options
            .blocked_extensions
            .iter()
            .any(|blocked| blocked.eq_ignore_ascii_case(&extension))
        {
            return Err(FileError::ExtensionDenied { extension });
        }
        if !endpoint_extensions.is_empty()
            && !endpoint_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
        {
            return Err(FileError::ExtensionDenied { extension });
        }
        Ok(())
    }

    fn relative_disk_path(&self, environment: &str, relative_path: &str) -> PathBuf {
        self.options.root.join(environment).join(relative_path)
    }

    async fn write_disk(&self, path: &Path, content: &Bytes) -> FileResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| FileError::Io {
                    operation: "files.create_dirs",
                    source,
                })?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|source| FileError::Io {
                operation: "files.write",
                source,
            })
    }

    async fn write_flush_items(&self, items: Vec<FlushItem>) {
        for item in items {
            let path = self.relative_disk_path(&item.environment, &item.relative_path);
            if let Err(err) = self.write_disk(&path, &item.content).await {
                error!(error = %err, file = %item.relative_path, "eviction flush failed");
                continue;
            }
            let mut state = self.lock_state();
            let key = item.environment.to_ascii_lowercase();
            if let Some(metadata) = state
                .index
                .get_mut(&key)
                .and_then(|members| members.get_mut(&item.file_id))
            {
                metadata.in_memory_only = false;
            }
        }
    }

    /// Select eviction victims so `incoming` bytes fit within `budget`.
    /// Victims leave the memory map immediately; dirty ones are returned for
    /// the caller to flush outside the lock.
    fn make_room(state: &mut ServiceState, incoming: u64, budget: u64) -> Vec<FlushItem> {
        let mut victims = Vec::new();
        while state.memory_bytes + incoming > budget && !state.memory.is_empty() {
            let Some(oldest) = state
                .memory
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(file_id, _)| file_id.clone())
            else {
                break;
            };
            let Some(entry) = state.memory.remove(&oldest) else {
                break;
            };
            state.memory_bytes = state.memory_bytes.saturating_sub(entry.content.len() as u64);
            if entry.dirty {
                victims.push(FlushItem {
                    file_id: oldest,
                    environment: entry.environment,
                    relative_path: entry.relative_path,
                    content: entry.content,
                });
            }
        }
        if !victims.is_empty() {
            warn!(count = victims.len(), "memory budget forced dirty evictions");
        }
        victims
    }

    fn insert_memory(
        state: &mut ServiceState,
        file_id: &str,
        environment: &str,
        relative_path: &str,
        content: Bytes,
        dirty: bool,
    ) {
        if let Some(previous) = state.memory.remove(file_id) {
            state.memory_bytes = state
                .memory_bytes
                .saturating_sub(previous.content.len() as u64);
        }
        state.memory_bytes += content.len() as u64;
        state.memory.insert(
            file_id.to_string(),
            MemoryEntry {
                content,
                dirty,
                last_access: Instant::now(),
                environment: environment.to_string(),
                relative_path: relative_path.to_string(),
            },
        );
    }

    fn index_insert(state: &mut ServiceState, environment: &str, metadata: FileMetadata) {
        state
            .index
            .entry(environment.to_ascii_lowercase())
            .or_default()
            .insert(metadata.file_id.clone(), metadata);
    }

    fn index_remove(state: &mut ServiceState, environment: &str, file_id: &str) {
        if let Some(members) = state.index.get_mut(&environment.to_ascii_lowercase()) {
            members.remove(file_id);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(|err| {
            panic!("failed to lock file service state: {err}");
        })
    }
}

fn guess_content_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn sanitize_file_name(raw: &str) -> FileResult<String> {
    let normalized = raw.replace('\\', "/");
    let base = normalized.rsplit('/').next().unwrap_or_default();
    if base.is_empty() || base == "." || base == ".." {
        return Err(FileError::PathEscape {
            path: raw.to_string(),
        });
    }
    let cleaned: String = base
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, '.' | '-' | '_' | ' ') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() || cleaned.chars().all(|ch| ch == '.') {
        return Err(FileError::PathEscape {
            path: raw.to_string(),
        });
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(root: &Path, memory: bool) -> FileServiceOptions {
        FileServiceOptions {
            root: root.to_path_buf(),
            max_file_size_bytes: 1024 * 1024,
            memory_cache_enabled: memory,
            max_total_memory_bytes: 1024 * 1024,
            blocked_extensions: vec![".exe".to_string(), ".sh".to_string()],
        }
    }

    #[tokio::test]
    async fn upload_download_round_trip_preserves_bytes_and_type() {
        let dir = TempDir::new().expect("tempdir");
        let service = FileService::new(options(dir.path(), true));
        let payload = Bytes::from(vec![7u8; 128 * 1024]);

        let metadata = service
            .upload("prod", "report.pdf", payload.clone(), false, &[])
            .await
            .expect("upload");
        assert_eq!(metadata.content_type, "application/pdf");
        assert_eq!(metadata.size, payload.len() as u64);

        let (downloaded, bytes) = service
            .download("prod", &metadata.file_id)
            .await
            .expect("download");
        assert_eq!(bytes, payload);
        assert_eq!(downloaded.content_type, "application/pdf");
    }

    #[tokio::test]
    async fn dirty_files_reach_disk_on_flush() {
        let dir = TempDir::new().expect("tempdir");
        let service = FileService::new(options(dir.path(), true));
        let metadata = service
            .upload("prod", "notes.txt", Bytes::from_static(b"hello"), false, &[])
            .await
            .expect("upload");
        assert!(metadata.in_memory_only);

        let disk_path = dir.path().join("prod").join("notes.txt");
        assert!(!disk_path.exists());

        service.flush_dirty().await;
        assert_eq!(std::fs::read(&disk_path).expect("disk"), b"hello");

        let listed = service.list("prod", None);
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].in_memory_only);
    }

    #[tokio::test]
    async fn blocked_and_disallowed_extensions_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let service = FileService::new(options(dir.path(), true));

        let blocked = service
            .upload("prod", "tool.exe", Bytes::from_static(b"MZ"), false, &[])
            .await
            .expect_err("blocked");
        assert!(matches!(blocked, FileError::ExtensionDenied { .. }));

        let outside_allow_list = service
            .upload(
                "prod",
                "data.csv",
                Bytes::from_static(b"a,b"),
                false,
                &[".pdf".to_string()],
            )
            .await
            .expect_err("not allowed");
        assert!(matches!(outside_allow_list, FileError::ExtensionDenied { .. }));
    }

    #[tokio::test]
    async fn oversized_uploads_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let mut opts = options(dir.path(), true);
        opts.max_file_size_bytes = 16;
        let service = FileService::new(opts);
        let err = service
            .upload("prod", "big.bin", Bytes::from(vec![0u8; 17]), false, &[])
            .await
            .expect_err("too large");
        assert!(matches!(err, FileError::FileTooLarge { size: 17, max: 16 }));
    }

    #[tokio::test]
    async fn duplicate_upload_requires_overwrite() {
        let dir = TempDir::new().expect("tempdir");
        let service = FileService::new(options(dir.path(), true));
        service
            .upload("prod", "doc.txt", Bytes::from_static(b"one"), false, &[])
            .await
            .expect("first");
        let err = service
            .upload("prod", "doc.txt", Bytes::from_static(b"two"), false, &[])
            .await
            .expect_err("duplicate");
        assert!(matches!(err, FileError::FileExists { .. }));

        let metadata = service
            .upload("prod", "doc.txt", Bytes::from_static(b"two"), true, &[])
            .await
            .expect("overwrite");
        let (_, bytes) = service
            .download("prod", &metadata.file_id)
            .await
            .expect("download");
        assert_eq!(bytes, Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn traversal_names_are_stripped_or_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let service = FileService::new(options(dir.path(), true));

        // Directory components are stripped to the base name.
        let metadata = service
            .upload("prod", "../../etc/passwd.txt", Bytes::from_static(b"x"), false, &[])
            .await
            .expect("sanitized");
        assert_eq!(metadata.relative_path, "passwd.txt");

        let err = service
            .upload("prod", "..", Bytes::from_static(b"x"), false, &[])
            .await
            .expect_err("bare traversal");
        assert!(matches!(err, FileError::PathEscape { .. }));
    }

    #[tokio::test]
    async fn eviction_moves_oldest_files_to_disk_within_budget() {
        let dir = TempDir::new().expect("tempdir");
        let mut opts = options(dir.path(), true);
        opts.max_total_memory_bytes = 200;
        let service = FileService::new(opts);

        service
            .upload("prod", "a.txt", Bytes::from(vec![b'a'; 120]), false, &[])
            .await
            .expect("a");
        service
            .upload("prod", "b.txt", Bytes::from(vec![b'b'; 120]), false, &[])
            .await
            .expect("b");

        assert!(service.memory_usage_bytes() <= 200);
        // The evicted dirty file must have been flushed, not lost.
        let a_path = dir.path().join("prod").join("a.txt");
        assert_eq!(std::fs::read(&a_path).expect("flushed").len(), 120);

        let a_id = id::encode("prod", "a.txt");
        let (_, bytes) = service.download("prod", &a_id).await.expect("from disk");
        assert_eq!(bytes.len(), 120);
    }

    #[tokio::test]
    async fn delete_removes_every_layer() {
        let dir = TempDir::new().expect("tempdir");
        let service = FileService::new(options(dir.path(), true));
        let metadata = service
            .upload("prod", "gone.txt", Bytes::from_static(b"x"), false, &[])
            .await
            .expect("upload");
        service.flush_dirty().await;

        service
            .delete("prod", &metadata.file_id)
            .await
            .expect("delete");
        assert!(matches!(
            service.download("prod", &metadata.file_id).await,
            Err(FileError::FileNotFound { .. })
        ));
        assert!(service.list("prod", None).is_empty());
        assert!(matches!(
            service.delete("prod", &metadata.file_id).await,
            Err(FileError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn ids_are_bound_to_their_environment() {
        let dir = TempDir::new().expect("tempdir");
        let service = FileService::new(options(dir.path(), true));
        let metadata = service
            .upload("prod", "doc.txt", Bytes::from_static(b"x"), false, &[])
            .await
            .expect("upload");
        let err = service
            .download("dev", &metadata.file_id)
            .await
            .expect_err("wrong environment");
        assert!(matches!(err, FileError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn list_filters_on_path_or_basename_prefix() {
        let dir = TempDir::new().expect("tempdir");
        let service = FileService::new(options(dir.path(), true));
        for name in ["report-q1.pdf", "report-q2.pdf", "summary.txt"] {
            service
                .upload("prod", name, Bytes::from_static(b"x"), false, &[])
                .await
                .expect("upload");
        }
        assert_eq!(service.list("prod", Some("report-")).len(), 2);
        assert_eq!(service.list("prod", Some("summary")).len(), 1);
        assert_eq!(service.list("prod", None).len(), 3);
    }

    #[tokio::test]
    async fn index_rebuild_reconciles_disk_and_memory() {
        let dir = TempDir::new().expect("tempdir");
        let service = FileService::new(options(dir.path(), true));

        // One file only on disk, placed behind the service's back.
        let env_dir = dir.path().join("prod");
        std::fs::create_dir_all(&env_dir).expect("dir");
        std::fs::write(env_dir.join("orphan.txt"), b"disk").expect("write");

        // One file only in memory.
        service
            .upload("prod", "fresh.txt", Bytes::from_static(b"mem"), false, &[])
            .await
            .expect("upload");

        service.rebuild_index("prod");
        let listed = service.list("prod", None);
        let names: Vec<&str> = listed
            .iter()
            .map(|entry| entry.relative_path.as_str())
            .collect();
        assert!(names.contains(&"orphan.txt"));
        assert!(names.contains(&"fresh.txt"));
    }

    #[tokio::test]
    async fn absolute_uploads_stay_under_the_root() {
        let dir = TempDir::new().expect("tempdir");
        let service = FileService::new(options(dir.path(), true));

        let inside = dir.path().join("prod").join("abs").join("shared.bin");
        let file_id = service
            .upload_absolute("prod", &inside, Bytes::from_static(b"abs"), false)
            .await
            .expect("absolute upload");
        let (_, bytes) = service.download("prod", &file_id).await.expect("download");
        assert_eq!(bytes, Bytes::from_static(b"abs"));

        let err = service
            .upload_absolute(
                "prod",
                Path::new("/tmp/outside.bin"),
                Bytes::from_static(b"x"),
                false,
            )
            .await
            .expect_err("outside root");
        assert!(matches!(err, FileError::PathEscape { .. }));
    }
}
