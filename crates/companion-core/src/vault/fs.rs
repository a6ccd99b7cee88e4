use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use super::{resolve_link, LinkResolver, MetadataCache, Storage};
use crate::error::{StorageError, StorageResult};
use crate::frontmatter::{self, Frontmatter};
use crate::media::{VaultEntry, VaultFile};
use crate::paths;

/// A vault backed by a directory on disk.
///
/// Frontmatter is cached per note on first read and dropped again when this
/// vault writes the note or when [`MetadataCache::invalidate`] is called.
/// Edits made by other programs are not seen until then.
pub struct FsVault {
    root: PathBuf,
    frontmatter: RefCell<HashMap<String, Option<Frontmatter>>>,
}

impl FsVault {
    pub fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root: PathBuf = root.into();
        if !root.is_dir() {
            anyhow::bail!("vault root {} is not a directory", root.display());
        }
        Ok(Self {
            root,
            frontmatter: RefCell::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Vault-relative form of an absolute path under the root.
    pub fn relative(&self, absolute: &Path) -> Option<String> {
        let rel = absolute.strip_prefix(&self.root).ok()?;
        let rel = paths::normalize(&rel.to_string_lossy());
        if rel.is_empty() {
            None
        } else {
            Some(rel)
        }
    }

    /// Absolute path for a vault path. Rejects anything that could escape
    /// the root.
    pub fn absolute(&self, path: &str) -> StorageResult<PathBuf> {
        let rel = paths::normalize(path);
        if rel.is_empty() || rel.split('/').any(|s| s.trim().is_empty()) {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        let rel_path = Path::new(&rel);
        if rel_path.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(rel_path))
    }

    fn create_new(&self, path: &str, bytes: &[u8]) -> StorageResult<()> {
        let abs = self.absolute(path)?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&abs)
            .map_err(|e| match e.kind() {
                // a missing parent folder is a bad target, not a missing file
                std::io::ErrorKind::NotFound => StorageError::InvalidPath(path.to_string()),
                _ => StorageError::from_io(path, e),
            })?;
        fill_new(file, &abs, bytes).map_err(|e| StorageError::from_io(path, e))?;
        self.invalidate(path);
        Ok(())
    }
}

/// Write `bytes` into a file that was just created at `abs`. On failure the
/// file is removed so no truncated note is left behind.
fn fill_new(mut file: impl Write, abs: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Err(e) = file.write_all(bytes).and_then(|_| file.flush()) {
        drop(file);
        let _ = fs::remove_file(abs);
        return Err(e);
    }
    Ok(())
}

impl Storage for FsVault {
    fn list_files(&self) -> StorageResult<Vec<VaultFile>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                StorageError::Io {
                    path,
                    source: e.into(),
                }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(rel) = self.relative(entry.path()) else { continue };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            files.push(VaultFile::new(&rel, size));
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    fn entry_at(&self, path: &str) -> Option<VaultEntry> {
        let abs = self.absolute(path).ok()?;
        let meta = fs::metadata(&abs).ok()?;
        if meta.is_dir() {
            Some(VaultEntry::Folder(paths::normalize(path)))
        } else {
            Some(VaultEntry::File(VaultFile::new(path, meta.len())))
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.absolute(path)
            .ok()
            .and_then(|abs| abs.try_exists().ok())
            .unwrap_or(false)
    }

    fn read_text(&self, path: &str) -> StorageResult<String> {
        let abs = self.absolute(path)?;
        fs::read_to_string(abs).map_err(|e| StorageError::from_io(path, e))
    }

    fn read_binary(&self, path: &str) -> StorageResult<Vec<u8>> {
        let abs = self.absolute(path)?;
        fs::read(abs).map_err(|e| StorageError::from_io(path, e))
    }

    fn create_text(&self, path: &str, content: &str) -> StorageResult<()> {
        self.create_new(path, content.as_bytes())
    }

    fn create_binary(&self, path: &str, bytes: &[u8]) -> StorageResult<()> {
        self.create_new(path, bytes)
    }

    fn modify_text(&self, path: &str, content: &str) -> StorageResult<()> {
        let abs = self.absolute(path)?;
        if !abs.is_file() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        fs::write(&abs, content).map_err(|e| StorageError::from_io(path, e))?;
        self.invalidate(path);
        Ok(())
    }

    fn create_folder(&self, path: &str) -> StorageResult<()> {
        let abs = self.absolute(path)?;
        fs::create_dir(&abs).map_err(|e| StorageError::from_io(path, e))
    }

    fn delete(&self, path: &str) -> StorageResult<()> {
        let abs = self.absolute(path)?;
        let result = if abs.is_dir() {
            fs::remove_dir(&abs)
        } else {
            fs::remove_file(&abs)
        };
        result.map_err(|e| StorageError::from_io(path, e))?;
        self.invalidate(path);
        Ok(())
    }
}

impl MetadataCache for FsVault {
    fn frontmatter(&self, path: &str) -> Option<Frontmatter> {
        let key = paths::normalize(path);
        if let Some(cached) = self.frontmatter.borrow().get(&key) {
            return cached.clone();
        }
        let parsed = self
            .read_text(&key)
            .ok()
            .and_then(|content| frontmatter::parse(&content));
        self.frontmatter.borrow_mut().insert(key, parsed.clone());
        parsed
    }

    fn invalidate(&self, path: &str) {
        self.frontmatter.borrow_mut().remove(&paths::normalize(path));
    }
}

impl LinkResolver for FsVault {
    fn resolve_wiki_link(&self, link: &str, from: &str) -> Option<VaultFile> {
        resolve_link(self, link, from)
    }
}
