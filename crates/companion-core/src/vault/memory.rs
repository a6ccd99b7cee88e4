//! In-memory vault for tests. Can serve a stale frontmatter cache, simulate
//! another writer winning a create race and fail chosen operations.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;

use super::{resolve_link, LinkResolver, MetadataCache, Storage};
use crate::error::{StorageError, StorageResult};
use crate::frontmatter::{self, Frontmatter};
use crate::media::{VaultEntry, VaultFile};
use crate::paths;

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Folder,
}

#[derive(Default)]
pub struct MemoryVault {
    nodes: RefCell<BTreeMap<String, Node>>,
    stale: RefCell<HashMap<String, Option<Frontmatter>>>,
    /// path -> content another writer puts there just before our create
    races: RefCell<HashMap<String, String>>,
    folder_races: RefCell<HashSet<String>>,
    rejected: RefCell<HashSet<String>>,
    unlistable: Cell<bool>,
    pub creates: RefCell<Vec<String>>,
    pub modifies: RefCell<Vec<String>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file, creating parent folders.
    pub fn put(&self, path: &str, bytes: impl Into<Vec<u8>>) {
        let path = paths::normalize(path);
        let mut nodes = self.nodes.borrow_mut();
        for folder in paths::ancestors(&paths::parent(&path)) {
            nodes.insert(folder, Node::Folder);
        }
        nodes.insert(path, Node::File(bytes.into()));
    }

    pub fn text(&self, path: &str) -> Option<String> {
        match self.nodes.borrow().get(&paths::normalize(path)) {
            Some(Node::File(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    pub fn markdown_paths(&self) -> Vec<String> {
        self.nodes
            .borrow()
            .iter()
            .filter(|(p, n)| matches!(n, Node::File(_)) && p.ends_with(".md"))
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Pin the cached frontmatter of `path` regardless of its content.
    pub fn set_stale_frontmatter(&self, path: &str, frontmatter: Option<Frontmatter>) {
        self.stale.borrow_mut().insert(paths::normalize(path), frontmatter);
    }

    /// The next create at `path` finds `content` already written there.
    pub fn race_on_create(&self, path: &str, content: &str) {
        self.races
            .borrow_mut()
            .insert(paths::normalize(path), content.to_string());
    }

    /// The next `create_folder` at `path` finds the folder already made.
    pub fn race_on_create_folder(&self, path: &str) {
        self.folder_races.borrow_mut().insert(paths::normalize(path));
    }

    /// Every create at `path` fails with a permission error.
    pub fn reject_create(&self, path: &str) {
        self.rejected.borrow_mut().insert(paths::normalize(path));
    }

    /// Make `list_files` fail, like a walk hitting an unreadable folder.
    pub fn fail_listing(&self) {
        self.unlistable.set(true);
    }

    fn create(&self, path: &str, bytes: &[u8]) -> StorageResult<()> {
        let path = paths::normalize(path);
        if self.rejected.borrow().contains(&path) {
            return Err(StorageError::Io {
                path,
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }
        if let Some(winner) = self.races.borrow_mut().remove(&path) {
            self.put(&path, winner);
            return Err(StorageError::Conflict(path));
        }
        let parent = paths::parent(&path);
        let mut nodes = self.nodes.borrow_mut();
        if nodes.contains_key(&path) {
            return Err(StorageError::Conflict(path));
        }
        if !parent.is_empty() && !matches!(nodes.get(&parent), Some(Node::Folder)) {
            return Err(StorageError::InvalidPath(path));
        }
        nodes.insert(path.clone(), Node::File(bytes.to_vec()));
        self.creates.borrow_mut().push(path);
        Ok(())
    }
}

impl Storage for MemoryVault {
    fn list_files(&self) -> StorageResult<Vec<VaultFile>> {
        if self.unlistable.get() {
            return Err(StorageError::Io {
                path: String::new(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }
        Ok(self
            .nodes
            .borrow()
            .iter()
            .filter_map(|(path, node)| match node {
                Node::File(bytes) => Some(VaultFile::new(path, bytes.len() as u64)),
                Node::Folder => None,
            })
            .collect())
    }

    fn entry_at(&self, path: &str) -> Option<VaultEntry> {
        let path = paths::normalize(path);
        match self.nodes.borrow().get(&path)? {
            Node::File(bytes) => Some(VaultEntry::File(VaultFile::new(&path, bytes.len() as u64))),
            Node::Folder => Some(VaultEntry::Folder(path)),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.nodes.borrow().contains_key(&paths::normalize(path))
    }

    fn read_text(&self, path: &str) -> StorageResult<String> {
        self.text(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn read_binary(&self, path: &str) -> StorageResult<Vec<u8>> {
        match self.nodes.borrow().get(&paths::normalize(path)) {
            Some(Node::File(bytes)) => Ok(bytes.clone()),
            _ => Err(StorageError::NotFound(path.to_string())),
        }
    }

    fn create_text(&self, path: &str, content: &str) -> StorageResult<()> {
        self.create(path, content.as_bytes())
    }

    fn create_binary(&self, path: &str, bytes: &[u8]) -> StorageResult<()> {
        self.create(path, bytes)
    }

    fn modify_text(&self, path: &str, content: &str) -> StorageResult<()> {
        let path = paths::normalize(path);
        let mut nodes = self.nodes.borrow_mut();
        match nodes.get_mut(&path) {
            Some(Node::File(bytes)) => {
                *bytes = content.as_bytes().to_vec();
                self.modifies.borrow_mut().push(path);
                Ok(())
            }
            _ => Err(StorageError::NotFound(path)),
        }
    }

    fn create_folder(&self, path: &str) -> StorageResult<()> {
        let path = paths::normalize(path);
        let mut nodes = self.nodes.borrow_mut();
        if self.folder_races.borrow_mut().remove(&path) {
            nodes.insert(path.clone(), Node::Folder);
            return Err(StorageError::Conflict(path));
        }
        if nodes.contains_key(&path) {
            return Err(StorageError::Conflict(path));
        }
        nodes.insert(path, Node::Folder);
        Ok(())
    }

    fn delete(&self, path: &str) -> StorageResult<()> {
        let path = paths::normalize(path);
        self.nodes
            .borrow_mut()
            .remove(&path)
            .map(|_| ())
            .ok_or(StorageError::NotFound(path))
    }
}

impl MetadataCache for MemoryVault {
    fn frontmatter(&self, path: &str) -> Option<Frontmatter> {
        let path = paths::normalize(path);
        if let Some(pinned) = self.stale.borrow().get(&path) {
            return pinned.clone();
        }
        self.text(&path).and_then(|content| frontmatter::parse(&content))
    }

    fn invalidate(&self, path: &str) {
        self.stale.borrow_mut().remove(&paths::normalize(path));
    }
}

impl LinkResolver for MemoryVault {
    fn resolve_wiki_link(&self, link: &str, from: &str) -> Option<VaultFile> {
        resolve_link(self, link, from)
    }
}
