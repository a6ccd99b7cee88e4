//! Vault collaborators: file storage, the frontmatter cache and wiki-link
//! resolution.

mod fs;
#[cfg(test)]
pub(crate) mod memory;

pub use fs::FsVault;

use crate::error::StorageResult;
use crate::frontmatter::Frontmatter;
use crate::media::{VaultEntry, VaultFile};
use crate::paths;

/// File storage of a vault. Paths are vault-relative with forward slashes.
pub trait Storage {
    /// Every file in the vault, in lexical path order.
    fn list_files(&self) -> StorageResult<Vec<VaultFile>>;
    fn entry_at(&self, path: &str) -> Option<VaultEntry>;
    /// Live on-disk check; any failure to check counts as absent.
    fn exists(&self, path: &str) -> bool;
    fn read_text(&self, path: &str) -> StorageResult<String>;
    fn read_binary(&self, path: &str) -> StorageResult<Vec<u8>>;
    /// Fails with `Conflict` if anything already occupies `path`.
    fn create_text(&self, path: &str, content: &str) -> StorageResult<()>;
    /// Fails with `Conflict` if anything already occupies `path`.
    fn create_binary(&self, path: &str, bytes: &[u8]) -> StorageResult<()>;
    fn modify_text(&self, path: &str, content: &str) -> StorageResult<()>;
    /// Creates one folder whose parent exists; `Conflict` if it is already there.
    fn create_folder(&self, path: &str) -> StorageResult<()>;
    fn delete(&self, path: &str) -> StorageResult<()>;
}

/// Parsed frontmatter per note. May lag behind what is on disk.
pub trait MetadataCache {
    fn frontmatter(&self, path: &str) -> Option<Frontmatter>;
    fn invalidate(&self, path: &str);
}

pub trait LinkResolver {
    /// Resolve the target of `[[link]]` written in the note at `from`.
    fn resolve_wiki_link(&self, link: &str, from: &str) -> Option<VaultFile>;
}

/// Everything the reconciliation engine needs from its host.
pub trait Vault: Storage + MetadataCache + LinkResolver {}

impl<T: Storage + MetadataCache + LinkResolver> Vault for T {}

/// Shared wiki-link resolution over any storage.
///
/// Order: relative to the note's folder, then from the vault root (each with
/// and without an implied `.md`), then a lookup by file name across the
/// vault, exact before case-insensitive.
pub fn resolve_link(storage: &dyn Storage, link: &str, from: &str) -> Option<VaultFile> {
    let target = link.split(['|', '#']).next().unwrap_or("").trim();
    if target.is_empty() {
        return None;
    }

    let from_folder = paths::parent(from);
    let mut candidates = Vec::new();
    for base in [paths::resolve_relative(&from_folder, target), paths::resolve_relative("", target)]
        .into_iter()
        .flatten()
    {
        let with_md = format!("{}.md", base);
        candidates.push(base);
        candidates.push(with_md);
    }
    for candidate in candidates {
        if let Some(VaultEntry::File(file)) = storage.entry_at(&candidate) {
            return Some(file);
        }
    }

    let name = paths::file_name(target);
    let files = storage.list_files().ok()?;
    let by_name = |exact: bool| {
        files.iter().find(|f| {
            let file_name = f.name();
            let stem_for_md = if f.is_markdown() { Some(f.basename.as_str()) } else { None };
            if exact {
                file_name == name || stem_for_md == Some(name.as_str())
            } else {
                paths::same_path(&file_name, &name)
                    || stem_for_md.is_some_and(|s| paths::same_path(s, &name))
            }
        })
    };
    by_name(true).or_else(|| by_name(false)).cloned()
}
