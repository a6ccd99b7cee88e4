use std::fmt;

use serde::{Deserialize, Serialize};

use crate::paths;

/// Snapshot of a file in the vault. Owned by the storage layer; treated as
/// immutable for the duration of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultFile {
    /// Vault-relative path, forward slashes
    pub path: String,
    /// File name without extension
    pub basename: String,
    /// Extension without the dot, as found on disk
    pub extension: String,
    /// Vault-relative parent folder ("" for the vault root)
    pub parent: String,
    /// File size in bytes
    pub size: u64,
}

impl VaultFile {
    pub fn new(path: &str, size: u64) -> Self {
        let path = paths::normalize(path);
        let (basename, extension) = paths::split_name(&paths::file_name(&path));
        Self {
            parent: paths::parent(&path),
            path,
            basename,
            extension,
            size,
        }
    }

    pub fn name(&self) -> String {
        paths::file_name(&self.path)
    }

    pub fn is_markdown(&self) -> bool {
        self.extension.eq_ignore_ascii_case("md")
    }
}

/// What lives at a vault path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEntry {
    File(VaultFile),
    Folder(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Pdf,
    Other,
}

impl MediaKind {
    /// Classification priority order.
    pub const ALL: [MediaKind; 3] = [MediaKind::Image, MediaKind::Pdf, MediaKind::Other];

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Pdf => "pdf",
            MediaKind::Other => "other",
        }
    }

    /// Upper-case label used by the note naming policies. `other` files are
    /// labelled by their own extension.
    pub fn label(self, file: &VaultFile) -> String {
        match self {
            MediaKind::Image => "IMG".to_string(),
            MediaKind::Pdf => "PDF".to_string(),
            MediaKind::Other if file.extension.is_empty() => "FILE".to_string(),
            MediaKind::Other => file.extension.to_uppercase(),
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
