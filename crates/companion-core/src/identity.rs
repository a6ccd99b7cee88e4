use crate::links::{self, NoteStatus};
use crate::error::StorageResult;
use crate::media::{MediaKind, VaultFile};
use crate::paths;
use crate::settings::{NamingPolicy, Settings};
use crate::vault::Vault;

/// Where the note for a (file, kind, folder) triple belongs. Recomputed on
/// every operation since folder and naming settings may change in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteIdentity {
    pub base_name: String,
    pub note_path: String,
}

pub fn compute_identity(file: &VaultFile, kind: MediaKind, folder: &str, naming: NamingPolicy) -> NoteIdentity {
    let label = kind.label(file);
    let base_name = match naming {
        NamingPolicy::Prefix => format!("{}-{}", label, file.basename),
        NamingPolicy::Suffix => format!("{}.{}", file.basename, label.to_lowercase()),
    };
    let note_path = paths::join(folder, &format!("{}.md", base_name));
    NoteIdentity { base_name, note_path }
}

/// Note folder for `kind`: the configured one, or the file's own folder.
pub fn note_folder(settings: &Settings, file: &VaultFile, kind: MediaKind) -> String {
    let configured = settings.folder_for(kind);
    if configured.is_empty() {
        file.parent.clone()
    } else {
        configured
    }
}

/// Path of an existing note that links to `file`, canonical or copy.
pub fn find_existing_note_path(
    vault: &dyn Vault,
    settings: &Settings,
    file: &VaultFile,
    kind: MediaKind,
) -> StorageResult<Option<String>> {
    let folder = note_folder(settings, file, kind);
    let identity = compute_identity(file, kind, &folder, settings.naming);
    find_matching_note(vault, &settings.link_property, file, &identity, &folder)
}

/// Two-phase search: the canonical path first, then every note in `folder`
/// named `{base}` or `{base} (...)`. Candidates are tried in lexical path
/// order and the first match wins. A vault that cannot be listed is an
/// error, not an empty search.
pub fn find_matching_note(
    vault: &dyn Vault,
    link_property: &str,
    file: &VaultFile,
    identity: &NoteIdentity,
    folder: &str,
) -> StorageResult<Option<String>> {
    if links::note_status(vault, &identity.note_path, &file.path, link_property) == NoteStatus::Matches {
        return Ok(Some(identity.note_path.clone()));
    }
    find_matching_copy(vault, link_property, file, identity, folder)
}

/// Second phase of [`find_matching_note`] alone: a matching note at any
/// path other than the canonical one.
pub fn find_matching_copy(
    vault: &dyn Vault,
    link_property: &str,
    file: &VaultFile,
    identity: &NoteIdentity,
    folder: &str,
) -> StorageResult<Option<String>> {
    Ok(candidate_notes(vault, identity, folder)?
        .into_iter()
        .filter(|path| *path != identity.note_path)
        .find(|path| links::note_status(vault, path, &file.path, link_property) == NoteStatus::Matches))
}

/// Every note that currently links to `file`, canonical first.
pub fn all_matching_notes(
    vault: &dyn Vault,
    link_property: &str,
    file: &VaultFile,
    identity: &NoteIdentity,
    folder: &str,
) -> StorageResult<Vec<String>> {
    let mut found = Vec::new();
    if links::note_status(vault, &identity.note_path, &file.path, link_property) == NoteStatus::Matches {
        found.push(identity.note_path.clone());
    }
    found.extend(
        candidate_notes(vault, identity, folder)?
            .into_iter()
            .filter(|path| *path != identity.note_path)
            .filter(|path| links::note_status(vault, path, &file.path, link_property) == NoteStatus::Matches),
    );
    Ok(found)
}

fn candidate_notes(vault: &dyn Vault, identity: &NoteIdentity, folder: &str) -> StorageResult<Vec<String>> {
    let copy_prefix = format!("{} (", identity.base_name);
    let mut candidates: Vec<String> = vault
        .list_files()?
        .into_iter()
        .filter(|f| f.is_markdown() && paths::same_path(&f.parent, folder))
        .filter(|f| f.basename == identity.base_name || f.basename.starts_with(&copy_prefix))
        .map(|f| f.path)
        .collect();
    candidates.sort();
    Ok(candidates)
}

/// First free `{base} (copy N).md` in `folder`, N starting at 1. Never cached:
/// a concurrent create can take a number between two calls.
pub fn next_copy_path(vault: &dyn Vault, folder: &str, base_name: &str) -> String {
    let mut n: u32 = 1;
    loop {
        let candidate = paths::join(folder, &format!("{} (copy {}).md", base_name, n));
        if !vault.exists(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
