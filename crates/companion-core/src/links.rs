use std::sync::LazyLock;

use regex::Regex;

use crate::frontmatter;
use crate::media::{VaultEntry, VaultFile};
use crate::paths;
use crate::vault::Vault;

static WIKILINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\[([^\[\]]+)\]\]").unwrap());

/// How an existing note relates to a media file. Always computed from the
/// note as it is now, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteStatus {
    NotFound,
    Matches,
    ExistsDifferent,
}

/// Status of the note at `note_path` with respect to `target`.
///
/// The on-disk existence check runs first so a stale index entry reads as
/// `NotFound` rather than as some other note.
pub fn note_status(vault: &dyn Vault, note_path: &str, target: &str, link_property: &str) -> NoteStatus {
    if !vault.exists(note_path) {
        return NoteStatus::NotFound;
    }
    evaluate(vault, note_path, target, link_property)
}

/// Whether the note's link property points at `target`.
///
/// The frontmatter cache is consulted first and the raw text of the note
/// second, since the cache may not have caught up with the file yet.
pub fn evaluate(vault: &dyn Vault, note_path: &str, target: &str, link_property: &str) -> NoteStatus {
    let cached = vault
        .frontmatter(note_path)
        .and_then(|fm| frontmatter::property(&fm, link_property).map(str::to_string));
    if let Some(value) = &cached {
        if value_matches(vault, note_path, value, target) {
            return NoteStatus::Matches;
        }
    }

    let raw = vault
        .read_text(note_path)
        .ok()
        .and_then(|content| frontmatter::raw_property(&content, link_property));
    match raw {
        Some(value) if Some(frontmatter::unquote(&value)) != cached.as_deref().map(frontmatter::unquote) => {
            if value_matches(vault, note_path, &value, target) {
                NoteStatus::Matches
            } else {
                NoteStatus::ExistsDifferent
            }
        }
        _ => NoteStatus::ExistsDifferent,
    }
}

/// The three matching rules in order: wiki-link resolution, case-insensitive
/// path equality, then plain containment.
fn value_matches(vault: &dyn Vault, note_path: &str, value: &str, target: &str) -> bool {
    let value = frontmatter::unquote(value);
    if value.is_empty() {
        return false;
    }
    let target = paths::normalize(target);

    if let Some(caps) = WIKILINK_RE.captures(value) {
        if let Some(resolved) = vault.resolve_wiki_link(&caps[1], note_path) {
            if resolved.path == target {
                return true;
            }
        }
    }
    if paths::same_path(value, &target) {
        return true;
    }
    value.contains(target.as_str())
}

/// The raw link value of a note, for following it back to its source.
pub fn link_value(vault: &dyn Vault, note_path: &str, link_property: &str) -> Option<String> {
    let cached = vault
        .frontmatter(note_path)
        .and_then(|fm| frontmatter::property(&fm, link_property).map(str::to_string));
    let value = match cached {
        Some(v) => v,
        None => frontmatter::raw_property(&vault.read_text(note_path).ok()?, link_property)?,
    };
    let value = frontmatter::unquote(&value);
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Follow a link value to the file it names: a wiki-link through the
/// resolver, anything else as a vault path.
pub fn resolve_value(vault: &dyn Vault, note_path: &str, value: &str) -> Option<VaultFile> {
    if let Some(caps) = WIKILINK_RE.captures(value) {
        return vault.resolve_wiki_link(&caps[1], note_path);
    }
    match vault.entry_at(value) {
        Some(VaultEntry::File(file)) => Some(file),
        Some(VaultEntry::Folder(_)) | None => None,
    }
}
