use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{debug, info, warn};

use crate::classify;
use crate::error::{StorageError, StorageResult};
use crate::identity::{self, compute_identity};
use crate::links::{self, NoteStatus};
use crate::media::{MediaKind, VaultEntry, VaultFile};
use crate::metadata::{self, exif, pdf};
use crate::paths;
use crate::settings::ThumbnailSettings;
use crate::template::{self, Substitutions};
use crate::vault::Vault;
use crate::Companion;

/// Attempts at claiming a free `(copy N)` path before giving up.
const MAX_COPY_ATTEMPTS: usize = 100;

/// Which branch of reconciliation ran for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Outside the kind's source folders and not forced
    Ineligible,
    /// The canonical note already links to the file
    UpToDate(String),
    /// A matching note at a non-canonical path was re-rendered in place
    Updated(String),
    Created(String),
    /// Someone else created the canonical note between our check and create
    CreatedByOther(String),
    /// The canonical path holds an unrelated note; a numbered copy was made
    CreatedCopy(String),
}

impl Outcome {
    /// The note this outcome refers to, if any.
    pub fn note(&self) -> Option<&str> {
        match self {
            Outcome::Ineligible => None,
            Outcome::UpToDate(p)
            | Outcome::Updated(p)
            | Outcome::Created(p)
            | Outcome::CreatedByOther(p)
            | Outcome::CreatedCopy(p) => Some(p.as_str()),
        }
    }

    /// Whether the vault was written to.
    pub fn wrote(&self) -> bool {
        matches!(self, Outcome::Updated(_) | Outcome::Created(_) | Outcome::CreatedCopy(_))
    }
}

impl<V: Vault> Companion<V> {
    /// Bring the companion note of `file` in line with the vault.
    ///
    /// Safe to call any number of times: a correctly linked note is left
    /// alone, a renamed copy that still links to the file is refreshed in
    /// place, and an unrelated note on the canonical path gets a numbered
    /// copy next to it. Nothing is rolled back on failure; a later run picks
    /// up where this one stopped.
    pub fn process_media(
        &mut self,
        file: &VaultFile,
        kind: MediaKind,
        target_folder: &str,
        force: bool,
    ) -> anyhow::Result<Outcome> {
        let settings = Arc::clone(&self.settings);
        let folder = match paths::normalize(target_folder) {
            f if f.is_empty() => file.parent.clone(),
            f => f,
        };

        if !force && !classify::is_eligible(file, kind, &settings) {
            debug!(path = %file.path, %kind, "outside source folders, skipping");
            return Ok(Outcome::Ineligible);
        }

        self.ensure_folder(&folder)
            .with_context(|| format!("preparing note folder {:?} for {}", folder, file.path))?;

        let identity = compute_identity(file, kind, &folder, settings.naming);
        let link_property = settings.link_property.as_str();

        let canonical = links::note_status(&self.vault, &identity.note_path, &file.path, link_property);
        if canonical == NoteStatus::Matches {
            debug!(path = %file.path, note = %identity.note_path, "note up to date");
            return Ok(Outcome::UpToDate(identity.note_path));
        }

        let existing = identity::find_matching_copy(&self.vault, link_property, file, &identity, &folder)
            .with_context(|| format!("searching notes for {}", file.path))?;
        if let Some(existing) = existing {
            let content = self.render_note(file, kind, true);
            self.vault
                .modify_text(&existing, &content)
                .with_context(|| format!("updating {} for {}", existing, file.path))?;
            self.vault.invalidate(&existing);
            info!(path = %file.path, note = %existing, "updated note");
            return Ok(Outcome::Updated(existing));
        }

        if canonical == NoteStatus::NotFound {
            let content = self.render_note(file, kind, false);
            let created = self.create_in_folder(&folder, |vault| vault.create_text(&identity.note_path, &content));
            return match created {
                Ok(()) => {
                    info!(path = %file.path, note = %identity.note_path, %kind, "created note");
                    Ok(Outcome::Created(identity.note_path))
                }
                Err(e) if e.is_conflict() => {
                    debug!(note = %identity.note_path, "note created concurrently");
                    Ok(Outcome::CreatedByOther(identity.note_path))
                }
                Err(e) => {
                    Err(e).with_context(|| format!("creating {} for {} ({})", identity.note_path, file.path, kind))
                }
            };
        }

        let content = self.render_note(file, kind, true);
        for _ in 0..MAX_COPY_ATTEMPTS {
            let copy = identity::next_copy_path(&self.vault, &folder, &identity.base_name);
            match self.create_in_folder(&folder, |vault| vault.create_text(&copy, &content)) {
                Ok(()) => {
                    info!(path = %file.path, note = %copy, "canonical note is unrelated, created copy");
                    return Ok(Outcome::CreatedCopy(copy));
                }
                Err(e) if e.is_conflict() => {
                    debug!(note = %copy, "copy path taken concurrently, retrying");
                }
                Err(e) => return Err(e).with_context(|| format!("creating {} for {}", copy, file.path)),
            }
        }
        bail!(
            "no free copy path for {} after {} attempts",
            identity.note_path,
            MAX_COPY_ATTEMPTS
        )
    }

    /// Create `folder` and any missing ancestors. Losing a race to another
    /// creator counts as success.
    pub(crate) fn ensure_folder(&mut self, folder: &str) -> StorageResult<()> {
        let folder = paths::normalize(folder);
        if folder.is_empty() || self.ensured_folders.contains(&folder) {
            return Ok(());
        }
        for ancestor in paths::ancestors(&folder) {
            match self.vault.entry_at(&ancestor) {
                Some(VaultEntry::Folder(_)) => continue,
                Some(VaultEntry::File(_)) => return Err(StorageError::InvalidPath(ancestor)),
                None => match self.vault.create_folder(&ancestor) {
                    Ok(()) => debug!(folder = %ancestor, "created folder"),
                    Err(e) if e.is_conflict() => {}
                    Err(e) => return Err(e),
                },
            }
        }
        self.ensured_folders.insert(folder);
        Ok(())
    }

    /// Run a create inside `folder`. If the folder was known to exist but has
    /// since disappeared, it is made again and the create retried once.
    fn create_in_folder(&mut self, folder: &str, create: impl Fn(&V) -> StorageResult<()>) -> StorageResult<()> {
        let result = create(&self.vault);
        let vanished = matches!(result, Err(StorageError::InvalidPath(_) | StorageError::NotFound(_)))
            && self.ensured_folders.remove(&paths::normalize(folder));
        if !vanished {
            return result;
        }
        debug!(%folder, "note folder vanished, recreating");
        self.ensure_folder(folder)?;
        create(&self.vault)
    }

    fn render_note(&mut self, file: &VaultFile, kind: MediaKind, duplicate: bool) -> String {
        let subs = self.substitutions(file, kind, duplicate);
        let template = self.templates.get(&self.vault, &self.settings, kind);
        template::render(&template, &subs)
    }

    fn substitutions(&mut self, file: &VaultFile, kind: MediaKind, duplicate: bool) -> Substitutions {
        let today = chrono::Local::now().date_naive();
        let mut subs = metadata::file_substitutions(file, duplicate, today);
        match kind {
            MediaKind::Image => {
                let extracted = self
                    .vault
                    .read_binary(&file.path)
                    .map_err(anyhow::Error::from)
                    .and_then(|bytes| self.image_metadata.extract(&bytes));
                match extracted {
                    Ok(meta) => {
                        for (key, value) in meta.substitutions() {
                            subs.insert(key.to_string(), value);
                        }
                    }
                    Err(e) => {
                        debug!(path = %file.path, error = %e, "no image metadata");
                        for key in exif::FIELDS {
                            subs.insert(key.to_string(), String::new());
                        }
                    }
                }
            }
            MediaKind::Pdf => {
                if let Some(cover) = self.ensure_cover(file) {
                    subs.insert("cover".to_string(), cover);
                }
            }
            MediaKind::Other => {}
        }
        subs
    }

    /// Path of the cover thumbnail of a PDF, rendering it on first use.
    fn ensure_cover(&mut self, file: &VaultFile) -> Option<String> {
        self.rasterizer.as_ref()?;
        let settings = Arc::clone(&self.settings);
        let path = pdf::thumbnail_path(&settings.thumbnails, file);
        if self.vault.exists(&path) {
            return Some(path);
        }
        match self.render_cover(file, &settings.thumbnails, &path) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(path = %file.path, error = %e, "cover thumbnail failed");
                None
            }
        }
    }

    fn render_cover(&mut self, file: &VaultFile, thumbnails: &ThumbnailSettings, path: &str) -> anyhow::Result<()> {
        self.ensure_folder(&paths::parent(path))?;
        let rasterizer = self.rasterizer.as_deref().context("no PDF rasterizer configured")?;
        let pdf = self.vault.read_binary(&file.path)?;
        let image = rasterizer.render_first_page(&pdf, thumbnails.scale, thumbnails.quality)?;
        match self.create_in_folder(&paths::parent(path), |vault| vault.create_binary(path, &image)) {
            Ok(()) => {
                debug!(pdf = %file.path, cover = %path, "rendered cover");
                Ok(())
            }
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::exif::{ImageMetadata, ImageMetadataSource};
    use crate::metadata::pdf::PdfRasterizer;
    use crate::settings::Settings;
    use crate::vault::memory::MemoryVault;
    use crate::vault::Storage;

    struct FixedMetadata(ImageMetadata);

    impl ImageMetadataSource for FixedMetadata {
        fn extract(&self, _bytes: &[u8]) -> anyhow::Result<ImageMetadata> {
            Ok(self.0.clone())
        }
    }

    struct FakeRasterizer;

    impl PdfRasterizer for FakeRasterizer {
        fn render_first_page(&self, pdf: &[u8], _scale: f32, _quality: f32) -> anyhow::Result<Vec<u8>> {
            if pdf.starts_with(b"%PDF") {
                Ok(b"jpeg".to_vec())
            } else {
                bail!("not a pdf")
            }
        }
    }

    const LINKED: &str = "---\nurl: \"[[assets/photo.png]]\"\n---\nold body\n";
    const UNRELATED: &str = "---\nurl: \"[[assets/elsewhere.png]]\"\n---\n";

    fn companion(vault: MemoryVault) -> Companion<MemoryVault> {
        let mut settings = Settings::default();
        settings.image.folder = "notes".into();
        Companion::new(vault, settings)
    }

    fn photo_vault() -> MemoryVault {
        let vault = MemoryVault::new();
        vault.put("assets/photo.png", "png");
        vault
    }

    fn photo() -> VaultFile {
        VaultFile::new("assets/photo.png", 3)
    }

    #[test]
    fn test_end_to_end_vacation() {
        let vault = MemoryVault::new();
        vault.put("Camera/vacation.jpg", "jpg");
        let mut settings = Settings::default();
        settings.image.folder = "Notes/Images".into();
        settings.image.source_folders = vec!["Camera".into()];
        let mut c = Companion::new(vault, settings).with_image_metadata(Box::new(FixedMetadata(ImageMetadata {
            camera_model: Some("X100V".into()),
            iso: Some(200),
            ..Default::default()
        })));

        let file = VaultFile::new("Camera/vacation.jpg", 3);
        let outcome = c.process_media(&file, MediaKind::Image, "Notes/Images", false).unwrap();
        assert_eq!(outcome, Outcome::Created("Notes/Images/IMG-vacation.md".into()));

        let note = c.vault().text("Notes/Images/IMG-vacation.md").unwrap();
        assert!(note.starts_with("---\nurl: \"[[Camera/vacation.jpg]]\"\n"));
        assert!(note.contains("duplicate: false"));
        assert!(note.contains("## EXIF"));
        assert!(note.contains("- ISO: 200"));
        assert!(!note.contains("- Lens:"));
        assert!(!note.contains("{{"));

        let again = c.process_media(&file, MediaKind::Image, "Notes/Images", false).unwrap();
        assert_eq!(again, Outcome::UpToDate("Notes/Images/IMG-vacation.md".into()));
        assert_eq!(c.vault().markdown_paths(), vec!["Notes/Images/IMG-vacation.md"]);
        assert_eq!(c.vault().creates.borrow().len(), 1);
        assert!(c.vault().modifies.borrow().is_empty());
    }

    #[test]
    fn test_missing_metadata_collapses_exif_block() {
        let mut c = companion(photo_vault());
        c.process_media(&photo(), MediaKind::Image, "notes", false).unwrap();
        let note = c.vault().text("notes/IMG-photo.md").unwrap();
        assert!(!note.contains("EXIF"));
        assert!(!note.contains("{{"));
    }

    #[test]
    fn test_renamed_copy_is_updated_in_place() {
        let vault = photo_vault();
        vault.put("notes/IMG-photo.md", UNRELATED);
        vault.put("notes/IMG-photo (copy 1).md", LINKED);
        let mut c = companion(vault);

        let outcome = c.process_media(&photo(), MediaKind::Image, "notes", false).unwrap();
        assert_eq!(outcome, Outcome::Updated("notes/IMG-photo (copy 1).md".into()));
        assert!(c.vault().creates.borrow().is_empty());
        let note = c.vault().text("notes/IMG-photo (copy 1).md").unwrap();
        assert!(!note.contains("old body"));
        assert!(note.contains("duplicate: true"));
        assert_eq!(c.vault().text("notes/IMG-photo.md").unwrap(), UNRELATED);
    }

    #[test]
    fn test_unrelated_canonical_gets_one_copy() {
        let vault = photo_vault();
        vault.put("notes/IMG-photo.md", UNRELATED);
        let mut c = companion(vault);

        let first = c.process_media(&photo(), MediaKind::Image, "notes", false).unwrap();
        assert_eq!(first, Outcome::CreatedCopy("notes/IMG-photo (copy 1).md".into()));
        let second = c.process_media(&photo(), MediaKind::Image, "notes", false).unwrap();
        assert_eq!(second, Outcome::Updated("notes/IMG-photo (copy 1).md".into()));
        assert_eq!(c.vault().markdown_paths().len(), 2);
    }

    #[test]
    fn test_copy_race_moves_to_next_number() {
        let vault = photo_vault();
        vault.put("notes/IMG-photo.md", UNRELATED);
        vault.race_on_create("notes/IMG-photo (copy 1).md", UNRELATED);
        let mut c = companion(vault);

        let outcome = c.process_media(&photo(), MediaKind::Image, "notes", false).unwrap();
        assert_eq!(outcome, Outcome::CreatedCopy("notes/IMG-photo (copy 2).md".into()));
    }

    #[test]
    fn test_canonical_race_is_tolerated() {
        let vault = photo_vault();
        vault.race_on_create("notes/IMG-photo.md", LINKED);
        let mut c = companion(vault);

        let outcome = c.process_media(&photo(), MediaKind::Image, "notes", false).unwrap();
        assert_eq!(outcome, Outcome::CreatedByOther("notes/IMG-photo.md".into()));
        assert!(c.vault().creates.borrow().is_empty());
        assert_eq!(c.vault().text("notes/IMG-photo.md").unwrap(), LINKED);
    }

    #[test]
    fn test_copy_attempts_are_capped() {
        let vault = photo_vault();
        vault.put("notes/IMG-photo.md", UNRELATED);
        for n in 1..=100 {
            vault.race_on_create(&format!("notes/IMG-photo (copy {}).md", n), UNRELATED);
        }
        let mut c = companion(vault);

        let err = c.process_media(&photo(), MediaKind::Image, "notes", false).unwrap_err();
        assert!(err.to_string().contains("after 100 attempts"), "{err:#}");
        assert!(c.vault().creates.borrow().is_empty());
    }

    #[test]
    fn test_failed_canonical_create_aborts() {
        let vault = photo_vault();
        vault.reject_create("notes/IMG-photo.md");
        let mut c = companion(vault);

        let err = c.process_media(&photo(), MediaKind::Image, "notes", false).unwrap_err();
        assert!(format!("{err:#}").contains("creating notes/IMG-photo.md"), "{err:#}");
        assert!(c.vault().markdown_paths().is_empty());
    }

    #[test]
    fn test_failed_copy_create_aborts() {
        let vault = photo_vault();
        vault.put("notes/IMG-photo.md", UNRELATED);
        vault.reject_create("notes/IMG-photo (copy 1).md");
        let mut c = companion(vault);

        assert!(c.process_media(&photo(), MediaKind::Image, "notes", false).is_err());
        assert_eq!(c.vault().markdown_paths(), vec!["notes/IMG-photo.md"]);
    }

    #[test]
    fn test_unlistable_vault_aborts_instead_of_copying() {
        let vault = photo_vault();
        vault.put("notes/IMG-photo.md", UNRELATED);
        vault.put("notes/IMG-photo (copy 1).md", LINKED);
        vault.fail_listing();
        let mut c = companion(vault);

        for _ in 0..3 {
            assert!(c.process_media(&photo(), MediaKind::Image, "notes", false).is_err());
        }
        assert!(c.vault().creates.borrow().is_empty());
        assert_eq!(c.vault().markdown_paths().len(), 2);
    }

    #[test]
    fn test_folder_race_counts_as_created() {
        let vault = photo_vault();
        vault.race_on_create_folder("notes");
        let mut c = companion(vault);

        let outcome = c.process_media(&photo(), MediaKind::Image, "notes", false).unwrap();
        assert_eq!(outcome, Outcome::Created("notes/IMG-photo.md".into()));
    }

    #[test]
    fn test_deleted_note_folder_is_recreated() {
        let mut c = companion(photo_vault());
        c.process_media(&photo(), MediaKind::Image, "notes", false).unwrap();

        c.vault().delete("notes/IMG-photo.md").unwrap();
        c.vault().delete("notes").unwrap();
        let outcome = c.process_media(&photo(), MediaKind::Image, "notes", false).unwrap();
        assert_eq!(outcome, Outcome::Created("notes/IMG-photo.md".into()));
        assert!(c.vault().text("notes/IMG-photo.md").is_some());
    }

    #[test]
    fn test_eligibility_and_force() {
        let mut c = companion(photo_vault());
        let mut settings = (*c.settings()).clone();
        settings.image.source_folders = vec!["Camera".into()];
        c.apply_settings(settings);

        assert_eq!(
            c.process_media(&photo(), MediaKind::Image, "notes", false).unwrap(),
            Outcome::Ineligible
        );
        assert!(c.vault().markdown_paths().is_empty());
        assert!(c.process_media(&photo(), MediaKind::Image, "notes", true).unwrap().wrote());
    }

    #[test]
    fn test_blank_folder_means_next_to_file() {
        let mut c = companion(photo_vault());
        let outcome = c.process_media(&photo(), MediaKind::Image, " ", false).unwrap();
        assert_eq!(outcome, Outcome::Created("assets/IMG-photo.md".into()));
    }

    #[test]
    fn test_folder_blocked_by_file_aborts() {
        let vault = photo_vault();
        vault.put("notes", "not a folder");
        let mut c = companion(vault);
        assert!(c.process_media(&photo(), MediaKind::Image, "notes", false).is_err());
    }

    #[test]
    fn test_pdf_cover_rendered_once() {
        let vault = MemoryVault::new();
        vault.put("papers/paper.pdf", "%PDF-1.7");
        vault.put("papers/broken.pdf", "garbage");
        let mut c = Companion::new(vault, Settings::default()).with_rasterizer(Box::new(FakeRasterizer));

        let paper = VaultFile::new("papers/paper.pdf", 8);
        c.process_media(&paper, MediaKind::Pdf, "", false).unwrap();
        let cover = pdf::thumbnail_path(&c.settings().thumbnails, &paper);
        let note = c.vault().text("papers/PDF-paper.md").unwrap();
        assert!(note.contains(&format!("cover: \"{}\"", cover)));
        assert_eq!(c.vault().text(&cover).as_deref(), Some("jpeg"));

        let broken = VaultFile::new("papers/broken.pdf", 7);
        c.process_media(&broken, MediaKind::Pdf, "", false).unwrap();
        let note = c.vault().text("papers/PDF-broken.md").unwrap();
        assert!(note.contains("cover: \"\""));
    }
}
