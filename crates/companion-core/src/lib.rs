pub mod classify;
pub mod error;
pub mod frontmatter;
pub mod identity;
pub mod links;
pub mod media;
pub mod metadata;
pub mod paths;
pub mod reconcile;
pub mod settings;
pub mod template;
pub mod vault;
pub mod watch;

use std::cell::Cell;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use serde::Serialize;

pub use error::{StorageError, StorageResult};
pub use media::{MediaKind, VaultEntry, VaultFile};
pub use metadata::exif::{ExifReader, ImageMetadata, ImageMetadataSource};
pub use metadata::pdf::{PdfRasterizer, Pdftoppm};
pub use reconcile::Outcome;
pub use settings::Settings;
pub use template::TemplateCache;
pub use vault::{FsVault, Vault};

/// Type alias for progress callback: `(stage, current, total, message)`.
/// The lifetime lets callers pass closures that borrow local state.
pub type ProgressCallback<'a> = dyn Fn(&str, u64, u64, &str) + 'a;

/// Throttled progress reporter: emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback<'a>,
    last_emit: Cell<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback<'a>) -> Self {
        Self {
            inner,
            last_emit: Cell::new(Instant::now() - Duration::from_secs(1)),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current >= total;
        if !is_done {
            if self.last_emit.get().elapsed().as_millis() < 200 {
                return;
            }
            self.last_emit.set(Instant::now());
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Totals of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanSummary {
    pub total: u64,
    pub created: u64,
    pub updated: u64,
    pub up_to_date: u64,
    pub ineligible: u64,
    /// `(media path, error)` for every file whose processing failed
    pub failed: Vec<(String, String)>,
}

impl ScanSummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Created(_) | Outcome::CreatedCopy(_) => self.created += 1,
            Outcome::Updated(_) => self.updated += 1,
            Outcome::UpToDate(_) | Outcome::CreatedByOther(_) => self.up_to_date += 1,
            Outcome::Ineligible => self.ineligible += 1,
        }
    }
}

/// The companion-note engine bound to one vault.
///
/// Operations run one at a time (`&mut self`); interleaving with other
/// writers to the same vault is tolerated through the storage layer's
/// `Conflict` errors, not through locking.
pub struct Companion<V: Vault> {
    vault: V,
    settings: Arc<Settings>,
    templates: TemplateCache,
    /// Folders known to exist this session
    ensured_folders: HashSet<String>,
    image_metadata: Box<dyn ImageMetadataSource>,
    rasterizer: Option<Box<dyn PdfRasterizer>>,
}

impl<V: Vault> Companion<V> {
    pub fn new(vault: V, settings: Settings) -> Self {
        Self {
            vault,
            settings: Arc::new(settings),
            templates: TemplateCache::new(),
            ensured_folders: HashSet::new(),
            image_metadata: Box::new(ExifReader),
            rasterizer: None,
        }
    }

    pub fn with_image_metadata(mut self, source: Box<dyn ImageMetadataSource>) -> Self {
        self.image_metadata = source;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Box<dyn PdfRasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn set_rasterizer(&mut self, rasterizer: Option<Box<dyn PdfRasterizer>>) {
        self.rasterizer = rasterizer;
    }

    pub fn vault(&self) -> &V {
        &self.vault
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Swap in a new settings snapshot. Cached templates and known folders
    /// are dropped since both depend on settings.
    pub fn apply_settings(&mut self, settings: Settings) {
        self.settings = Arc::new(settings);
        self.templates.invalidate();
        self.ensured_folders.clear();
    }

    /// Forget loaded templates, e.g. after a template file was edited.
    pub fn invalidate_templates(&mut self) {
        self.templates.invalidate();
    }

    /// Process every managed file of `kind` (or of every kind) in the vault.
    /// Source-folder whitelists apply.
    pub fn scan_and_process(
        &mut self,
        kind: Option<MediaKind>,
        progress: &ProgressCallback<'_>,
    ) -> anyhow::Result<ScanSummary> {
        let files = self.vault.list_files().context("listing vault files")?;
        let items: Vec<(VaultFile, MediaKind)> = files
            .into_iter()
            .filter_map(|file| {
                let found = classify::classify(&file, &self.settings)?;
                (kind.is_none() || kind == Some(found)).then_some((file, found))
            })
            .collect();
        tracing::info!(files = items.len(), kind = ?kind, "scanning vault");
        Ok(self.process_batch(items, false, "scan", progress))
    }

    /// Process one file on explicit request. The kind is classified from
    /// the extension unless given.
    pub fn process_single(&mut self, path: &str, kind: Option<MediaKind>, force: bool) -> anyhow::Result<Outcome> {
        let file = self.file_at(path)?;
        let kind = self.kind_of(&file, kind)?;
        let folder = self.settings.folder_for(kind);
        self.process_media(&file, kind, &folder, force)
            .with_context(|| format!("processing {} as {}", file.path, kind))
    }

    /// Process every managed file under `folder`, recursively, ignoring
    /// source-folder whitelists.
    pub fn process_folder(&mut self, folder: &str, progress: &ProgressCallback<'_>) -> anyhow::Result<ScanSummary> {
        let folder = paths::normalize(folder);
        if !folder.is_empty() {
            match self.vault.entry_at(&folder) {
                Some(VaultEntry::Folder(_)) => {}
                Some(VaultEntry::File(_)) => bail!("{} is a file, not a folder", folder),
                None => bail!("no folder at {}", folder),
            }
        }
        let files = self.vault.list_files().context("listing vault files")?;
        let items: Vec<(VaultFile, MediaKind)> = files
            .into_iter()
            .filter(|file| folder.is_empty() || paths::is_within(&file.path, &folder))
            .filter_map(|file| classify::classify(&file, &self.settings).map(|kind| (file, kind)))
            .collect();
        tracing::info!(%folder, files = items.len(), "processing folder");
        Ok(self.process_batch(items, true, "folder", progress))
    }

    /// Delete every note (canonical or copy) that links to `path`. The media
    /// file itself may already be gone. Returns the deleted note paths.
    pub fn delete_notes_for(&mut self, path: &str, kind: Option<MediaKind>) -> anyhow::Result<Vec<String>> {
        let file = match self.vault.entry_at(path) {
            Some(VaultEntry::File(file)) => file,
            Some(VaultEntry::Folder(_)) => bail!("{} is a folder", path),
            None => VaultFile::new(path, 0),
        };
        let kind = self.kind_of(&file, kind)?;
        let folder = identity::note_folder(&self.settings, &file, kind);
        let id = identity::compute_identity(&file, kind, &folder, self.settings.naming);
        let notes = identity::all_matching_notes(&self.vault, &self.settings.link_property, &file, &id, &folder)
            .with_context(|| format!("searching notes for {}", file.path))?;

        for note in &notes {
            self.vault.delete(note).with_context(|| format!("deleting {}", note))?;
            self.vault.invalidate(note);
            tracing::info!(path = %file.path, %note, "deleted note");
        }
        Ok(notes)
    }

    /// The existing note for a media file, if there is one.
    pub fn open_note_for(&self, path: &str) -> anyhow::Result<Option<String>> {
        let file = self.file_at(path)?;
        let kind = self.kind_of(&file, None)?;
        identity::find_existing_note_path(&self.vault, &self.settings, &file, kind)
            .with_context(|| format!("searching notes for {}", file.path))
    }

    /// The media file a note links to through its link property.
    pub fn open_referenced_source(&self, note: &str) -> anyhow::Result<Option<VaultFile>> {
        let note = paths::normalize(note);
        if !self.vault.exists(&note) {
            bail!("no note at {}", note);
        }
        let Some(value) = links::link_value(&self.vault, &note, &self.settings.link_property) else {
            return Ok(None);
        };
        Ok(links::resolve_value(&self.vault, &note, &value))
    }

    fn file_at(&self, path: &str) -> anyhow::Result<VaultFile> {
        match self.vault.entry_at(path) {
            Some(VaultEntry::File(file)) => Ok(file),
            Some(VaultEntry::Folder(_)) => bail!("{} is a folder, not a file", path),
            None => bail!("no file at {}", path),
        }
    }

    fn kind_of(&self, file: &VaultFile, kind: Option<MediaKind>) -> anyhow::Result<MediaKind> {
        match kind.or_else(|| classify::classify(file, &self.settings)) {
            Some(kind) => Ok(kind),
            None => bail!("{} is not a managed media file", file.path),
        }
    }

    /// Run `process_media` for each item. A failure is logged and recorded
    /// and the batch carries on.
    fn process_batch(
        &mut self,
        items: Vec<(VaultFile, MediaKind)>,
        force: bool,
        stage: &str,
        progress: &ProgressCallback<'_>,
    ) -> ScanSummary {
        let tp = ThrottledProgress::new(progress);
        let total = items.len() as u64;
        let mut summary = ScanSummary {
            total,
            ..Default::default()
        };

        for (i, (file, kind)) in items.into_iter().enumerate() {
            let folder = self.settings.folder_for(kind);
            match self.process_media(&file, kind, &folder, force) {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    tracing::error!(path = %file.path, %kind, error = %format!("{:#}", e), "processing failed");
                    summary.failed.push((file.path.clone(), format!("{:#}", e)));
                }
            }
            tp.report(stage, i as u64 + 1, total, &file.path);
        }
        summary
    }
}
