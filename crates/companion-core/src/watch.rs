//! Auto-create on add: follow filesystem events under a vault and keep
//! companion notes, caches and settings in step with them.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::Context;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::classify;
use crate::media::{MediaKind, VaultEntry};
use crate::metadata::pdf;
use crate::paths;
use crate::settings::{Settings, SETTINGS_DIR, SETTINGS_FILENAME};
use crate::vault::{FsVault, MetadataCache, Storage};
use crate::Companion;

/// How long a new file must stay quiet before it is processed.
pub const DEBOUNCE: Duration = Duration::from_millis(250);

/// What a changed vault path means to the companion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A possible media file
    Media(String),
    Note(String),
    Settings,
    Template(String),
    Ignored,
}

/// Interpret a vault-relative path that changed on disk.
pub fn interpret(path: &str, settings: &Settings) -> Change {
    let path = paths::normalize(path);
    if path.is_empty() {
        return Change::Ignored;
    }
    if path == paths::join(SETTINGS_DIR, SETTINGS_FILENAME) {
        return Change::Settings;
    }
    if path.split('/').any(|segment| segment.starts_with('.')) {
        return Change::Ignored;
    }
    let is_template = MediaKind::ALL.iter().any(|kind| {
        let template = &settings.kind(*kind).template;
        !template.is_empty() && paths::same_path(template, &path)
    });
    if is_template {
        return Change::Template(path);
    }
    if path.to_lowercase().ends_with(".md") {
        return Change::Note(path);
    }
    Change::Media(path)
}

/// Arrivals waiting for their writes to settle.
#[derive(Debug, Default)]
struct Pending {
    paths: HashMap<String, Instant>,
}

impl Pending {
    fn touch(&mut self, path: String, now: Instant) {
        self.paths.insert(path, now);
    }

    /// Paths quiet for at least [`DEBOUNCE`], in lexical order.
    fn settled(&mut self, now: Instant) -> Vec<String> {
        let mut ready: Vec<String> = self
            .paths
            .iter()
            .filter(|(_, last)| now.duration_since(**last) >= DEBOUNCE)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.paths.remove(path);
        }
        ready.sort();
        ready
    }
}

fn is_arrival(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both))
    )
}

/// Watch the vault until `stop` is set.
///
/// New media files are processed with eligibility checks when `auto_create`
/// is on. Failures are logged and never end the watch.
pub fn watch(companion: &mut Companion<FsVault>, stop: &AtomicBool) -> anyhow::Result<()> {
    let root = companion.vault().root().to_path_buf();
    let (tx, rx) = mpsc::channel();
    let mut watcher = RecommendedWatcher::new(tx, Config::default()).context("starting file watcher")?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("watching {}", root.display()))?;
    info!(vault = %root.display(), "watching for new files");

    let mut pending = Pending::default();
    while !stop.load(Ordering::SeqCst) {
        match rx.recv_timeout(DEBOUNCE) {
            Ok(Ok(event)) => handle_event(companion, &event, &mut pending),
            Ok(Err(e)) => warn!(error = %e, "file watcher error"),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        for path in pending.settled(Instant::now()) {
            process_arrival(companion, &path);
        }
    }
    info!("watch stopped");
    Ok(())
}

fn handle_event(companion: &mut Companion<FsVault>, event: &Event, pending: &mut Pending) {
    let arrival = is_arrival(&event.kind);
    for abs in &event.paths {
        let Some(path) = companion.vault().relative(abs) else {
            continue;
        };
        match interpret(&path, companion.settings()) {
            Change::Media(path) if arrival => pending.touch(path, Instant::now()),
            Change::Media(_) | Change::Ignored => {}
            Change::Note(path) => companion.vault().invalidate(&path),
            Change::Settings => reload_settings(companion),
            Change::Template(path) => {
                debug!(template = %path, "template changed");
                companion.invalidate_templates();
            }
        }
    }
}

fn process_arrival(companion: &mut Companion<FsVault>, path: &str) {
    if !companion.settings().auto_create {
        return;
    }
    let file = match companion.vault().entry_at(path) {
        Some(VaultEntry::File(file)) => file,
        Some(VaultEntry::Folder(_)) | None => return,
    };
    let Some(kind) = classify::classify(&file, companion.settings()) else {
        return;
    };
    let folder = companion.settings().folder_for(kind);
    if let Err(e) = companion.process_media(&file, kind, &folder, false) {
        warn!(%path, %kind, error = %format!("{:#}", e), "auto-create failed");
    }
}

fn reload_settings(companion: &mut Companion<FsVault>) {
    let root = companion.vault().root().to_path_buf();
    match load_with_rasterizer(&root, companion.settings()) {
        Ok((settings, rasterizer)) => {
            if let Some(rasterizer) = rasterizer {
                companion.set_rasterizer(rasterizer);
            }
            if settings != *companion.settings() {
                info!("settings reloaded");
                companion.apply_settings(settings);
            }
        }
        Err(e) => warn!(error = %format!("{:#}", e), "keeping previous settings"),
    }
}

/// Load settings from disk and, when the rasterizer choice changed, build
/// the new one. A rasterizer that cannot start rejects the whole reload.
#[allow(clippy::type_complexity)]
fn load_with_rasterizer(
    root: &Path,
    current: &Settings,
) -> anyhow::Result<(Settings, Option<Option<Box<dyn pdf::PdfRasterizer>>>)> {
    let settings = Settings::load(root)?;
    let rasterizer = if settings.thumbnails.rasterizer != current.thumbnails.rasterizer {
        Some(pdf::rasterizer_for(&settings.thumbnails)?)
    } else {
        None
    };
    Ok((settings, rasterizer))
}
