use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::media::MediaKind;
use crate::paths;

/// Folder (relative to the vault root) holding the plugin's own state
pub const SETTINGS_DIR: &str = ".companion";

/// Settings file name inside [`SETTINGS_DIR`]
pub const SETTINGS_FILENAME: &str = "settings.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingPolicy {
    /// `IMG-photo`
    #[default]
    Prefix,
    /// `photo.img`
    Suffix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterizerKind {
    #[default]
    None,
    Pdftoppm,
}

/// Per media kind options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindSettings {
    /// Folder for companion notes; empty means next to the file
    pub folder: String,
    /// Lower-case extensions without the dot
    pub extensions: Vec<String>,
    /// Vault path of a template override; empty uses the built-in template
    pub template: String,
    /// Automatic processing only looks inside these folders; empty means anywhere
    pub source_folders: Vec<String>,
}

impl KindSettings {
    fn with_extensions(exts: &[&str]) -> Self {
        Self {
            folder: String::new(),
            extensions: exts.iter().map(|e| e.to_string()).collect(),
            template: String::new(),
            source_folders: Vec::new(),
        }
    }
}

impl Default for KindSettings {
    fn default() -> Self {
        Self::with_extensions(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailSettings {
    pub folder: String,
    pub scale: f32,
    /// JPEG quality in 0.0..=1.0
    pub quality: f32,
    pub rasterizer: RasterizerKind,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            folder: "attachments/thumbnails".to_string(),
            scale: 1.5,
            quality: 0.85,
            rasterizer: RasterizerKind::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub naming: NamingPolicy,
    pub link_property: String,
    pub cover_property: String,
    pub auto_create: bool,
    pub image: KindSettings,
    pub pdf: KindSettings,
    pub other: KindSettings,
    pub thumbnails: ThumbnailSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            naming: NamingPolicy::Prefix,
            link_property: "url".to_string(),
            cover_property: "cover".to_string(),
            auto_create: true,
            image: KindSettings::with_extensions(&[
                "png", "jpg", "jpeg", "gif", "webp", "bmp", "tiff", "tif", "heic", "avif", "svg",
            ]),
            pdf: KindSettings::with_extensions(&["pdf"]),
            other: KindSettings::with_extensions(&[
                "docx", "doc", "xlsx", "xls", "pptx", "ppt", "odt", "ods", "odp", "epub", "zip",
                "csv", "txt", "rtf",
            ]),
            thumbnails: ThumbnailSettings::default(),
        }
    }
}

impl Settings {
    pub fn kind(&self, kind: MediaKind) -> &KindSettings {
        match kind {
            MediaKind::Image => &self.image,
            MediaKind::Pdf => &self.pdf,
            MediaKind::Other => &self.other,
        }
    }

    /// Configured note folder for `kind`, normalized.
    pub fn folder_for(&self, kind: MediaKind) -> String {
        paths::normalize(&self.kind(kind).folder)
    }

    pub fn path_in(vault_root: &Path) -> PathBuf {
        vault_root.join(SETTINGS_DIR).join(SETTINGS_FILENAME)
    }

    /// Load settings for a vault, merged over the defaults.
    /// A missing file yields the defaults.
    pub fn load(vault_root: &Path) -> anyhow::Result<Self> {
        let path = Self::path_in(vault_root);
        if !path.exists() {
            return Ok(Self::default());
        }

        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let reader = BufReader::new(file);
        let settings: Settings = serde_json::from_reader(reader)
            .with_context(|| format!("parsing {}", path.display()))?;

        Ok(settings.normalized())
    }

    /// Persist settings to the vault.
    pub fn save(&self, vault_root: &Path) -> anyhow::Result<()> {
        let dir = vault_root.join(SETTINGS_DIR);
        fs::create_dir_all(&dir)?;
        let path = dir.join(SETTINGS_FILENAME);
        let temp_path = dir.join("settings.tmp");

        // Write to temp file first, then rename for atomicity
        let file = File::create(&temp_path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;

        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Update one option addressed by a dotted key such as `image.folder`.
    ///
    /// String options take the value verbatim; anything else is read as JSON
    /// (`true`, `1.5`, `["a"]`), falling back to a string.
    pub fn set(&self, key: &str, value: &str) -> anyhow::Result<Self> {
        let mut tree = serde_json::to_value(self)?;
        let mut slot = &mut tree;
        for part in key.split('.') {
            slot = match slot.get_mut(part) {
                Some(next) => next,
                None => bail!("unknown setting {:?}", key),
            };
        }
        if slot.is_object() {
            bail!("{:?} is a section, not a setting", key);
        }
        *slot = if slot.is_string() {
            serde_json::Value::String(value.to_string())
        } else {
            serde_json::from_str(value)
                .unwrap_or_else(|_| serde_json::Value::String(value.to_string()))
        };

        let updated: Settings = serde_json::from_value(tree)
            .with_context(|| format!("invalid value {:?} for {}", value, key))?;
        Ok(updated.normalized())
    }

    /// Lower-case extensions and strip stray dots so lookups stay cheap.
    fn normalized(mut self) -> Self {
        for kind in [&mut self.image, &mut self.pdf, &mut self.other] {
            for ext in kind.extensions.iter_mut() {
                *ext = ext.trim().trim_start_matches('.').to_lowercase();
            }
            kind.extensions.retain(|e| !e.is_empty());
            kind.folder = paths::normalize(&kind.folder);
            kind.template = paths::normalize(&kind.template);
        }
        self.thumbnails.folder = paths::normalize(&self.thumbnails.folder);
        self
    }
}
