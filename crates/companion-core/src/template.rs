use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

use crate::media::MediaKind;
use crate::settings::Settings;
use crate::vault::Storage;

/// Values substituted for `{{key}}` placeholders.
pub type Substitutions = BTreeMap<String, String>;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap());
static EXIF_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{exif\}(.*?)\{/exif\}").unwrap());

/// Render a template: collapse `{exif}...{/exif}` blocks, then replace every
/// `{{key}}`. Keys without a value are left as written.
pub fn render(template: &str, subs: &Substitutions) -> String {
    let collapsed = EXIF_BLOCK_RE.replace_all(template, |caps: &Captures| conditional_block(&caps[1], subs));
    TOKEN_RE
        .replace_all(&collapsed, |caps: &Captures| match subs.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Keep a line with placeholders only if every one of them has a non-empty
/// value. Plain lines are held back until a kept data line follows them, so
/// a heading with nothing under it is dropped.
fn conditional_block(inner: &str, subs: &Substitutions) -> String {
    let inner = inner
        .strip_prefix("\r\n")
        .or_else(|| inner.strip_prefix('\n'))
        .unwrap_or(inner);

    let mut kept: Vec<&str> = Vec::new();
    let mut pending: Vec<&str> = Vec::new();
    let mut data_lines = 0usize;

    for line in inner.lines() {
        let mut tokens = TOKEN_RE.captures_iter(line).peekable();
        if tokens.peek().is_none() {
            pending.push(line);
            continue;
        }
        let filled = tokens.all(|caps| subs.get(&caps[1]).is_some_and(|v| !v.trim().is_empty()));
        if filled {
            kept.append(&mut pending);
            kept.push(line);
            data_lines += 1;
        }
    }

    if data_lines == 0 {
        return String::new();
    }
    kept.join("\n").trim_end().to_string()
}

/// Built-in template for `kind`. Property names come from the settings,
/// which is why a property rename has to invalidate cached templates.
pub fn default_template(kind: MediaKind, settings: &Settings) -> String {
    let link = &settings.link_property;
    let cover = &settings.cover_property;
    match kind {
        MediaKind::Image => format!(
            "---\n\
             {link}: \"[[{{{{url}}}}]]\"\n\
             type: image\n\
             created: {{{{date}}}}\n\
             duplicate: {{{{duplicate}}}}\n\
             size: \"{{{{filesize}}}}\"\n\
             ---\n\
             \n\
             # {{{{basename}}}}\n\
             \n\
             ![[{{{{url}}}}]]\n\
             \n\
             {{exif}}\n\
             ## EXIF\n\
             \n\
             - Camera: {{{{camera_make}}}} {{{{camera_model}}}}\n\
             - Lens: {{{{lens}}}}\n\
             - Taken: {{{{date_taken}}}}\n\
             - Exposure: {{{{exposure_time}}}} s\n\
             - Aperture: f/{{{{f_number}}}}\n\
             - ISO: {{{{iso}}}}\n\
             - Focal length: {{{{focal_length}}}} mm\n\
             - Focal length (35mm): {{{{focal_length_35mm}}}} mm\n\
             - Location: {{{{latitude}}}}, {{{{longitude}}}}\n\
             - Altitude: {{{{altitude}}}} m\n\
             {{/exif}}\n"
        ),
        MediaKind::Pdf => format!(
            "---\n\
             {link}: \"[[{{{{url}}}}]]\"\n\
             {cover}: \"{{{{cover}}}}\"\n\
             type: pdf\n\
             created: {{{{date}}}}\n\
             duplicate: {{{{duplicate}}}}\n\
             size: \"{{{{filesize}}}}\"\n\
             ---\n\
             \n\
             # {{{{basename}}}}\n\
             \n\
             ![[{{{{url}}}}]]\n"
        ),
        MediaKind::Other => format!(
            "---\n\
             {link}: \"[[{{{{url}}}}]]\"\n\
             type: {{{{extension}}}}\n\
             created: {{{{date}}}}\n\
             duplicate: {{{{duplicate}}}}\n\
             size: \"{{{{filesize}}}}\"\n\
             ---\n\
             \n\
             # {{{{basename}}}}\n\
             \n\
             [[{{{{url}}}}]] in `{{{{folder}}}}`\n"
        ),
    }
}

/// Fingerprint of everything a kind's template depends on.
fn template_key(kind: MediaKind, settings: &Settings) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(settings.kind(kind).template.as_bytes());
    hasher.update([0u8]);
    hasher.update(settings.link_property.as_bytes());
    hasher.update([0u8]);
    hasher.update(settings.cover_property.as_bytes());
    hex::encode(hasher.finalize())
}

/// Loaded templates per kind. An entry is reused only while its settings
/// fingerprint still matches; edits to a template file need [`invalidate`].
///
/// [`invalidate`]: TemplateCache::invalidate
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: HashMap<MediaKind, (String, String)>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, storage: &dyn Storage, settings: &Settings, kind: MediaKind) -> String {
        let key = template_key(kind, settings);
        if let Some((cached_key, template)) = self.entries.get(&kind) {
            if *cached_key == key {
                return template.clone();
            }
        }
        let template = load_template(storage, settings, kind);
        self.entries.insert(kind, (key, template.clone()));
        template
    }

    pub fn invalidate(&mut self) {
        self.entries.clear();
    }
}

fn load_template(storage: &dyn Storage, settings: &Settings, kind: MediaKind) -> String {
    let path = &settings.kind(kind).template;
    if path.is_empty() {
        return default_template(kind, settings);
    }
    match storage.read_text(path) {
        Ok(text) => {
            tracing::debug!(%kind, template = %path, "loaded template override");
            text
        }
        Err(e) => {
            tracing::warn!(%kind, template = %path, error = %e, "template override unreadable, using built-in");
            default_template(kind, settings)
        }
    }
}
