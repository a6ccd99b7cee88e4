use std::fs;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context};
use sha2::{Digest, Sha256};

use crate::media::VaultFile;
use crate::paths;
use crate::settings::{RasterizerKind, ThumbnailSettings};

/// Renders the first page of a PDF to encoded image bytes.
pub trait PdfRasterizer {
    /// `scale` multiplies the page's natural 72 DPI size; `quality` is 0.0..=1.0.
    fn render_first_page(&self, pdf: &[u8], scale: f32, quality: f32) -> anyhow::Result<Vec<u8>>;
}

/// Rasterizer backed by poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct Pdftoppm {
    program: PathBuf,
}

impl Pdftoppm {
    /// Locate `pdftoppm` on the PATH.
    pub fn detect() -> anyhow::Result<Self> {
        let program = PathBuf::from("pdftoppm");
        Command::new(&program)
            .arg("-v")
            .output()
            .context("pdftoppm is not installed or not on PATH")?;
        Ok(Self { program })
    }
}

impl PdfRasterizer for Pdftoppm {
    fn render_first_page(&self, pdf: &[u8], scale: f32, quality: f32) -> anyhow::Result<Vec<u8>> {
        let work = tempfile::tempdir()?;
        let input = work.path().join("input.pdf");
        let prefix = work.path().join("page");
        fs::write(&input, pdf)?;

        let dpi = (72.0 * scale.max(0.1)).round() as u32;
        let quality = (quality.clamp(0.0, 1.0) * 100.0).round() as u32;
        let output = Command::new(&self.program)
            .args(["-f", "1", "-l", "1", "-singlefile", "-jpeg"])
            .arg("-jpegopt")
            .arg(format!("quality={}", quality))
            .arg("-r")
            .arg(dpi.to_string())
            .arg(&input)
            .arg(&prefix)
            .output()
            .context("running pdftoppm")?;
        if !output.status.success() {
            bail!(
                "pdftoppm exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let bytes = fs::read(prefix.with_extension("jpg")).context("reading pdftoppm output")?;
        Ok(bytes)
    }
}

/// The rasterizer selected in settings. Fails if it is not available, so a
/// misconfigured vault is caught at startup rather than on the first PDF.
pub fn rasterizer_for(settings: &ThumbnailSettings) -> anyhow::Result<Option<Box<dyn PdfRasterizer>>> {
    match settings.rasterizer {
        RasterizerKind::None => Ok(None),
        RasterizerKind::Pdftoppm => Ok(Some(Box::new(Pdftoppm::detect()?))),
    }
}

/// Where the cover thumbnail of `file` lives. The path hash keeps PDFs with
/// the same name in different folders apart.
pub fn thumbnail_path(settings: &ThumbnailSettings, file: &VaultFile) -> String {
    let digest = Sha256::digest(file.path.as_bytes());
    let short = &hex::encode(digest)[..8];
    paths::join(&settings.folder, &format!("{}-{}.jpg", file.basename, short))
}
