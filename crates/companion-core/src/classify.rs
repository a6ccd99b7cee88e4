use crate::media::{MediaKind, VaultFile};
use crate::paths;
use crate::settings::Settings;

/// Map a file to its media kind by extension. Image wins over pdf, pdf over
/// other. None means the file is not managed at all.
pub fn classify(file: &VaultFile, settings: &Settings) -> Option<MediaKind> {
    if file.extension.is_empty() || is_generated(file, settings) {
        return None;
    }
    let ext = file.extension.to_lowercase();
    MediaKind::ALL
        .into_iter()
        .find(|kind| settings.kind(*kind).extensions.iter().any(|e| *e == ext))
}

/// Whether automatic triggers may act on `file` for `kind`.
/// An empty whitelist places no restriction.
pub fn is_eligible(file: &VaultFile, kind: MediaKind, settings: &Settings) -> bool {
    let folders = &settings.kind(kind).source_folders;
    folders.is_empty() || folders.iter().any(|folder| paths::is_within(&file.path, folder))
}

/// Cover thumbnails are images we wrote ourselves; never give them notes.
fn is_generated(file: &VaultFile, settings: &Settings) -> bool {
    let folder = &settings.thumbnails.folder;
    !folder.is_empty() && paths::is_within(&file.path, folder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_priority() {
        let mut settings = Settings::default();
        settings.other.extensions.push("png".into());

        assert_eq!(classify(&VaultFile::new("a/photo.PNG", 1), &settings), Some(MediaKind::Image));
        assert_eq!(classify(&VaultFile::new("paper.pdf", 1), &settings), Some(MediaKind::Pdf));
        assert_eq!(classify(&VaultFile::new("sheet.xlsx", 1), &settings), Some(MediaKind::Other));
        assert_eq!(classify(&VaultFile::new("note.md", 1), &settings), None);
        assert_eq!(classify(&VaultFile::new("Makefile", 1), &settings), None);
    }

    #[test]
    fn test_thumbnails_are_ignored() {
        let settings = Settings::default();
        let thumb = VaultFile::new("attachments/thumbnails/paper-0a1b2c3d.jpg", 1);
        assert_eq!(classify(&thumb, &settings), None);
    }

    #[test]
    fn test_eligibility() {
        let mut settings = Settings::default();
        let file = VaultFile::new("Camera/2024/vacation.jpg", 1);
        assert!(is_eligible(&file, MediaKind::Image, &settings));

        settings.image.source_folders = vec!["camera".into()];
        assert!(is_eligible(&file, MediaKind::Image, &settings));

        settings.image.source_folders = vec!["Scans".into(), "Cam".into()];
        assert!(!is_eligible(&file, MediaKind::Image, &settings));
        // other kinds keep their own whitelist
        assert!(is_eligible(&file, MediaKind::Pdf, &settings));
    }
}
