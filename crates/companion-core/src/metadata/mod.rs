pub mod exif;
pub mod pdf;

use chrono::NaiveDate;

use crate::media::VaultFile;
use crate::template::Substitutions;

/// Substitutions every kind gets, independent of file content.
pub fn file_substitutions(file: &VaultFile, duplicate: bool, today: NaiveDate) -> Substitutions {
    let mut subs = Substitutions::new();
    subs.insert("date".into(), today.format("%Y-%m-%d").to_string());
    subs.insert("url".into(), file.path.clone());
    subs.insert("duplicate".into(), duplicate.to_string());
    subs.insert("basename".into(), file.basename.clone());
    subs.insert("extension".into(), file.extension.to_lowercase());
    subs.insert("folder".into(), file.parent.clone());
    subs.insert("filesize".into(), format_size(file.size));
    subs.insert("cover".into(), String::new());
    subs
}

/// Human-readable size, binary units.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
