use unicode_normalization::UnicodeNormalization;

/// Canonical vault-relative form: forward slashes, no leading/trailing
/// slashes, surrounding whitespace trimmed.
pub fn normalize(path: &str) -> String {
    path.trim()
        .replace('\\', "/")
        .trim_matches('/')
        .trim()
        .to_string()
}

/// Case- and normalization-insensitive key for path comparisons.
/// macOS hands out NFD names, so fold to NFC before lowering.
pub fn fold(path: &str) -> String {
    normalize(path).nfc().collect::<String>().to_lowercase()
}

pub fn same_path(a: &str, b: &str) -> bool {
    fold(a) == fold(b)
}

/// True if `folder` is empty (unrestricted), or `file` is the folder itself
/// or lies anywhere below it.
pub fn is_within(file: &str, folder: &str) -> bool {
    let folder = fold(folder);
    if folder.is_empty() {
        return true;
    }
    let file = fold(file);
    if file.is_empty() {
        return false;
    }
    file == folder || file.starts_with(&format!("{}/", folder))
}

/// Join a folder and a name, omitting the folder segment when empty.
pub fn join(folder: &str, name: &str) -> String {
    let folder = normalize(folder);
    let name = normalize(name);
    if folder.is_empty() {
        name
    } else if name.is_empty() {
        folder
    } else {
        format!("{}/{}", folder, name)
    }
}

/// Parent folder of a vault path ("" for top-level entries).
pub fn parent(path: &str) -> String {
    let path = normalize(path);
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

/// Last path segment.
pub fn file_name(path: &str) -> String {
    let path = normalize(path);
    match path.rfind('/') {
        Some(idx) => path[idx + 1..].to_string(),
        None => path,
    }
}

/// Split a file name into (stem, extension). Dotfiles keep their leading dot
/// in the stem and have no extension.
pub fn split_name(name: &str) -> (String, String) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (name[..idx].to_string(), name[idx + 1..].to_string()),
        _ => (name.to_string(), String::new()),
    }
}

/// Ancestor chain of a folder, shortest first: "a/b/c" -> ["a", "a/b", "a/b/c"].
pub fn ancestors(folder: &str) -> Vec<String> {
    let folder = normalize(folder);
    let mut out = Vec::new();
    let mut current = String::new();
    for segment in folder.split('/').filter(|s| !s.is_empty()) {
        current = join(&current, segment);
        out.push(current.clone());
    }
    out
}

/// Resolve `.` and `..` segments of `link` relative to `folder`.
/// Returns None if the link climbs above the vault root.
pub fn resolve_relative(folder: &str, link: &str) -> Option<String> {
    let mut segments: Vec<String> = normalize(folder)
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    for part in normalize(link).split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other.to_string()),
        }
    }
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  \\Media\\Images\\ "), "Media/Images");
        assert_eq!(normalize("/notes/"), "notes");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("Assets/photo.png", ""));
        assert!(is_within("assets/photo.png", "Assets"));
        assert!(is_within("Assets", "assets/"));
        assert!(!is_within("AssetsOld/photo.png", "Assets"));
        assert!(!is_within("", "Assets"));
    }

    #[test]
    fn test_join_and_parent() {
        assert_eq!(join("", "IMG-photo.md"), "IMG-photo.md");
        assert_eq!(join("notes/", "IMG-photo.md"), "notes/IMG-photo.md");
        assert_eq!(parent("a/b/c.png"), "a/b");
        assert_eq!(parent("c.png"), "");
        assert_eq!(file_name("a/b/c.png"), "c.png");
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("photo.tar.gz"), ("photo.tar".into(), "gz".into()));
        assert_eq!(split_name(".hidden"), (".hidden".into(), String::new()));
        assert_eq!(split_name("README"), ("README".into(), String::new()));
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors("a/b/c"), vec!["a", "a/b", "a/b/c"]);
        assert!(ancestors("").is_empty());
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(resolve_relative("notes/media", "../assets/x.png").as_deref(), Some("notes/assets/x.png"));
        assert_eq!(resolve_relative("", "./x.png").as_deref(), Some("x.png"));
        assert_eq!(resolve_relative("", "../x.png"), None);
    }
}
