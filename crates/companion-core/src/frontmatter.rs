use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

/// Scalar frontmatter values keyed by property name.
pub type Frontmatter = BTreeMap<String, String>;

static BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\A\u{feff}?---[ \t]*\r?\n(.*?)\r?\n---[ \t]*(?:\r?\n|\z)").unwrap());
static LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([^:#\s][^:]*?)\s*:\s*(.*?)\s*$").unwrap());

/// The raw YAML between the leading `---` fences, if any.
pub fn yaml_block(content: &str) -> Option<&str> {
    BLOCK_RE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Parse the leading frontmatter into scalar values. Sequences and mappings
/// are left out, as are documents that do not parse.
pub fn parse(content: &str) -> Option<Frontmatter> {
    let yaml = yaml_block(content)?;
    let mapping: serde_yaml::Mapping = match serde_yaml::from_str(yaml) {
        Ok(serde_yaml::Value::Mapping(m)) => m,
        Ok(_) => return Some(Frontmatter::new()),
        Err(e) => {
            tracing::debug!(error = %e, "frontmatter is not valid YAML");
            return None;
        }
    };

    let mut out = Frontmatter::new();
    for (key, value) in mapping {
        let Some(key) = scalar(&key) else { continue };
        if let Some(value) = scalar(&value) {
            out.insert(key, value);
        }
    }
    Some(out)
}

fn scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Case-insensitive property lookup.
pub fn property<'a>(frontmatter: &'a Frontmatter, key: &str) -> Option<&'a str> {
    frontmatter
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Line-based scan of the raw frontmatter block. Works on text that is not
/// valid YAML, such as an unquoted `url: [[photo.png]]`.
pub fn raw_property(content: &str, key: &str) -> Option<String> {
    let yaml = yaml_block(content)?;
    yaml.lines().find_map(|line| {
        let caps = LINE_RE.captures(line)?;
        if caps[1].eq_ignore_ascii_case(key) {
            Some(caps[2].to_string())
        } else {
            None
        }
    })
}

/// Strip whitespace and one pair of matching surrounding quotes.
pub fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].trim();
        }
    }
    value
}
