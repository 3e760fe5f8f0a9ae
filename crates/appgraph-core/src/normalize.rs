//! Path, action, namespace and database-name normalisation.
//!
//! Every string comparison the linker makes between facts from different files
//! goes through one of these functions first.

use std::sync::LazyLock;

use regex::Regex;

static DRIVE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z]:").unwrap());

static MULTI_SLASH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/{2,}").unwrap());

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\d+)\}").unwrap());

const ACTION_SUFFIXES: &[&str] = &[".action", ".do", ".html", ".htm"];

const JSP_EXTENSIONS: &[&str] = &[".jsp", ".jspx", ".jspf"];

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

fn slashes(raw: &str) -> String {
    let forward = raw.trim().replace('\\', "/");
    MULTI_SLASH_RE.replace_all(&forward, "/").into_owned()
}

/// Canonical project-relative form: forward slashes, no drive letter, no
/// leading `./` or `/`, and `project_root` stripped when it prefixes the path.
pub fn normalize_path(raw: &str, project_root: Option<&str>) -> String {
    let mut path = DRIVE_RE.replace(&slashes(raw), "").into_owned();

    if let Some(root) = project_root {
        let root = DRIVE_RE.replace(&slashes(root), "").into_owned();
        let root = root.trim_end_matches('/');
        if !root.is_empty() {
            if let Some(rest) = path.strip_prefix(root) {
                if rest.is_empty() || rest.starts_with('/') {
                    path = rest.to_string();
                }
            }
        }
    }

    let mut trimmed = path.as_str();
    loop {
        if let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest;
        } else if let Some(rest) = trimmed.strip_prefix('/') {
            trimmed = rest;
        } else {
            break;
        }
    }
    trimmed.to_string()
}

pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn has_jsp_extension(path: &str) -> bool {
    let lower = path.to_lowercase();
    JSP_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Strip query string and fragment, then give extension-less view names a
/// `.jsp` extension.
pub fn ensure_jsp_extension(path: &str) -> String {
    let cut = path.find(['?', '#']).map(|i| &path[..i]).unwrap_or(path);
    let cut = cut.trim();
    if cut.is_empty() || has_jsp_extension(cut) {
        return cut.to_string();
    }
    if basename(cut).contains('.') {
        cut.to_string()
    } else {
        format!("{cut}.jsp")
    }
}

/// Resolve `target` relative to the directory of `page`, folding `.` and
/// `..` segments. Absolute targets are returned normalised but unchanged.
pub fn resolve_relative(page: &str, target: &str) -> String {
    let target = slashes(target);
    if target.starts_with('/') {
        return normalize_path(&target, None);
    }
    let mut segments: Vec<&str> = page.split('/').filter(|s| !s.is_empty()).collect();
    segments.pop();
    for part in target.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Path without its JSP extension; the key behind `jsp_<stem>` ids.
pub fn jsp_stem(path: &str) -> &str {
    let lower = path.to_lowercase();
    for ext in JSP_EXTENSIONS {
        if lower.ends_with(ext) {
            return &path[..path.len() - ext.len()];
        }
    }
    path
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Strip wildcards and surrounding slashes from a Struts namespace.
pub fn normalize_namespace(raw: &str) -> String {
    let without_wildcards = raw.replace('*', "");
    slashes(&without_wildcards).trim_matches('/').to_string()
}

/// Strip the leading slash (and a leading `*/` segment) from an action path
/// and collapse repeated slashes. Trailing wildcards are kept.
pub fn normalize_action(raw: &str) -> String {
    let collapsed = slashes(raw);
    let mut action = collapsed.trim_start_matches('/');
    while let Some(rest) = action.strip_prefix("*/") {
        action = rest.trim_start_matches('/');
    }
    action.to_string()
}

/// `namespace/action`, or just the action in the default namespace.
pub fn route_path(namespace: &str, action: &str) -> String {
    if namespace.is_empty() {
        action.to_string()
    } else {
        format!("{namespace}/{action}")
    }
}

/// Normalise the target of an in-page action invocation: leading slash, query
/// string, fragment and framework suffix removed.
pub fn normalize_action_target(raw: &str) -> String {
    let cut = raw.find(['?', '#', ';']).map(|i| &raw[..i]).unwrap_or(raw);
    let mut target = normalize_action(cut);
    let lower = target.to_lowercase();
    for suffix in ACTION_SUFFIXES {
        if lower.ends_with(suffix) {
            target.truncate(target.len() - suffix.len());
            break;
        }
    }
    target.trim_end_matches('/').to_string()
}

pub fn is_placeholder(method: &str) -> bool {
    method.contains('{') || method.contains('}')
}

pub fn has_wildcard(pattern: &str) -> bool {
    pattern.contains('*')
}

/// Anchored regex for a wildcard action pattern: `**` captures across
/// segments, `*` within one segment.
pub fn wildcard_regex(pattern: &str) -> Option<Regex> {
    let mut out = String::from("^");
    let mut rest = pattern;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("**") {
            out.push_str("(.*)");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('*') {
            out.push_str("([^/]*)");
            rest = tail;
        } else {
            let next = rest.find('*').unwrap_or(rest.len());
            out.push_str(&regex::escape(&rest[..next]));
            rest = &rest[next..];
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

/// Substitute `{N}` placeholders with captured groups (`{0}` is the whole
/// match). Returns `None` if any brace survives substitution.
pub fn substitute_placeholders(template: &str, captures: &[&str]) -> Option<String> {
    let substituted = PLACEHOLDER_RE.replace_all(template, |caps: &regex::Captures<'_>| {
        let index: usize = caps[1].parse().unwrap_or(usize::MAX);
        match captures.get(index) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        }
    });
    if is_placeholder(&substituted) || substituted.trim().is_empty() {
        None
    } else {
        Some(substituted.into_owned())
    }
}

// ---------------------------------------------------------------------------
// Database object names
// ---------------------------------------------------------------------------

/// Remove `[]`, `"` and backtick quoting from every name part.
pub fn strip_sql_quotes(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | '"' | '`'))
        .collect()
}

/// `schema.name` with quoting removed; catalog prefixes beyond the schema are
/// dropped (`db.dbo.proc` → `dbo.proc`).
pub fn canonical_object_name(raw: &str) -> String {
    let stripped = strip_sql_quotes(raw);
    let parts: Vec<&str> = stripped.split('.').filter(|p| !p.is_empty()).collect();
    match parts.len() {
        0 => String::new(),
        1 => parts[0].to_string(),
        n => format!("{}.{}", parts[n - 2], parts[n - 1]),
    }
}

/// Split into `(schema, name)`.
pub fn split_qualified(raw: &str) -> (Option<String>, String) {
    let canonical = canonical_object_name(raw);
    match canonical.split_once('.') {
        Some((schema, name)) => (Some(schema.to_string()), name.to_string()),
        None => (None, canonical),
    }
}

pub fn unqualified_name(raw: &str) -> String {
    split_qualified(raw).1
}

/// Case-insensitive lookup key.
pub fn object_key(raw: &str) -> String {
    canonical_object_name(raw).to_lowercase()
}
