//! Path arithmetic shared by the local (POSIX) and remote (URL) address spaces.
//!
//! Every function branches on "is this a URL" first: URL inputs keep their
//! scheme and host and only the path component is manipulated, everything
//! else is treated as a POSIX path.

use url::Url;

use crate::error::StorageError;

const RESERVED_CHARS: [char; 6] = ['*', '?', '"', '<', '>', '|'];

/// Parse `s` as an absolute, hierarchical URL.
///
/// Windows drive letters (`C:\`) and opaque URLs (`mailto:`) are rejected.
pub fn parse_url(s: &str) -> Option<Url> {
    let url = Url::parse(s).ok()?;
    if url.scheme().len() < 2 || url.cannot_be_a_base() {
        return None;
    }
    Some(url)
}

pub fn is_url(s: &str) -> bool {
    parse_url(s).is_some()
}

/// Absolute filesystem path: POSIX root, Windows drive, or UNC share.
pub fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/')
        || path.starts_with("\\\\")
        || (bytes.len() >= 3
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && (bytes[2] == b'/' || bytes[2] == b'\\'))
}

/// Strip trailing slashes, keeping a lone root.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Resolve `.` and `..` segments and collapse separators.
pub fn normalize_posix(path: &str) -> String {
    let path = path.replace('\\', "/");
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(last) if *last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Join path parts.
///
/// When the first part is a URL, the remaining parts are joined onto its
/// path component. The base URL's query and fragment are discarded.
pub fn join(parts: &[&str]) -> String {
    let Some((first, rest)) = parts.split_first() else {
        return String::new();
    };
    if let Some(mut url) = parse_url(first) {
        let mut segments: Vec<String> = vec![url.path().to_string()];
        segments.extend(rest.iter().map(|p| p.to_string()));
        let refs: Vec<&str> = segments.iter().map(String::as_str).collect();
        let path = posix_join(&refs);
        url.set_path(&path);
        url.set_query(None);
        url.set_fragment(None);
        return url.to_string();
    }
    posix_join(parts)
}

fn posix_join(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        return ".".to_string();
    }
    normalize_posix(&joined)
}

/// Join designed for HTTP addresses given as plain strings.
///
/// Duplicate slashes are collapsed (except after the scheme). A part that
/// carries a query or fragment ends the join.
pub fn http_join(parts: &[&str]) -> String {
    let Some((first, rest)) = parts.split_first() else {
        return String::new();
    };
    let mut result = first.trim_end_matches('/').to_string();
    for part in rest {
        let part = part.trim_matches('/');
        if part.is_empty() {
            continue;
        }
        result.push('/');
        result.push_str(part);
        if part.contains('?') || part.contains('#') {
            break;
        }
    }
    collapse_slashes(&result)
}

fn collapse_slashes(s: &str) -> String {
    let (prefix, rest) = match s.find("://") {
        Some(idx) => s.split_at(idx + 3),
        None => ("", s),
    };
    let mut out = String::with_capacity(s.len());
    out.push_str(prefix);
    let mut prev_slash = false;
    for c in rest.chars() {
        if c == '/' && prev_slash {
            continue;
        }
        prev_slash = c == '/';
        out.push(c);
    }
    out
}

/// Byte offset where the path of a URL string starts (after `scheme://host`).
fn url_path_start(s: &str) -> usize {
    let after_scheme = s.find("://").map(|i| i + 3).unwrap_or(0);
    s[after_scheme..]
        .find('/')
        .map(|i| after_scheme + i)
        .unwrap_or(s.len())
}

fn strip_query_and_fragment(s: &str) -> &str {
    let end = s.find(['?', '#']).unwrap_or(s.len());
    &s[..end]
}

/// Parent directory.
pub fn dirname(path: &str) -> String {
    if is_url(path) {
        let base = strip_query_and_fragment(path).trim_end_matches('/');
        let start = url_path_start(base);
        return match base[start..].rfind('/') {
            Some(idx) => base[..start + idx].to_string(),
            None => base.to_string(),
        };
    }
    let normalized = normalize(path);
    if normalized == "/" {
        return "/".to_string();
    }
    match normalized.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
        None => ".".to_string(),
    }
}

/// Final component, percent-decoded for URLs.
pub fn filename(path: &str) -> String {
    if let Some(url) = parse_url(path) {
        let last = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .unwrap_or_default();
        return urlencoding::decode(last)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| last.to_string());
    }
    let normalized = normalize(&path.replace('\\', "/"));
    if normalized == "/" {
        return String::new();
    }
    normalized
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Extension including the dot, empty when there is none.
///
/// A leading dot (`.bashrc`) does not start an extension.
pub fn extname(path: &str) -> String {
    let name = filename(path);
    match name.rfind('.') {
        Some(0) | None => String::new(),
        Some(idx) => name[idx..].to_string(),
    }
}

/// File name without its extension.
pub fn stem(path: &str) -> String {
    let name = filename(path);
    let ext = extname(path);
    name[..name.len() - ext.len()].to_string()
}

/// Relative path from `base` to `target`.
///
/// Two URLs must share an origin; only their path components are compared.
pub fn relative(base: &str, target: &str) -> Result<String, StorageError> {
    match (parse_url(base), parse_url(target)) {
        (Some(base_url), Some(target_url)) => {
            if base_url.origin() != target_url.origin() {
                return Err(StorageError::CrossOrigin(format!(
                    "{} and {}",
                    base_url.origin().ascii_serialization(),
                    target_url.origin().ascii_serialization()
                )));
            }
            let base_path = decode_path(base_url.path());
            let target_path = decode_path(target_url.path());
            Ok(posix_relative(&base_path, &target_path))
        }
        (None, None) => Ok(posix_relative(base, target)),
        _ => Err(StorageError::CrossOrigin(format!(
            "cannot relate {} to {}",
            base, target
        ))),
    }
}

fn decode_path(path: &str) -> String {
    urlencoding::decode(path)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| path.to_string())
}

fn posix_relative(base: &str, target: &str) -> String {
    let base = normalize_posix(base);
    let target = normalize_posix(target);
    let base_segments: Vec<&str> = base.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    let target_segments: Vec<&str> = target.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    let common = base_segments
        .iter()
        .zip(target_segments.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut out: Vec<&str> = std::iter::repeat("..")
        .take(base_segments.len() - common)
        .collect();
    out.extend(&target_segments[common..]);
    out.join("/")
}

/// True for references that are neither absolute paths nor URLs and carry
/// no reserved characters.
pub fn is_relative_path(path: &str) -> bool {
    !path.contains(':')
        && !path.contains(RESERVED_CHARS)
        && !is_absolute(path)
        && !is_url(path)
}

/// A file path free of reserved characters.
pub fn is_valid_file_path(path: &str) -> bool {
    !path.contains(RESERVED_CHARS)
}

/// Whether `target` equals or lies under `base` (case-insensitive, on a
/// segment boundary).
pub fn is_sub_path(base: &str, target: &str) -> bool {
    let base = base.trim_end_matches('/').to_lowercase();
    let target = target.trim_end_matches('/').to_lowercase();
    match target.strip_prefix(&base) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || base.is_empty(),
        None => false,
    }
}

/// Suffix of `full` below `base`, `None` when `full` is not under `base`.
pub fn relative_http_path(base: &str, full: &str) -> Option<String> {
    let base = base.trim_end_matches('/');
    let full = full.trim_end_matches('/');
    let rest = full.strip_prefix(base)?;
    if rest.is_empty() {
        Some(String::new())
    } else {
        rest.strip_prefix('/').map(str::to_string)
    }
}

/// Both strings are URLs with the same origin.
pub fn is_same_origin(a: &str, b: &str) -> bool {
    match (parse_url(a), parse_url(b)) {
        (Some(a), Some(b)) => a.origin() == b.origin(),
        _ => false,
    }
}
