//! Minimal URI helpers

use std::path::PathBuf;

/// Whether `uri` uses the `file:` scheme
pub fn is_file_url(uri: &str) -> bool {
    uri.len() >= 5 && uri.is_char_boundary(5) && uri[..5].eq_ignore_ascii_case("file:")
}

/// Local path of a `file:` URL
///
/// Accepts `file:p`, `file:/p`, `file:///p` and `file://host/p`.
pub fn file_path(uri: &str) -> Option<PathBuf> {
    if !is_file_url(uri) {
        return None;
    }
    let rest = &uri[5..];
    let path = match rest.strip_prefix("//") {
        Some(authority_and_path) => {
            let slash = authority_and_path.find('/')?;
            &authority_and_path[slash..]
        }
        None => rest,
    };
    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

/// Host part of a URI, used to group pairs by source server
///
/// `file:` URLs and bare paths belong to `localhost`.
pub fn host(uri: &str) -> &str {
    if is_file_url(uri) {
        return "localhost";
    }
    match uri.split_once("://") {
        Some((_, rest)) => {
            let authority = rest.split('/').next().unwrap_or_default();
            let authority = authority.rsplit('@').next().unwrap_or(authority);
            if authority.is_empty() {
                "localhost"
            } else {
                authority
            }
        }
        None => "localhost",
    }
}
