//! Filename → client classification.
//!
//! Pure functions, no I/O. A file is a client database when its extension is
//! in the allow-list *and* its stem is a well-formed [`ClientId`].

use std::path::Path;

use crate::types::ClientId;

/// Database-file extensions considered when no allow-list is configured.
pub const DEFAULT_EXTENSIONS: [&str; 3] = ["db", "sqlite", "sqlite3"];

/// Owned copy of [`DEFAULT_EXTENSIONS`], for config defaults.
pub fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect()
}

/// Derive the client identity from `path`'s base name without its extension.
///
/// Returns `None` for anything that is not a client file; callers ignore those.
pub fn extract_identity(path: &Path) -> Option<ClientId> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(ClientId::parse)
}

/// True when `path`'s extension is in `allowed` (case-insensitive, leading
/// dots in the allow-list are tolerated).
pub fn is_database_file(path: &Path, allowed: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    allowed
        .iter()
        .any(|candidate| candidate.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

/// File name a client database is expected to have: `<client-id>.<ext>`.
pub fn client_file_name(identity: &ClientId, ext: &str) -> String {
    format!("{identity}.{}", ext.trim_start_matches('.'))
}
