//! Domain types for the client registry.
//!
//! All path fields use `PathBuf`; identifiers are validated newtypes that can
//! only be built through [`ClientId::parse`] (or its `FromStr`/serde twins).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvalidClientId;

/// Length of a client identifier: 32 hex digits plus four hyphens.
pub const CLIENT_ID_LEN: usize = 36;

/// Byte offsets that must hold a `-` in a client identifier.
const HYPHEN_OFFSETS: [usize; 4] = [8, 13, 18, 23];

/// Remote root used when the configuration does not name one.
pub const DEFAULT_REMOTE_ROOT: &str = "databases";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Canonical client identifier (`xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`).
///
/// Hex digits are accepted in either case and stored lower-case, so the
/// same client always maps to the same registry key and remote locator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId(String);

impl ClientId {
    /// Validate `raw` and return its canonical form, or `None` if it is not
    /// a client identifier. Never coerces.
    pub fn parse(raw: &str) -> Option<Self> {
        let bytes = raw.as_bytes();
        if bytes.len() != CLIENT_ID_LEN {
            return None;
        }
        let well_formed = bytes.iter().enumerate().all(|(i, b)| {
            if HYPHEN_OFFSETS.contains(&i) {
                *b == b'-'
            } else {
                b.is_ascii_hexdigit()
            }
        });
        well_formed.then(|| Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ClientId {
    type Err = InvalidClientId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| InvalidClientId(s.to_owned()))
    }
}

impl TryFrom<String> for ClientId {
    type Error = InvalidClientId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ClientId> for String {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

/// Deterministic remote location of a client's replica: `<root>/<client-id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteLocator(String);

impl RemoteLocator {
    /// Pure function of `(root, identity)`; surrounding slashes on `root` are ignored.
    pub fn for_client(root: &str, identity: &ClientId) -> Self {
        let root = root.trim_matches('/');
        if root.is_empty() {
            Self(identity.to_string())
        } else {
            Self(format!("{root}/{identity}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Locator segments, for joining onto a local replica root.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for RemoteLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One registered client. Owned exclusively by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub identity: ClientId,
    pub file_path: PathBuf,
    pub registered_at: DateTime<Utc>,
}

/// Read-only copy of a record, as handed out by
/// [`ClientRegistry::snapshot`](crate::ClientRegistry::snapshot).
///
/// Serialized keys follow the status API (`clientId`, `databasePath`, …).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientView {
    #[serde(rename = "clientId")]
    pub identity: ClientId,
    #[serde(rename = "databasePath")]
    pub file_path: PathBuf,
    #[serde(rename = "remotePath")]
    pub remote_locator: RemoteLocator,
    #[serde(rename = "createdAt")]
    pub registered_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "a1b2c3d4-0000-0000-0000-000000000001";

    #[test]
    fn parse_accepts_well_formed_token() {
        let id = ClientId::parse(ID).expect("valid id");
        assert_eq!(id.as_str(), ID);
    }

    #[test]
    fn parse_lowercases_hex_digits() {
        let id = ClientId::parse("A1B2C3D4-ABCD-EF01-2345-6789ABCDEF01").expect("valid id");
        assert_eq!(id.to_string(), "a1b2c3d4-abcd-ef01-2345-6789abcdef01");
    }

    #[test]
    fn from_str_reports_invalid_token() {
        let err = "nope".parse::<ClientId>().unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn serde_revalidates_on_deserialize() {
        let ok: ClientId = serde_json::from_str(&format!("\"{ID}\"")).expect("deserialize");
        assert_eq!(ok.as_str(), ID);
        assert!(serde_json::from_str::<ClientId>("\"not-a-guid\"").is_err());
    }

    #[test]
    fn locator_is_root_slash_identity() {
        let id = ClientId::parse(ID).unwrap();
        assert_eq!(
            RemoteLocator::for_client("databases", &id).as_str(),
            format!("databases/{ID}")
        );
        assert_eq!(
            RemoteLocator::for_client("/backups/prod/", &id).as_str(),
            format!("backups/prod/{ID}")
        );
        assert_eq!(RemoteLocator::for_client("", &id).as_str(), ID);
    }

    #[test]
    fn locator_segments_skip_empty_parts() {
        let id = ClientId::parse(ID).unwrap();
        let locator = RemoteLocator::for_client("a/b", &id);
        let segments: Vec<_> = locator.segments().collect();
        assert_eq!(segments, vec!["a", "b", ID]);
    }

    #[test]
    fn client_view_uses_status_api_keys() {
        let id = ClientId::parse(ID).unwrap();
        let view = ClientView {
            remote_locator: RemoteLocator::for_client(DEFAULT_REMOTE_ROOT, &id),
            identity: id,
            file_path: PathBuf::from("/data/x.db"),
            registered_at: Utc::now(),
        };
        let json = serde_json::to_value(&view).expect("serialize");
        assert_eq!(json["clientId"], ID);
        assert_eq!(json["databasePath"], "/data/x.db");
        assert_eq!(json["remotePath"], format!("databases/{ID}"));
        assert!(json.get("createdAt").is_some());
    }
}
