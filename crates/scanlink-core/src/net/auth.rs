//! Resource authorization.
//!
//! When a reply carries a non-empty resource string the daemon wants
//! credentials for that resource. If the resource ends in `$MD5$<salt>`
//! the password is never sent in clear: the client sends
//! `$MD5$` followed by the hex MD5 digest of `salt + password`, and the
//! resource with the marker stripped.

use md5::{Digest, Md5};

/// Marker introducing the salt of a secure-password challenge
pub const MD5_MARKER: &str = "$MD5$";

/// User name and password passed through to the daemon
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// User name (empty when unknown)
    pub username: String,
    /// Password (empty when unknown)
    pub password: String,
}

impl Credentials {
    /// Creates credentials from optional parts, defaulting to empty strings
    pub fn new(username: Option<&str>, password: Option<&str>) -> Self {
        Self {
            username: username.unwrap_or_default().to_string(),
            password: password.unwrap_or_default().to_string(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Resource and password as they go on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AuthReply {
    pub(crate) resource: String,
    pub(crate) password: String,
}

/// Derives the resource/password pair for a challenge
pub(crate) fn answer_challenge(resource: &str, password: &str) -> AuthReply {
    // ASCII lowercasing keeps byte offsets intact
    let marker = MD5_MARKER.to_ascii_lowercase();
    match resource.to_ascii_lowercase().rfind(&marker) {
        Some(at) => {
            let salt = &resource[at + MD5_MARKER.len()..];
            let digest = md5_hex(&format!("{}{}", salt, password));
            AuthReply {
                resource: resource[..at].to_string(),
                password: format!("{}{}", MD5_MARKER, digest),
            }
        }
        None => AuthReply {
            resource: resource.to_string(),
            password: password.to_string(),
        },
    }
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}
