//! Session-join collaborator.
//!
//! During the encryption response the relay must prove to the session
//! backend that this player is joining the target server, exactly as the
//! real client would have. The call is synchronous and happens once per
//! session; a failure is reported but never aborts the session; the remote
//! server decides on its own whether to kick the client.

use serde::Serialize;
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::error::{RelayError, Result};

/// Default session-join endpoint.
pub const SESSION_JOIN_ENDPOINT: &str = "https://sessionserver.mojang.com/session/minecraft/join";

/// Backend that witnesses a client joining a server.
pub trait SessionService: Send + Sync {
    /// Report the join. Returns the backend's HTTP status; transport
    /// failures are mapped to [`RelayError::Auth`] with status 0.
    fn join_server(
        &self,
        access_token: &str,
        profile_id: Uuid,
        server_id: &str,
        server_public_key: &[u8],
        shared_secret: &[u8],
    ) -> Result<u16>;
}

/// The digest the backend expects: SHA-1 over the server id bytes, the
/// shared secret, and the server's DER public key, rendered the way Java's
/// `BigInteger.toString(16)` renders a signed big-endian integer.
pub fn server_hash(server_id: &str, shared_secret: &[u8], server_public_key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(server_id.as_bytes());
    hasher.update(shared_secret);
    hasher.update(server_public_key);
    java_hex_digest(hasher.finalize().into())
}

/// Signed-magnitude lowercase hex without leading zeros: negative digests
/// (high bit set) are rendered as the two's complement magnitude with a
/// `-` prefix.
fn java_hex_digest(mut digest: [u8; 20]) -> String {
    use std::fmt::Write;

    let negative = digest[0] & 0x80 != 0;

    if negative {
        let mut carry = true;
        for byte in digest.iter_mut().rev() {
            *byte = !*byte;
            if carry {
                let (value, overflow) = byte.overflowing_add(1);
                *byte = value;
                carry = overflow;
            }
        }
    }

    let mut hex = String::with_capacity(41);
    if negative {
        hex.push('-');
    }

    let mut leading = true;
    for byte in digest {
        if leading && byte == 0 {
            continue;
        }
        if leading {
            // the first significant byte drops its own leading zero nibble
            let _ = write!(hex, "{byte:x}");
            leading = false;
        } else {
            let _ = write!(hex, "{byte:02x}");
        }
    }
    if leading {
        hex.push('0');
    }

    hex
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequest<'a> {
    access_token: &'a str,
    selected_profile: String,
    server_id: String,
}

/// HTTP implementation of [`SessionService`].
pub struct HttpSessionService {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpSessionService {
    /// Service against the default endpoint.
    pub fn new() -> Self {
        Self::with_endpoint(SESSION_JOIN_ENDPOINT)
    }

    /// Service against a custom endpoint (tests, third-party backends).
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl Default for HttpSessionService {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionService for HttpSessionService {
    fn join_server(
        &self,
        access_token: &str,
        profile_id: Uuid,
        server_id: &str,
        server_public_key: &[u8],
        shared_secret: &[u8],
    ) -> Result<u16> {
        let request = JoinRequest {
            access_token,
            selected_profile: profile_id.simple().to_string(),
            server_id: server_hash(server_id, shared_secret, server_public_key),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|e| {
                tracing::debug!("session-join transport failure: {e}");
                RelayError::Auth { status: 0 }
            })?;

        Ok(response.status().as_u16())
    }
}

/// Service that never contacts a backend; for offline servers and tests.
pub struct NoopSessionService;

impl SessionService for NoopSessionService {
    fn join_server(&self, _: &str, _: Uuid, _: &str, _: &[u8], _: &[u8]) -> Result<u16> {
        Ok(204)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference digests published with the proxied protocol.
    #[test]
    fn test_server_hash_known_vectors() {
        assert_eq!(
            server_hash("Notch", &[], &[]),
            "4ed1f46bbe04bc756bcb17c0c7ce3e4632f06a48"
        );
        assert_eq!(
            server_hash("jeb_", &[], &[]),
            "-7c9d5b0044c130109a5d7b5fb5c317c02b4e28c1"
        );
        assert_eq!(
            server_hash("simon", &[], &[]),
            "88e16a1019277b15d58faf0541e11910eb756f6"
        );
    }

    #[test]
    fn test_hash_covers_all_inputs() {
        let base = server_hash("", &[1, 2, 3], &[4, 5, 6]);
        assert_ne!(base, server_hash("x", &[1, 2, 3], &[4, 5, 6]));
        assert_ne!(base, server_hash("", &[1, 2, 4], &[4, 5, 6]));
        assert_ne!(base, server_hash("", &[1, 2, 3], &[4, 5, 7]));
    }

    #[test]
    fn test_java_hex_digest_zero() {
        assert_eq!(java_hex_digest([0u8; 20]), "0");
    }

    #[test]
    fn test_join_request_body_shape() {
        let request = JoinRequest {
            access_token: "token-123",
            selected_profile: Uuid::parse_str("f81d4fae-7dec-11d0-a765-00a0c91e6bf6")
                .unwrap()
                .simple()
                .to_string(),
            server_id: server_hash("", &[], &[]),
        };

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["accessToken"], "token-123");
        // the profile id travels undashed
        assert_eq!(body["selectedProfile"], "f81d4fae7dec11d0a76500a0c91e6bf6");
        assert!(body["serverId"].is_string());
    }

    #[test]
    fn test_noop_service_reports_success() {
        let status = NoopSessionService
            .join_server("token", Uuid::nil(), "", &[], &[])
            .unwrap();
        assert!((200..300).contains(&status));
    }
}
