use crate::error::AuthError;
use crate::types::message::UserId;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

/// Claims carried in the credential's payload segment. Only the fields
/// needed to identify the user are decoded; everything else is opaque.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub spotify_id: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Claims {
    /// The stable subject identifier. The match service issues tokens
    /// with a `spotify_id` claim; standard tokens carry `sub`. A
    /// present-but-empty claim counts as absent.
    pub fn subject(&self) -> Option<&str> {
        self.spotify_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.sub.as_deref().filter(|s| !s.is_empty()))
    }
}

/// Decodes the claim set from a three-segment bearer token. The
/// signature is not verified here; the server rejects tampered tokens,
/// and the client only needs the subject to address its own requests.
pub fn decode_claims(credential: &str) -> Result<Claims, AuthError> {
    let mut segments = credential.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(AuthError::Malformed(
            "expected three dot-separated segments",
        ));
    };

    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| AuthError::Malformed("payload segment is not base64url"))?;

    serde_json::from_slice(&decoded)
        .map_err(|_| AuthError::Malformed("payload is not a valid claim set"))
}

/// Resolves a credential to the user id it identifies. Deterministic:
/// the same credential always yields the same id.
pub fn resolve_user_id(credential: &str) -> Result<UserId, AuthError> {
    let claims = decode_claims(credential)?;
    claims
        .subject()
        .map(UserId::new)
        .ok_or(AuthError::Malformed("no subject claim"))
}
