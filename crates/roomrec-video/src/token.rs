//! Access tokens for joining a room.
//!
//! Tokens are HS256 JWTs signed with an API key secret, in the layout the
//! platform's client SDKs expect: a `twilio-fpa;v=1` content type header,
//! the API key as issuer, the account as subject, and a `grants` object
//! naming the identity and the room it may join.

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::error::VideoResult;

const TOKEN_CONTENT_TYPE: &str = "twilio-fpa;v=1";

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoGrant {
    pub room: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grants {
    pub identity: String,
    pub video: VideoGrant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub jti: String,
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub grants: Grants,
}

/// Signs room access tokens for one API key.
#[derive(Clone)]
pub struct AccessTokenSigner {
    account_sid: String,
    key_sid: String,
    key_secret: String,
}

impl std::fmt::Debug for AccessTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenSigner")
            .field("account_sid", &self.account_sid)
            .field("key_sid", &self.key_sid)
            .finish_non_exhaustive()
    }
}

impl AccessTokenSigner {
    pub fn new(
        account_sid: impl Into<String>,
        key_sid: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Self {
        Self {
            account_sid: account_sid.into(),
            key_sid: key_sid.into(),
            key_secret: key_secret.into(),
        }
    }

    /// Build the claims for `identity` joining `room`, issued now.
    pub fn claims(&self, identity: &str, room: &str) -> AccessTokenClaims {
        let now = Utc::now().timestamp();
        AccessTokenClaims {
            jti: format!("{}-{}", self.key_sid, now),
            iss: self.key_sid.clone(),
            sub: self.account_sid.clone(),
            iat: now,
            exp: now + DEFAULT_TOKEN_TTL_SECS,
            grants: Grants {
                identity: identity.to_string(),
                video: VideoGrant {
                    room: room.to_string(),
                },
            },
        }
    }

    /// Sign a token for `identity` joining `room`.
    pub fn sign(&self, identity: &str, room: &str) -> VideoResult<String> {
        let mut header = Header::new(Algorithm::HS256);
        header.cty = Some(TOKEN_CONTENT_TYPE.to_string());

        let token = encode(
            &header,
            &self.claims(identity, room),
            &EncodingKey::from_secret(self.key_secret.as_bytes()),
        )?;
        Ok(token)
    }
}
