//! Webhook signature validation against scoped, rotating HMAC secrets.
//!
//! The secrets file maps a scope (`*`, `org` or `org/repo`) to a list of
//! tokens:
//!
//! ```yaml
//! '*':
//!   - value: global-token
//! kubernetes:
//!   - value: old-token
//!     expiry: 2026-01-01T00:00:00Z
//!   - value: new-token
//!     created_at: 2025-12-01T00:00:00Z
//! ```
//!
//! A file that only contains a bare string is a single global token.

use crate::events::payload_scope;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use sha2::Sha256;
use std::collections::HashMap;
use std::path::Path;

pub const GLOBAL_SCOPE: &str = "*";
pub const SHA1_HEADER: &str = "x-hub-signature";
pub const SHA256_HEADER: &str = "x-hub-signature-256";

#[derive(thiserror::Error, Debug)]
pub enum SecretsError {
    #[error("could not read hmac secrets: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse hmac secrets: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("no hmac tokens configured")]
    Empty,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct HmacToken {
    pub value: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl HmacToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            created_at: None,
            expiry: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SecretsFile {
    Legacy(String),
    Scoped(HashMap<String, Vec<HmacToken>>),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HmacSecrets {
    scopes: HashMap<String, Vec<HmacToken>>,
}

impl HmacSecrets {
    /// Within a scope, tokens are tried newest first; tokens without a
    /// creation time come last in their original order.
    pub fn new(mut scopes: HashMap<String, Vec<HmacToken>>) -> Self {
        for tokens in scopes.values_mut() {
            tokens.sort_by_key(|token| std::cmp::Reverse(token.created_at));
        }
        Self { scopes }
    }

    /// A single token used for every repository.
    pub fn global(token: impl Into<String>) -> Self {
        Self::new(HashMap::from([(
            GLOBAL_SCOPE.to_string(),
            vec![HmacToken::new(token)],
        )]))
    }

    pub fn from_yaml(data: &str) -> Result<Self, SecretsError> {
        let secrets = match serde_yaml::from_str::<SecretsFile>(data)? {
            SecretsFile::Legacy(token) => Self::global(token.trim()),
            SecretsFile::Scoped(scopes) => Self::new(scopes),
        };

        if secrets.scopes.values().all(|tokens| tokens.is_empty()) {
            return Err(SecretsError::Empty);
        }
        Ok(secrets)
    }

    pub fn from_file(path: &Path) -> Result<Self, SecretsError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    /// Tokens for the most specific configured scope: `org/repo`, then
    /// `org`, then the global scope.
    pub fn tokens_for(&self, scope: Option<&str>) -> &[HmacToken] {
        if let Some(scope) = scope {
            if let Some(tokens) = self.scopes.get(scope) {
                return tokens;
            }
            if let Some((org, _)) = scope.split_once('/')
                && let Some(tokens) = self.scopes.get(org)
            {
                return tokens;
            }
        }

        self.scopes
            .get(GLOBAL_SCOPE)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    Sha1,
    Sha256,
}

impl Algorithm {
    fn prefix(self) -> &'static str {
        match self {
            Algorithm::Sha1 => "sha1=",
            Algorithm::Sha256 => "sha256=",
        }
    }
}

/// A signature header value such as `sha1=5d61...`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    algorithm: Algorithm,
    digest: Vec<u8>,
}

impl Signature {
    /// Returns `None` when the prefix does not match the algorithm or the
    /// digest is not valid hex.
    pub fn parse(algorithm: Algorithm, header_value: &str) -> Option<Self> {
        let hex_digest = header_value.strip_prefix(algorithm.prefix())?;
        let digest = hex::decode(hex_digest).ok()?;
        Some(Self { algorithm, digest })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn verify(&self, payload: &[u8], key: &[u8]) -> bool {
        match self.algorithm {
            Algorithm::Sha1 => match Hmac::<Sha1>::new_from_slice(key) {
                Ok(mut mac) => {
                    mac.update(payload);
                    mac.verify_slice(&self.digest).is_ok()
                }
                Err(_) => false,
            },
            Algorithm::Sha256 => match Hmac::<Sha256>::new_from_slice(key) {
                Ok(mut mac) => {
                    mac.update(payload);
                    mac.verify_slice(&self.digest).is_ok()
                }
                Err(_) => false,
            },
        }
    }
}

/// Checks `signature` against every unexpired token configured for the
/// payload's repository. Any match validates the payload.
pub fn validate_payload(payload: &[u8], signature: &Signature, secrets: &HmacSecrets) -> bool {
    let scope = payload_scope(payload);
    let now = Utc::now();

    secrets
        .tokens_for(scope.as_deref())
        .iter()
        .filter(|token| !token.is_expired(now))
        .any(|token| signature.verify(payload, token.value.as_bytes()))
}

/// Computes the header value GitHub would send for `payload` signed with `key`.
pub fn sign_payload(payload: &[u8], key: &[u8], algorithm: Algorithm) -> String {
    let digest = match algorithm {
        Algorithm::Sha1 => {
            let mut mac =
                Hmac::<Sha1>::new_from_slice(key).expect("HMAC can take key of any size");
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        }
        Algorithm::Sha256 => {
            let mut mac =
                Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        }
    };
    format!("{}{}", algorithm.prefix(), hex::encode(digest))
}
