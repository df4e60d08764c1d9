//! Web-Bot-Auth key directory: fetching, caching, and JWK thumbprints.
//!
//! An agent publishes its Ed25519 keys as a JWKS document served with the
//! `application/http-message-signatures-directory+json` content type. The
//! facilitator fetches the directory over HTTPS (loopback HTTP only behind
//! an explicit flag), caches it for at most 60 seconds, and selects the
//! signing key by RFC 7638 thumbprint.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as b64url;
use base64::Engine;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use super::HttpSigError;

/// Content type a signature directory must be served with.
pub const DIRECTORY_CONTENT_TYPE: &str = "application/http-message-signatures-directory+json";

/// Cap on a directory response body.
pub const MAX_DIRECTORY_BYTES: usize = 64 * 1024;

/// Per-fetch deadline.
pub const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest a fetched directory may be served from cache.
pub const DIRECTORY_CACHE_TTL: Duration = Duration::from_secs(60);

/// A JSON Web Key, limited to the members this profile reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl Jwk {
    /// An Ed25519 key from its base64url-encoded public bytes.
    pub fn ed25519<S: Into<String>>(x: S) -> Self {
        Self {
            kty: "OKP".to_string(),
            crv: Some("Ed25519".to_string()),
            x: Some(x.into()),
            kid: None,
        }
    }

    pub fn is_ed25519(&self) -> bool {
        self.kty == "OKP" && self.crv.as_deref() == Some("Ed25519") && self.x.is_some()
    }

    /// RFC 7638 thumbprint: SHA-256 over the canonical JSON of the required
    /// members (`crv`, `kty`, `x`, sorted, no whitespace), base64url
    /// without padding. `None` for non-Ed25519 keys.
    pub fn thumbprint(&self) -> Option<String> {
        if !self.is_ed25519() {
            return None;
        }
        let crv = self.crv.as_deref()?;
        let x = self.x.as_deref()?;
        let canonical = format!(r#"{{"crv":"{crv}","kty":"{}","x":"{x}"}}"#, self.kty);
        let digest = Sha256::digest(canonical.as_bytes());
        Some(b64url.encode(digest))
    }

    /// The Ed25519 verifying key, when the `x` member decodes to 32 bytes.
    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        let x = self.x.as_deref()?;
        let bytes = b64url.decode(x).ok()?;
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        VerifyingKey::from_bytes(&bytes).ok()
    }
}

/// The directory document: `{ "keys": [ JWK, … ] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// The Ed25519 key whose RFC 7638 thumbprint equals `keyid`.
    pub fn find_by_thumbprint(&self, keyid: &str) -> Option<&Jwk> {
        self.keys
            .iter()
            .filter(|key| key.is_ed25519())
            .find(|key| key.thumbprint().as_deref() == Some(keyid))
    }
}

/// Source of signature directories, a seam for tests and offline setups.
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    async fn fetch(&self, agent: &Url) -> Result<JwkSet, HttpSigError>;

    /// Drops any cached entry for `agent`. Called after a lookup failure.
    fn invalidate(&self, _agent: &Url) {}
}

/// A fixed in-memory directory.
pub struct StaticKeyDirectory {
    keys: JwkSet,
}

impl StaticKeyDirectory {
    pub fn new(keys: JwkSet) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl KeyDirectory for StaticKeyDirectory {
    async fn fetch(&self, _agent: &Url) -> Result<JwkSet, HttpSigError> {
        Ok(self.keys.clone())
    }
}

struct CacheEntry {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Fetches directories over HTTP with caching and transport caps.
///
/// Production deployments require `https://` agents; the loopback HTTP
/// exception exists for tests and local development and must be switched on
/// explicitly.
pub struct HttpKeyDirectory {
    client: reqwest::Client,
    allow_loopback_http: bool,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl HttpKeyDirectory {
    pub fn new(allow_loopback_http: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DIRECTORY_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            client,
            allow_loopback_http,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn assert_scheme(&self, agent: &Url) -> Result<(), HttpSigError> {
        match agent.scheme() {
            "https" => Ok(()),
            "http" if self.allow_loopback_http && is_loopback(agent) => Ok(()),
            scheme => Err(HttpSigError::Agent(format!(
                "directory scheme {scheme} is not allowed"
            ))),
        }
    }

    fn cached(&self, agent: &Url) -> Option<JwkSet> {
        let cache = self.cache.read().expect("directory cache lock");
        let entry = cache.get(agent.as_str())?;
        if entry.fetched_at.elapsed() < DIRECTORY_CACHE_TTL {
            Some(entry.keys.clone())
        } else {
            None
        }
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false),
        None => false,
    }
}

#[async_trait]
impl KeyDirectory for HttpKeyDirectory {
    async fn fetch(&self, agent: &Url) -> Result<JwkSet, HttpSigError> {
        self.assert_scheme(agent)?;
        if let Some(keys) = self.cached(agent) {
            return Ok(keys);
        }

        let response = self
            .client
            .get(agent.clone())
            .header("accept", DIRECTORY_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| HttpSigError::Directory(e.to_string()))?;
        if !response.status().is_success() {
            return Err(HttpSigError::Directory(format!(
                "directory responded {}",
                response.status()
            )));
        }
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with(DIRECTORY_CONTENT_TYPE) {
            return Err(HttpSigError::Directory(format!(
                "unexpected directory content type {content_type}"
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| HttpSigError::Directory(e.to_string()))?;
        if body.len() > MAX_DIRECTORY_BYTES {
            return Err(HttpSigError::Directory(format!(
                "directory of {} bytes exceeds the {MAX_DIRECTORY_BYTES} byte cap",
                body.len()
            )));
        }
        let keys: JwkSet = serde_json::from_slice(&body)
            .map_err(|e| HttpSigError::Directory(format!("directory is not a JWKS: {e}")))?;

        let mut cache = self.cache.write().expect("directory cache lock");
        cache.insert(
            agent.as_str().to_string(),
            CacheEntry {
                keys: keys.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(keys)
    }

    fn invalidate(&self, agent: &Url) {
        let mut cache = self.cache.write().expect("directory cache lock");
        cache.remove(agent.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn test_jwk() -> Jwk {
        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let x = b64url.encode(signing.verifying_key().as_bytes());
        Jwk::ed25519(x)
    }

    #[test]
    fn test_thumbprint_is_stable_and_unpadded() {
        let jwk = test_jwk();
        let thumb = jwk.thumbprint().unwrap();
        assert_eq!(thumb, jwk.thumbprint().unwrap());
        assert!(!thumb.contains('='));
        // SHA-256 -> 32 bytes -> 43 base64url characters without padding.
        assert_eq!(thumb.len(), 43);
    }

    #[test]
    fn test_thumbprint_only_for_ed25519() {
        let rsa = Jwk {
            kty: "RSA".to_string(),
            crv: None,
            x: None,
            kid: None,
        };
        assert!(rsa.thumbprint().is_none());
    }

    #[test]
    fn test_find_by_thumbprint_skips_foreign_keys() {
        let jwk = test_jwk();
        let thumb = jwk.thumbprint().unwrap();
        let set = JwkSet {
            keys: vec![
                Jwk {
                    kty: "EC".to_string(),
                    crv: Some("P-256".to_string()),
                    x: Some("ignored".to_string()),
                    kid: None,
                },
                jwk.clone(),
            ],
        };
        assert_eq!(set.find_by_thumbprint(&thumb), Some(&jwk));
        assert!(set.find_by_thumbprint("missing").is_none());
    }

    #[test]
    fn test_verifying_key_roundtrip() {
        let signing = SigningKey::from_bytes(&[9u8; 32]);
        let x = b64url.encode(signing.verifying_key().as_bytes());
        let jwk = Jwk::ed25519(x);
        assert_eq!(jwk.verifying_key().unwrap(), signing.verifying_key());
    }

    #[test]
    fn test_loopback_detection() {
        assert!(is_loopback(&Url::parse("http://127.0.0.1:4021/keys").unwrap()));
        assert!(is_loopback(&Url::parse("http://localhost/keys").unwrap()));
        assert!(!is_loopback(&Url::parse("http://example.com/keys").unwrap()));
    }

    #[test]
    fn test_scheme_policy() {
        let strict = HttpKeyDirectory::new(false);
        assert!(strict
            .assert_scheme(&Url::parse("https://agent.example/keys").unwrap())
            .is_ok());
        assert!(strict
            .assert_scheme(&Url::parse("http://127.0.0.1/keys").unwrap())
            .is_err());

        let relaxed = HttpKeyDirectory::new(true);
        assert!(relaxed
            .assert_scheme(&Url::parse("http://127.0.0.1/keys").unwrap())
            .is_ok());
        assert!(relaxed
            .assert_scheme(&Url::parse("http://example.com/keys").unwrap())
            .is_err());
    }
}
