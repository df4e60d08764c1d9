//! HTTP Message Signature verification, Web-Bot-Auth profile.
//!
//! Implements the minimal RFC 9421 subset this scheme relies on: parsing
//! `Signature-Input` and `Signature`, reconstructing the signature base
//! byte-exactly, and verifying the detached Ed25519 signature against a key
//! published in the agent's discoverable directory (see [`directory`]).
//!
//! The covered components are fixed: `"payment-signature"`,
//! `"signature-agent"`, and `"@authority"`. Additional components may appear
//! in the header but do not contribute to the base.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as b64;
use base64::Engine;
use ed25519_dalek::{Signature as Ed25519Signature, Verifier};
use tracing::instrument;
use url::Url;

use fluxa402_types::proto::WebBotAuthEnvelope;
use fluxa402_types::reason::InvalidReason;
use fluxa402_types::timestamp::UnixTimestamp;

pub mod directory;

pub use directory::{HttpKeyDirectory, Jwk, JwkSet, KeyDirectory, StaticKeyDirectory};

/// Maximum allowed `expires - created` span, and the clock skew tolerance,
/// both in seconds.
pub const MAX_WINDOW_SECS: u64 = 60;

/// The signature tag this profile accepts.
pub const WEB_BOT_AUTH_TAG: &str = "web-bot-auth";

/// Covered components required for acceptance, in base order.
pub const REQUIRED_COMPONENTS: [&str; 3] = ["payment-signature", "signature-agent", "@authority"];

/// Failures of the signature machinery.
///
/// Each maps onto a stable wire tag via [`HttpSigError::reason`].
#[derive(Debug, thiserror::Error)]
pub enum HttpSigError {
    #[error("malformed signature material: {0}")]
    Parse(String),
    #[error("covered components missing {0}")]
    MissingComponent(&'static str),
    #[error("Signature-Input and Signature labels differ")]
    LabelMismatch,
    #[error("signature tag is not {WEB_BOT_AUTH_TAG}")]
    TagMismatch,
    #[error("signature window exceeds {MAX_WINDOW_SECS}s")]
    WindowTooLong,
    #[error("signature expired or not yet valid")]
    ExpiredOrNotYetValid,
    #[error("invalid signature agent: {0}")]
    Agent(String),
    #[error("directory fetch failed: {0}")]
    Directory(String),
    #[error("no directory key matches keyid")]
    KeyNotFound,
    #[error("signature verification failed")]
    SignatureVerifyFailed,
}

impl HttpSigError {
    /// The wire tag carried back in `invalidReason`.
    pub fn reason(&self) -> InvalidReason {
        match self {
            HttpSigError::Parse(_)
            | HttpSigError::TagMismatch
            | HttpSigError::Agent(_)
            | HttpSigError::Directory(_) => InvalidReason::InvalidWebBotAuth,
            HttpSigError::MissingComponent("payment-signature") => {
                InvalidReason::MissingComponentPaymentSignature
            }
            HttpSigError::MissingComponent("signature-agent") => {
                InvalidReason::MissingComponentSignatureAgent
            }
            HttpSigError::MissingComponent(_) => InvalidReason::MissingComponentAuthority,
            HttpSigError::LabelMismatch => InvalidReason::LabelMismatch,
            HttpSigError::WindowTooLong => InvalidReason::WindowTooLong,
            HttpSigError::ExpiredOrNotYetValid => InvalidReason::ExpiredOrNotYetValid,
            HttpSigError::KeyNotFound => InvalidReason::KeyNotFound,
            HttpSigError::SignatureVerifyFailed => InvalidReason::SignatureVerifyFailed,
        }
    }
}

/// Parsed `Signature-Input` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInput {
    /// The signature label (`sig1` in `sig1=(…)`).
    pub label: String,
    /// Covered component names, unquoted.
    pub components: Vec<String>,
    /// Parsed parameters.
    pub params: SignatureParams,
    /// The substring from the `(` through the end of the header value;
    /// covered verbatim by the `@signature-params` base line.
    pub params_segment: String,
}

/// Signature parameters recognized by this profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureParams {
    pub created: Option<u64>,
    pub expires: Option<u64>,
    pub keyid: Option<String>,
    pub tag: Option<String>,
}

/// Parses a `Signature-Input` header value.
///
/// Shape: `label=(comp1 comp2 …);param=value;…`. Components are either
/// double-quoted header names (`"payment-signature"`) or derived names
/// starting with `@` (`@authority`). Quoted parameter values unquote;
/// identifier values keep their raw text.
pub fn parse_signature_input(value: &str) -> Result<SignatureInput, HttpSigError> {
    let (label, rest) = value
        .split_once('=')
        .ok_or_else(|| HttpSigError::Parse("Signature-Input has no label".to_string()))?;
    let label = label.trim();
    if label.is_empty() {
        return Err(HttpSigError::Parse("empty signature label".to_string()));
    }
    if !rest.starts_with('(') {
        return Err(HttpSigError::Parse(
            "Signature-Input components must start with '('".to_string(),
        ));
    }
    let close = rest
        .find(')')
        .ok_or_else(|| HttpSigError::Parse("unterminated component list".to_string()))?;
    let mut components = Vec::new();
    for item in rest[1..close].split_ascii_whitespace() {
        let name = if let Some(quoted) = item.strip_prefix('"') {
            quoted
                .strip_suffix('"')
                .ok_or_else(|| HttpSigError::Parse(format!("unterminated component {item}")))?
        } else if item.starts_with('@') {
            item
        } else {
            return Err(HttpSigError::Parse(format!(
                "component {item} is neither quoted nor derived"
            )));
        };
        components.push(name.to_string());
    }

    let mut params = SignatureParams::default();
    for param in rest[close + 1..].split(';') {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        let (key, raw) = param
            .split_once('=')
            .ok_or_else(|| HttpSigError::Parse(format!("parameter {param} has no value")))?;
        let unquoted = raw
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(raw);
        match key {
            "created" => {
                params.created = Some(parse_integer_param("created", raw)?);
            }
            "expires" => {
                params.expires = Some(parse_integer_param("expires", raw)?);
            }
            "keyid" => params.keyid = Some(unquoted.to_string()),
            "tag" => params.tag = Some(unquoted.to_string()),
            // alg, nonce, and unknown parameters are carried in the base
            // via the params segment but otherwise ignored.
            _ => {}
        }
    }

    Ok(SignatureInput {
        label: label.to_string(),
        components,
        params,
        params_segment: rest.to_string(),
    })
}

fn parse_integer_param(name: &str, raw: &str) -> Result<u64, HttpSigError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HttpSigError::Parse(format!("{name} must be an integer")));
    }
    raw.parse()
        .map_err(|_| HttpSigError::Parse(format!("{name} out of range")))
}

/// Parses a `Signature` header value of the shape `label=:base64:`.
///
/// The signature value uses standard base64, not base64url.
pub fn parse_signature_header(value: &str) -> Result<(String, Vec<u8>), HttpSigError> {
    let (label, rest) = value
        .split_once('=')
        .ok_or_else(|| HttpSigError::Parse("Signature has no label".to_string()))?;
    let encoded = rest
        .strip_prefix(':')
        .and_then(|v| v.strip_suffix(':'))
        .ok_or_else(|| HttpSigError::Parse("Signature value must be wrapped in colons".to_string()))?;
    let bytes = b64
        .decode(encoded)
        .map_err(|e| HttpSigError::Parse(format!("signature is not base64: {e}")))?;
    Ok((label.trim().to_string(), bytes))
}

/// Reconstructs the signature base, byte-exact.
///
/// Lines are joined with `\n` and there is no trailing newline:
///
/// ```text
/// "payment-signature": <exact PAYMENT-SIGNATURE header bytes>
/// "signature-agent": <exact Signature-Agent header bytes, quotes included>
/// "@authority": <URL host[:port]>
/// "@signature-params": <params segment of Signature-Input>
/// ```
pub fn signature_base(
    payment_signature_header: &str,
    signature_agent: &str,
    authority: &str,
    params_segment: &str,
) -> Vec<u8> {
    let base = format!(
        "\"payment-signature\": {payment_signature_header}\n\
         \"signature-agent\": {signature_agent}\n\
         \"@authority\": {authority}\n\
         \"@signature-params\": {params_segment}"
    );
    base.into_bytes()
}

/// Checks the signature validity window against `now`.
///
/// `expires - created` must not exceed [`MAX_WINDOW_SECS`], and `now` must
/// lie within `[created - 60, expires + 60]` (both inclusive).
pub fn assert_window(
    created: u64,
    expires: u64,
    now: UnixTimestamp,
) -> Result<(), HttpSigError> {
    let span = expires
        .checked_sub(created)
        .ok_or(HttpSigError::WindowTooLong)?;
    if span > MAX_WINDOW_SECS {
        return Err(HttpSigError::WindowTooLong);
    }
    let now = now.as_secs();
    if created.saturating_sub(MAX_WINDOW_SECS) > now || now > expires + MAX_WINDOW_SECS {
        return Err(HttpSigError::ExpiredOrNotYetValid);
    }
    Ok(())
}

/// Extracts `host[:port]` from a resource URL. Default ports are omitted,
/// matching the Host header the client sent.
pub fn authority_of(url: &str) -> Result<String, HttpSigError> {
    let parsed = Url::parse(url).map_err(|e| HttpSigError::Parse(format!("resource url: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| HttpSigError::Parse("resource url has no host".to_string()))?;
    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Strips the surrounding double quotes of a `Signature-Agent` value and
/// parses the directory URL.
pub fn parse_agent_url(signature_agent: &str) -> Result<Url, HttpSigError> {
    let unquoted = signature_agent
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(signature_agent);
    Url::parse(unquoted).map_err(|e| HttpSigError::Agent(e.to_string()))
}

/// Verifies Web-Bot-Auth envelopes against keys from a [`KeyDirectory`].
pub struct WebBotAuthVerifier {
    directory: Arc<dyn KeyDirectory>,
}

impl WebBotAuthVerifier {
    pub fn new(directory: Arc<dyn KeyDirectory>) -> Self {
        Self { directory }
    }

    /// Verifies one envelope; returns the RFC 7638 thumbprint of the
    /// signing key on success.
    #[instrument(skip_all, err, fields(method = %method, url = %resource_url))]
    pub async fn verify(
        &self,
        envelope: &WebBotAuthEnvelope,
        method: &str,
        resource_url: &str,
    ) -> Result<String, HttpSigError> {
        let input = parse_signature_input(&envelope.signature_input)?;
        let (signature_label, signature_bytes) = parse_signature_header(&envelope.signature)?;

        if input.label != signature_label {
            return Err(HttpSigError::LabelMismatch);
        }
        if input.params.tag.as_deref() != Some(WEB_BOT_AUTH_TAG) {
            return Err(HttpSigError::TagMismatch);
        }
        for required in REQUIRED_COMPONENTS {
            if !input.components.iter().any(|c| c == required) {
                return Err(HttpSigError::MissingComponent(required));
            }
        }
        let created = input
            .params
            .created
            .ok_or_else(|| HttpSigError::Parse("created parameter missing".to_string()))?;
        let expires = input
            .params
            .expires
            .ok_or_else(|| HttpSigError::Parse("expires parameter missing".to_string()))?;
        assert_window(created, expires, UnixTimestamp::now())?;

        let keyid = input
            .params
            .keyid
            .as_deref()
            .ok_or_else(|| HttpSigError::Parse("keyid parameter missing".to_string()))?;

        let agent_url = parse_agent_url(&envelope.signature_agent)?;
        let base = signature_base(
            &envelope.payment_signature_header,
            &envelope.signature_agent,
            &authority_of(resource_url)?,
            &input.params_segment,
        );

        let keys = self.directory.fetch(&agent_url).await?;
        let Some(key) = keys.find_by_thumbprint(keyid) else {
            self.directory.invalidate(&agent_url);
            return Err(HttpSigError::KeyNotFound);
        };
        let verifying_key = key
            .verifying_key()
            .ok_or(HttpSigError::KeyNotFound)?;

        let signature = Ed25519Signature::from_slice(&signature_bytes)
            .map_err(|_| HttpSigError::SignatureVerifyFailed)?;
        verifying_key
            .verify(&base, &signature)
            .map_err(|_| HttpSigError::SignatureVerifyFailed)?;

        Ok(key.thumbprint().expect("matched key has a thumbprint"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: &str = "sig1=(\"payment-signature\" \"signature-agent\" \"@authority\");created=1740672100;expires=1740672160;keyid=\"thumb\";tag=\"web-bot-auth\"";

    #[test]
    fn test_parse_signature_input() {
        let input = parse_signature_input(INPUT).unwrap();
        assert_eq!(input.label, "sig1");
        assert_eq!(
            input.components,
            vec!["payment-signature", "signature-agent", "@authority"]
        );
        assert_eq!(input.params.created, Some(1740672100));
        assert_eq!(input.params.expires, Some(1740672160));
        assert_eq!(input.params.keyid.as_deref(), Some("thumb"));
        assert_eq!(input.params.tag.as_deref(), Some(WEB_BOT_AUTH_TAG));
        assert!(input.params_segment.starts_with('('));
        assert!(input.params_segment.ends_with("tag=\"web-bot-auth\""));
    }

    #[test]
    fn test_parse_signature_input_derived_unquoted() {
        let input = parse_signature_input("s=(\"payment-signature\" @authority);created=1;expires=2")
            .unwrap();
        assert_eq!(input.components, vec!["payment-signature", "@authority"]);
    }

    #[test]
    fn test_parse_signature_input_rejects_bare_header_names() {
        assert!(parse_signature_input("s=(payment-signature);created=1").is_err());
    }

    #[test]
    fn test_parse_signature_header() {
        let (label, bytes) = parse_signature_header("sig1=:aGVsbG8=:").unwrap();
        assert_eq!(label, "sig1");
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn test_parse_signature_header_rejects_missing_colons() {
        assert!(parse_signature_header("sig1=aGVsbG8=").is_err());
    }

    #[test]
    fn test_signature_base_bytes() {
        let base = signature_base("HEADERBYTES", "\"https://agent.example\"", "api.example.com", "(\"payment-signature\");created=1");
        let expected = "\"payment-signature\": HEADERBYTES\n\
                        \"signature-agent\": \"https://agent.example\"\n\
                        \"@authority\": api.example.com\n\
                        \"@signature-params\": (\"payment-signature\");created=1";
        assert_eq!(base, expected.as_bytes());
        assert!(!base.ends_with(b"\n"));
    }

    #[test]
    fn test_window_span_bound() {
        let now = UnixTimestamp::from_secs(1_000_000);
        assert!(assert_window(1_000_000, 1_000_060, now).is_ok());
        assert!(matches!(
            assert_window(1_000_000, 1_000_061, now),
            Err(HttpSigError::WindowTooLong)
        ));
        // expires before created is never acceptable
        assert!(assert_window(1_000_060, 1_000_000, now).is_err());
    }

    #[test]
    fn test_window_skew_edges() {
        let now = UnixTimestamp::from_secs(1_000_000);
        // created = now - 60, expires = created: still inside the skew.
        assert!(assert_window(999_940, 999_940, now).is_ok());
        // created = now - 61: one second too old.
        assert!(matches!(
            assert_window(999_939, 999_939, now),
            Err(HttpSigError::ExpiredOrNotYetValid)
        ));
        // created = now + 60 is tolerated, now + 61 is not.
        assert!(assert_window(1_000_060, 1_000_090, now).is_ok());
        assert!(assert_window(1_000_061, 1_000_090, now).is_err());
    }

    #[test]
    fn test_authority_of() {
        assert_eq!(authority_of("https://api.example.com/r").unwrap(), "api.example.com");
        assert_eq!(
            authority_of("http://127.0.0.1:4021/resource").unwrap(),
            "127.0.0.1:4021"
        );
        // Scheme-default ports are omitted, like the Host header.
        assert_eq!(authority_of("https://api.example.com:443/r").unwrap(), "api.example.com");
    }

    #[test]
    fn test_parse_agent_url_strips_quotes() {
        let url = parse_agent_url("\"https://agent.example/.well-known/keys\"").unwrap();
        assert_eq!(url.host_str(), Some("agent.example"));
    }
}
