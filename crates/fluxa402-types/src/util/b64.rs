//! Base64url header codec.
//!
//! The `PAYMENT-REQUIRED`, `PAYMENT-SIGNATURE`, and `PAYMENT-RESPONSE`
//! headers all carry base64url-without-padding of UTF-8 JSON. This module
//! provides [`HeaderBytes`], the wrapper used to move between header text
//! and the JSON messages it encodes.
//!
//! Decoding is strict: trailing `=` padding and non-URL-safe alphabets are
//! rejected, and header values above [`MAX_HEADER_BYTES`] are refused before
//! any decoding work happens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD as b64url;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt::Display;

/// Maximum accepted size of a payment-bearing header value, in bytes.
///
/// Larger headers are rejected up front; the facilitator surfaces the
/// rejection as HTTP 431.
pub const MAX_HEADER_BYTES: usize = 16 * 1024;

/// A payment header value: base64url-without-padding text bytes.
///
/// Copy-on-write so borrowed header slices decode without an allocation.
///
/// # Example
///
/// ```
/// use fluxa402_types::util::HeaderBytes;
///
/// let encoded = HeaderBytes::encode(b"{\"x402Version\":2}");
/// let decoded = encoded.decode().unwrap();
/// assert_eq!(decoded, b"{\"x402Version\":2}");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBytes<'a>(pub Cow<'a, [u8]>);

/// Errors from decoding a payment header.
#[derive(Debug, thiserror::Error)]
pub enum HeaderCodecError {
    /// The header value exceeds [`MAX_HEADER_BYTES`].
    #[error("header value of {0} bytes exceeds the {MAX_HEADER_BYTES} byte cap")]
    TooLarge(usize),
    /// The value is not base64url-without-padding.
    #[error("invalid base64url header value: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The decoded bytes are not the expected JSON message.
    #[error("invalid header JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl HeaderBytes<'_> {
    /// Decodes the header text to raw bytes.
    ///
    /// The `URL_SAFE_NO_PAD` engine rejects `=` padding and any character
    /// outside the URL-safe alphabet.
    pub fn decode(&self) -> Result<Vec<u8>, HeaderCodecError> {
        if self.0.len() > MAX_HEADER_BYTES {
            return Err(HeaderCodecError::TooLarge(self.0.len()));
        }
        Ok(b64url.decode(&self.0)?)
    }

    /// Encodes raw bytes into header text.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> HeaderBytes<'static> {
        let encoded = b64url.encode(input.as_ref());
        HeaderBytes(Cow::Owned(encoded.into_bytes()))
    }

    /// Encodes a JSON message into header text.
    ///
    /// `serde_json::to_vec` emits canonical compact JSON (no whitespace).
    pub fn encode_json<T: Serialize>(value: &T) -> Result<HeaderBytes<'static>, HeaderCodecError> {
        let json = serde_json::to_vec(value)?;
        Ok(Self::encode(json))
    }

    /// Decodes the header text into a JSON message.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, HeaderCodecError> {
        let bytes = self.decode()?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl AsRef<[u8]> for HeaderBytes<'_> {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<'a> From<&'a [u8]> for HeaderBytes<'a> {
    fn from(slice: &'a [u8]) -> Self {
        HeaderBytes(Cow::Borrowed(slice))
    }
}

impl<'a> From<&'a str> for HeaderBytes<'a> {
    fn from(s: &'a str) -> Self {
        HeaderBytes(Cow::Borrowed(s.as_bytes()))
    }
}

impl Display for HeaderBytes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.0.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let payload = br#"{"x402Version":2,"accepts":[]}"#;
        let encoded = HeaderBytes::encode(payload);
        assert_eq!(encoded.decode().unwrap(), payload);
    }

    #[test]
    fn test_no_padding_emitted() {
        // One byte of input would need two '=' in padded base64.
        let encoded = HeaderBytes::encode(b"a");
        assert!(!encoded.to_string().contains('='));
    }

    #[test]
    fn test_rejects_padding() {
        let padded = HeaderBytes::from("YQ==");
        assert!(padded.decode().is_err());
    }

    #[test]
    fn test_rejects_standard_alphabet() {
        // '+' and '/' belong to the standard alphabet only.
        let standard = HeaderBytes::from("a+b/");
        assert!(standard.decode().is_err());
    }

    #[test]
    fn test_rejects_oversized_header() {
        let oversized = vec![b'A'; MAX_HEADER_BYTES + 1];
        let header = HeaderBytes(Cow::Owned(oversized));
        assert!(matches!(
            header.decode(),
            Err(HeaderCodecError::TooLarge(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let value = serde_json::json!({"scheme": "fluxacredit", "amount": "25"});
        let encoded = HeaderBytes::encode_json(&value).unwrap();
        let decoded: serde_json::Value = encoded.decode_json().unwrap();
        assert_eq!(decoded, value);
    }
}
