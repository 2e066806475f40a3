//! Base64 header payload handling.
//!
//! Both sides of the 402 handshake move JSON through HTTP headers: the seller
//! gate publishes its requirements under `PAYMENT-REQUIRED`, the buyer sends
//! a signed authorization under `X-PAYMENT`. [`Base64Bytes`] wraps the
//! encoded form and keeps borrowed header bytes alloc-free until decoded.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::fmt::Display;

/// Base64-encoded bytes, borrowed from a header or owned after encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes<'a>(pub Cow<'a, [u8]>);

/// Errors from decoding a base64 JSON header value.
#[derive(Debug, thiserror::Error)]
pub enum Base64JsonError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl Base64Bytes<'_> {
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(&self.0)
    }

    pub fn encode<T: AsRef<[u8]>>(input: T) -> Base64Bytes<'static> {
        let encoded = b64.encode(input.as_ref());
        Base64Bytes(Cow::Owned(encoded.into_bytes()))
    }

    /// Serializes `value` to JSON and base64-encodes the result.
    pub fn encode_json<T: Serialize>(value: &T) -> Result<Base64Bytes<'static>, Base64JsonError> {
        let json = serde_json::to_vec(value)?;
        Ok(Self::encode(json))
    }

    /// Decodes base64 then parses the contained JSON.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, Base64JsonError> {
        let bytes = self.decode()?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl AsRef<[u8]> for Base64Bytes<'_> {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<'a> From<&'a [u8]> for Base64Bytes<'a> {
    fn from(slice: &'a [u8]) -> Self {
        Base64Bytes(Cow::Borrowed(slice))
    }
}

impl Display for Base64Bytes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.0.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let encoded = Base64Bytes::encode(b"hello world");
        assert_eq!(encoded.to_string(), "aGVsbG8gd29ybGQ=");
        assert_eq!(encoded.decode().unwrap(), b"hello world");
    }

    #[test]
    fn json_roundtrip() {
        let value = serde_json::json!({"amount": "5000"});
        let encoded = Base64Bytes::encode_json(&value).unwrap();
        let back: serde_json::Value = encoded.decode_json().unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn rejects_invalid_base64() {
        let bytes = Base64Bytes::from(&b"not!!base64"[..]);
        assert!(bytes.decode().is_err());
    }
}
