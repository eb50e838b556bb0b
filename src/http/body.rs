//! Transparent request-body decompression.
//!
//! Clients may send JSON bodies compressed with gzip or deflate; anything
//! else is treated as identity. Decoding happens before deserialization, so
//! handlers only ever see the plain payload.

use crate::http::ApiError;
use axum::extract::{FromRequest, Request};
use axum::http::header::CONTENT_ENCODING;
use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use std::io::Read;

/// JSON extractor that understands `Content-Encoding: gzip` and `deflate`.
pub struct CompressibleJson<T>(pub T);

impl<T, S> FromRequest<S> for CompressibleJson<T>
where
    T: serde::de::DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let encoding = req
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let raw = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(format!("failed to read body: {e}")))?;
        let decoded = decode(&encoding, &raw)?;

        let value = serde_json::from_slice(&decoded)
            .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))?;
        Ok(Self(value))
    }
}

/// Decode `raw` according to the `Content-Encoding` header value.
fn decode(encoding: &str, raw: &[u8]) -> Result<Vec<u8>, ApiError> {
    let mut decoded = Vec::new();
    if encoding.split(',').any(|token| token.trim() == "gzip") {
        GzDecoder::new(raw)
            .read_to_end(&mut decoded)
            .map_err(|e| ApiError::bad_request(format!("invalid gzip body: {e}")))?;
    } else if encoding.split(',').any(|token| token.trim() == "deflate") {
        ZlibDecoder::new(raw)
            .read_to_end(&mut decoded)
            .map_err(|e| ApiError::bad_request(format!("invalid deflate body: {e}")))?;
    } else {
        decoded.extend_from_slice(raw);
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use flate2::Compression;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use std::io::Write;

    #[test]
    fn identity_passes_through() {
        let decoded = decode("", b"{\"a\":1}").unwrap();
        assert_eq!(decoded, b"{\"a\":1}");
    }

    #[test]
    fn gzip_bodies_are_decompressed() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{\"a\":1}").unwrap();
        let compressed = encoder.finish().unwrap();

        let decoded = decode("gzip", &compressed).unwrap();
        assert_eq!(decoded, b"{\"a\":1}");
    }

    #[test]
    fn deflate_bodies_are_decompressed() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{\"a\":1}").unwrap();
        let compressed = encoder.finish().unwrap();

        let decoded = decode("deflate", &compressed).unwrap();
        assert_eq!(decoded, b"{\"a\":1}");
    }

    #[test]
    fn corrupt_gzip_is_rejected() {
        assert!(decode("gzip", b"definitely not gzip").is_err());
    }

    #[test]
    fn unknown_encodings_are_identity() {
        let decoded = decode("br", b"payload").unwrap();
        assert_eq!(decoded, b"payload");
    }
}
