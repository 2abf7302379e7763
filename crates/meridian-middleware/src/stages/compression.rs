//! Response compression.
//!
//! Negotiates gzip, brotli or deflate from the request's `Accept-Encoding`
//! header (honouring q-values) and compresses successful responses whose
//! content type benefits from it.
//!
//! A response is left untouched when:
//!
//! - the client accepts none of the configured algorithms
//! - the status is not `200 OK` (ranges, redirects, `304`)
//! - it already carries `Content-Encoding`
//! - the content type is excluded or not compressible
//! - the body is smaller than the minimum size
//! - compressing it would not make it smaller
//!
//! `Vary: Accept-Encoding` is always added so caches key on the header.

use std::io::Write;

use bytes::Bytes;
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use http::header::{
    HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, VARY,
};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use meridian_telemetry::fields;

use crate::context::RequestContext;
use crate::stage::{BoxFuture, Next, Stage, StageKind, StageResult};
use crate::types::{Request, Response};

/// Content encodings the stage can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// `gzip`
    Gzip,
    /// `br`
    Brotli,
    /// `deflate`
    Deflate,
}

impl Algorithm {
    /// The `Content-Encoding` token.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Brotli => "br",
            Self::Deflate => "deflate",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(Self::Gzip),
            "br" => Some(Self::Brotli),
            "deflate" => Some(Self::Deflate),
            _ => None,
        }
    }
}

/// Speed/ratio trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Fastest.
    Fast,
    /// Balanced.
    #[default]
    Default,
    /// Smallest output.
    Best,
}

impl CompressionLevel {
    fn flate(self) -> Compression {
        match self {
            Self::Fast => Compression::fast(),
            Self::Default => Compression::default(),
            Self::Best => Compression::best(),
        }
    }

    const fn brotli_quality(self) -> i32 {
        match self {
            Self::Fast => 1,
            Self::Default => 5,
            Self::Best => 11,
        }
    }
}

const COMPRESSIBLE_APPLICATION_TYPES: &[&str] = &[
    "application/json",
    "application/javascript",
    "application/xml",
    "application/xhtml+xml",
    "application/ld+json",
    "application/manifest+json",
    "application/graphql-response+json",
    "image/svg+xml",
    "image/x-icon",
    "font/ttf",
    "font/otf",
];

/// Compresses response bodies.
#[derive(Debug, Clone)]
pub struct CompressionStage {
    algorithms: Vec<Algorithm>,
    level: CompressionLevel,
    min_size: usize,
    excluded: Vec<String>,
}

impl Default for CompressionStage {
    fn default() -> Self {
        Self {
            algorithms: vec![Algorithm::Brotli, Algorithm::Gzip, Algorithm::Deflate],
            level: CompressionLevel::Default,
            min_size: 1024,
            excluded: Vec::new(),
        }
    }
}

impl CompressionStage {
    /// Creates the stage with brotli, gzip and deflate enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the algorithms, in server preference order.
    #[must_use]
    pub fn algorithms(mut self, algorithms: impl IntoIterator<Item = Algorithm>) -> Self {
        self.algorithms = algorithms.into_iter().collect();
        self
    }

    /// Sets the compression level.
    #[must_use]
    pub fn level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    /// Bodies shorter than this are sent as-is. Default 1024 bytes.
    #[must_use]
    pub fn min_size(mut self, bytes: usize) -> Self {
        self.min_size = bytes;
        self
    }

    /// Never compresses this media type.
    #[must_use]
    pub fn exclude(mut self, media_type: impl Into<String>) -> Self {
        self.excluded.push(media_type.into().to_ascii_lowercase());
        self
    }

    /// Picks an algorithm for an `Accept-Encoding` value.
    ///
    /// The client's highest q-value wins; ties go to the server's order.
    /// `*` matches any configured algorithm.
    #[must_use]
    pub fn negotiate(&self, accept_encoding: &str) -> Option<Algorithm> {
        let mut best: Option<(Algorithm, f32, usize)> = None;

        for (token, quality) in parse_accept_encoding(accept_encoding) {
            if quality <= 0.0 {
                continue;
            }
            let candidates: Vec<Algorithm> = if token == "*" {
                self.algorithms.clone()
            } else {
                Algorithm::from_token(&token).into_iter().collect()
            };

            for algorithm in candidates {
                let Some(rank) = self.algorithms.iter().position(|a| *a == algorithm) else {
                    continue;
                };
                let better = match best {
                    None => true,
                    Some((_, q, r)) => {
                        quality > q || ((quality - q).abs() < f32::EPSILON && rank < r)
                    }
                };
                if better {
                    best = Some((algorithm, quality, rank));
                }
            }
        }

        best.map(|(algorithm, _, _)| algorithm)
    }

    /// Returns `true` if a body of this content type is worth compressing.
    #[must_use]
    pub fn is_compressible(&self, content_type: &str) -> bool {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if media_type.is_empty() || self.excluded.contains(&media_type) {
            return false;
        }

        media_type.starts_with("text/")
            || COMPRESSIBLE_APPLICATION_TYPES.contains(&media_type.as_str())
    }

    fn encode(&self, algorithm: Algorithm, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match algorithm {
            Algorithm::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), self.level.flate());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Algorithm::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), self.level.flate());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Algorithm::Brotli => {
                let params = brotli::enc::BrotliEncoderParams {
                    quality: self.level.brotli_quality(),
                    ..Default::default()
                };
                let mut output = Vec::new();
                brotli::BrotliCompress(&mut std::io::Cursor::new(data), &mut output, &params)?;
                Ok(output)
            }
        }
    }

    async fn compress(&self, algorithm: Algorithm, response: Response) -> Response {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if response.status() != StatusCode::OK
            || response.headers().contains_key(CONTENT_ENCODING)
            || !self.is_compressible(content_type)
        {
            return response;
        }

        let (mut parts, body) = response.into_parts();
        let data = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };

        if data.len() < self.min_size {
            return Response::from_parts(parts, Full::new(data));
        }

        match self.encode(algorithm, &data) {
            Ok(encoded) if encoded.len() < data.len() => {
                parts
                    .headers
                    .insert(CONTENT_ENCODING, HeaderValue::from_static(algorithm.token()));
                parts.headers.remove(CONTENT_LENGTH);
                Response::from_parts(parts, Full::new(Bytes::from(encoded)))
            }
            Ok(_) => Response::from_parts(parts, Full::new(data)),
            Err(error) => {
                tracing::warn!(
                    { fields::ERROR } = %error,
                    encoding = algorithm.token(),
                    "compression failed"
                );
                Response::from_parts(parts, Full::new(data))
            }
        }
    }
}

/// Splits an `Accept-Encoding` value into lowercase tokens with q-values.
fn parse_accept_encoding(value: &str) -> Vec<(String, f32)> {
    value
        .split(',')
        .filter_map(|item| {
            let mut pieces = item.split(';');
            let token = pieces.next()?.trim().to_ascii_lowercase();
            if token.is_empty() {
                return None;
            }
            let quality = pieces
                .filter_map(|param| param.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .map_or(1.0, |q| q.clamp(0.0, 1.0));
            Some((token, quality))
        })
        .collect()
}

impl Stage for CompressionStage {
    fn kind(&self) -> StageKind {
        StageKind::Compression
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, StageResult> {
        Box::pin(async move {
            let algorithm = request
                .headers()
                .get(ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| self.negotiate(v));

            let mut response = next.run(ctx, request).await?;
            response
                .headers_mut()
                .append(VARY, HeaderValue::from_static("Accept-Encoding"));

            Ok(match algorithm {
                Some(algorithm) => self.compress(algorithm, response).await,
                None => response,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseExt;
    use flate2::read::GzDecoder;
    use std::io::Read;

    // ============== Negotiation Tests ==============

    #[test]
    fn test_parse_accept_encoding() {
        let parsed = parse_accept_encoding("gzip;q=0.5, br , ,deflate;q=bogus");
        assert_eq!(
            parsed,
            vec![
                ("gzip".to_string(), 0.5),
                ("br".to_string(), 1.0),
                ("deflate".to_string(), 1.0),
            ]
        );
    }

    #[test]
    fn test_negotiate_prefers_client_quality() {
        let stage = CompressionStage::new();
        assert_eq!(stage.negotiate("gzip;q=1.0, br;q=0.2"), Some(Algorithm::Gzip));
        assert_eq!(stage.negotiate("gzip, deflate, br"), Some(Algorithm::Brotli));
    }

    #[test]
    fn test_negotiate_respects_zero_and_unknown() {
        let stage = CompressionStage::new();
        assert_eq!(stage.negotiate("gzip;q=0"), None);
        assert_eq!(stage.negotiate("identity"), None);
        assert_eq!(stage.negotiate("zstd"), None);
    }

    #[test]
    fn test_negotiate_wildcard() {
        let stage = CompressionStage::new().algorithms([Algorithm::Gzip]);
        assert_eq!(stage.negotiate("*"), Some(Algorithm::Gzip));
        assert_eq!(stage.negotiate("br"), None);
    }

    // ============== Content Type Tests ==============

    #[test]
    fn test_is_compressible() {
        let stage = CompressionStage::new().exclude("text/event-stream");
        assert!(stage.is_compressible("text/html; charset=utf-8"));
        assert!(stage.is_compressible("text/javascript; charset=utf-8"));
        assert!(stage.is_compressible("application/json"));
        assert!(!stage.is_compressible("image/png"));
        assert!(!stage.is_compressible("text/event-stream"));
        assert!(!stage.is_compressible(""));
    }

    // ============== Body Tests ==============

    #[tokio::test]
    async fn test_compresses_large_html() {
        let stage = CompressionStage::new();
        let html = "<p>meridian</p>".repeat(200);
        let response = stage
            .compress(Algorithm::Gzip, Response::html(StatusCode::OK, html.clone()))
            .await;

        assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let mut decoded = String::new();
        GzDecoder::new(&body[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, html);
    }

    #[tokio::test]
    async fn test_brotli_encoding() {
        let stage = CompressionStage::new();
        let body = "{\"data\":null}".repeat(200);
        let response = stage
            .compress(
                Algorithm::Brotli,
                Response::json(StatusCode::OK, &serde_json::Value::String(body), false),
            )
            .await;
        assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "br");
    }

    #[tokio::test]
    async fn test_small_body_untouched() {
        let stage = CompressionStage::new();
        let response = stage
            .compress(Algorithm::Gzip, Response::text(StatusCode::OK, "tiny"))
            .await;
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
    }

    #[tokio::test]
    async fn test_error_status_untouched() {
        let stage = CompressionStage::new().min_size(0);
        let response = stage
            .compress(
                Algorithm::Gzip,
                Response::text(StatusCode::NOT_FOUND, "x".repeat(4096)),
            )
            .await;
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
    }
}
