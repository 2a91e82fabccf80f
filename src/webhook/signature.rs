//! HMAC-SHA256 verification of provider callbacks.
//!
//! The signed content is `"{timestamp}.{raw_body}"`. Two header schemes are
//! accepted:
//!
//! - `webhook-signature` + `webhook-timestamp`: a list of signatures, either
//!   space-separated `v1,<sig>` tokens or comma-separated `k=v` pairs
//!   (`t=` may carry the timestamp; `v1`, `sig`, `s` and `sha256` carry
//!   signatures);
//! - legacy `svix-id` + `svix-timestamp` + `svix-signature` with `v1,<sig>`
//!   entries.
//!
//! Signatures may be hex or base64 encoded.

use axum::http::HeaderMap;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use ring::hmac;
use subtle::ConstantTimeEq;

const SIGNATURE_HEADER: &str = "webhook-signature";
const TIMESTAMP_HEADER: &str = "webhook-timestamp";
const LEGACY_ID_HEADER: &str = "svix-id";
const LEGACY_TIMESTAMP_HEADER: &str = "svix-timestamp";
const LEGACY_SIGNATURE_HEADER: &str = "svix-signature";

const SIGNATURE_KEYS: [&str; 4] = ["v1", "sig", "s", "sha256"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Valid,
    Invalid,
    /// No signature-bearing header at all.
    Missing,
    /// No secret configured; verification skipped.
    NotConfigured,
}

impl SignatureCheck {
    pub fn is_accepted(self) -> bool {
        matches!(self, SignatureCheck::Valid | SignatureCheck::NotConfigured)
    }
}

pub struct WebhookVerifier {
    key: hmac::Key,
}

impl WebhookVerifier {
    /// `whsec_`-prefixed secrets are base64; anything that does not decode is used raw.
    pub fn new(secret: &str) -> Self {
        let trimmed = secret.trim();
        let encoded = trimmed.strip_prefix("whsec_").unwrap_or(trimmed);
        let bytes = STANDARD
            .decode(encoded)
            .unwrap_or_else(|_| secret.as_bytes().to_vec());
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, &bytes),
        }
    }

    pub fn sign(&self, timestamp: &str, body: &[u8]) -> Vec<u8> {
        let mut ctx = hmac::Context::with_key(&self.key);
        ctx.update(timestamp.as_bytes());
        ctx.update(b".");
        ctx.update(body);
        ctx.sign().as_ref().to_vec()
    }

    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> SignatureCheck {
        let primary = header(headers, SIGNATURE_HEADER);
        if let Some(sig_header) = primary {
            if self.check_primary(sig_header, header(headers, TIMESTAMP_HEADER), body) {
                return SignatureCheck::Valid;
            }
        }

        let legacy = (
            header(headers, LEGACY_ID_HEADER),
            header(headers, LEGACY_TIMESTAMP_HEADER),
            header(headers, LEGACY_SIGNATURE_HEADER),
        );
        if let (Some(_), Some(ts), Some(sig_header)) = legacy {
            let candidates = sig_header
                .split_whitespace()
                .filter_map(|t| t.strip_prefix("v1,"));
            return if self.any_matches(ts, candidates, body) {
                SignatureCheck::Valid
            } else {
                SignatureCheck::Invalid
            };
        }

        match primary {
            Some(_) => SignatureCheck::Invalid,
            None => SignatureCheck::Missing,
        }
    }

    fn check_primary(&self, sig_header: &str, ts_header: Option<&str>, body: &[u8]) -> bool {
        let mut timestamp = ts_header.map(str::to_string);
        let mut candidates = Vec::new();

        for token in sig_header.split_whitespace() {
            if let Some(sig) = token.strip_prefix("v1,") {
                candidates.push(sig.to_string());
                continue;
            }
            for pair in token.split(',') {
                let Some((k, v)) = pair.split_once('=') else {
                    continue;
                };
                let (k, v) = (k.trim(), v.trim());
                if v.is_empty() {
                    continue;
                }
                if k == "t" {
                    timestamp.get_or_insert_with(|| v.to_string());
                } else if SIGNATURE_KEYS.contains(&k) {
                    candidates.push(v.to_string());
                }
            }
        }

        match timestamp {
            Some(ts) => self.any_matches(&ts, candidates.iter().map(String::as_str), body),
            None => false,
        }
    }

    fn any_matches<'a>(
        &self,
        timestamp: &str,
        candidates: impl Iterator<Item = &'a str>,
        body: &[u8],
    ) -> bool {
        let expected = self.sign(timestamp.trim(), body);
        let mut matched = false;
        for candidate in candidates {
            if let Some(got) = decode_signature(candidate) {
                // Keep scanning so timing does not depend on which candidate matched.
                matched |= bool::from(got.ct_eq(&expected));
            }
        }
        matched
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn decode_signature(s: &str) -> Option<Vec<u8>> {
    let s = s.trim();
    let bytes = if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
        hex::decode(s).ok()?
    } else {
        STANDARD.decode(s).or_else(|_| URL_SAFE.decode(s)).ok()?
    };
    (bytes.len() == 32).then_some(bytes)
}
