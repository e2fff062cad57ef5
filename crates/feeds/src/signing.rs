//! HMAC-SHA256 request signing for Binance account endpoints.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

use crate::rest::JsonRequest;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the API key on signed requests.
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Default `recvWindow` in milliseconds.
pub const RECV_WINDOW_MS: u64 = 5_000;

/// Exchange API credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.api_secret.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"******")
            .field("api_secret", &"******")
            .finish()
    }
}

/// Hex-encoded HMAC-SHA256 of `payload`.
pub fn sign(secret: &str, payload: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Encode query pairs exactly as they will be sent.
pub fn encode_query(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}

/// Add `recvWindow`, `timestamp`, `signature` and the API key header.
pub fn sign_request(request: JsonRequest, credentials: &Credentials, timestamp_ms: i64) -> JsonRequest {
    let request = request
        .query("recvWindow", RECV_WINDOW_MS)
        .query("timestamp", timestamp_ms);
    let signature = sign(&credentials.api_secret, &encode_query(&request.query));
    request
        .query("signature", signature)
        .header(API_KEY_HEADER, credentials.api_key.clone())
}
