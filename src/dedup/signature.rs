//! Request signatures for coalescing.
//!
//! Two requests share a signature when they have the same method, the same
//! URL after normalization and the same body bytes. Headers are ignored.

use std::fmt;

use url::Url;

use crate::transport::FetchRequest;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Normalized identity of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestSignature(String);

impl RequestSignature {
    pub fn from_request(request: &FetchRequest) -> Self {
        let body = request
            .body
            .as_deref()
            .map(|b| format!("{:016x}", fnv1a_64(b)))
            .unwrap_or_else(|| "-".to_string());
        RequestSignature(format!(
            "{} {} {}",
            request.method.as_str(),
            normalize_url(&request.url),
            body
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sort query pairs and drop the fragment. Scheme and host case and the
/// default port are already normalized by the URL parser.
fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        normalized.set_query(None);
    } else {
        pairs.sort();
        normalized.query_pairs_mut().clear().extend_pairs(pairs);
    }

    normalized.to_string()
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FetchOptions;
    use reqwest::Method;

    fn sig(url: &str, options: FetchOptions) -> RequestSignature {
        RequestSignature::from_request(&FetchRequest::new(url, &options).unwrap())
    }

    #[test]
    fn test_url_normalization() {
        let a = sig("HTTP://Api.Example.com:80/items?b=2&a=1#top", FetchOptions::new());
        let b = sig("http://api.example.com/items?a=1&b=2", FetchOptions::new());
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "GET http://api.example.com/items?a=1&b=2 -");
    }

    #[test]
    fn test_method_and_body_distinguish() {
        let get = sig("http://api/x", FetchOptions::new());
        let head = sig("http://api/x", FetchOptions::new().method(Method::HEAD));
        assert_ne!(get, head);

        let post_a = sig("http://api/x", FetchOptions::new().method(Method::POST).body("a"));
        let post_a2 = sig("http://api/x", FetchOptions::new().method(Method::POST).body("a"));
        let post_b = sig("http://api/x", FetchOptions::new().method(Method::POST).body("b"));
        assert_eq!(post_a, post_a2);
        assert_ne!(post_a, post_b);
    }

    #[test]
    fn test_headers_ignored() {
        let plain = sig("http://api/x", FetchOptions::new());
        let with_header = sig("http://api/x", FetchOptions::new().header("x-trace", "1"));
        assert_eq!(plain, with_header);
    }

    #[test]
    fn test_fnv_known_values() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
    }
}
