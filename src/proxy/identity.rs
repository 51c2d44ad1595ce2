// src/proxy/identity.rs
use hyper::Uri;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("malformed backend url {url:?}: {reason}")]
    MalformedUrl { url: String, reason: String },

    #[error("backend url {url:?} has no explicit port")]
    MissingPort { url: String },
}

/// Parse a backend URL. Only absolute URLs (scheme + authority) are accepted.
pub fn parse_backend_url(raw: &str) -> Result<Uri, IdentityError> {
    let uri: Uri = raw.parse().map_err(|e: hyper::http::uri::InvalidUri| {
        IdentityError::MalformedUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        }
    })?;

    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(IdentityError::MalformedUrl {
            url: raw.to_string(),
            reason: "expected scheme://host:port".to_string(),
        });
    }

    Ok(uri)
}

/// Derive the stable backend id for a raw URL.
///
/// The id is the lowercase hex SHA-256 of `"<hostname>:<port>"`. Path, query
/// and scheme do not take part, so two URLs pointing at the same endpoint
/// yield the same id. The port must be spelled out: `http://example.com`
/// is rejected rather than defaulted to 80.
pub fn derive_id(raw: &str) -> Result<String, IdentityError> {
    let uri = parse_backend_url(raw)?;
    id_for_uri(&uri)
}

pub(crate) fn id_for_uri(uri: &Uri) -> Result<String, IdentityError> {
    let authority = uri.authority().ok_or_else(|| IdentityError::MalformedUrl {
        url: uri.to_string(),
        reason: "missing host".to_string(),
    })?;

    let port = authority.port_u16().ok_or_else(|| IdentityError::MissingPort {
        url: uri.to_string(),
    })?;

    // IPv6 literals hash without their brackets.
    let host = authority
        .host()
        .trim_start_matches('[')
        .trim_end_matches(']');

    let digest = Sha256::digest(format!("{}:{}", host, port).as_bytes());
    Ok(format!("{:x}", digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_urls_with_explicit_port() {
        for url in [
            "http://127.0.0.1:5000",
            "https://example.com:443",
            "http://example.com:8080",
            "http://[::1]:3000",
        ] {
            let id = derive_id(url).unwrap_or_else(|e| panic!("{}: {}", url, e));
            assert_eq!(id.len(), 64);
        }
    }

    #[test]
    fn rejects_missing_port() {
        assert!(matches!(
            derive_id("http://example.com"),
            Err(IdentityError::MissingPort { .. })
        ));
        assert!(matches!(
            derive_id("htp://abc"),
            Err(IdentityError::MissingPort { .. })
        ));
    }

    #[test]
    fn rejects_malformed_urls() {
        for url in ["", "not a url", "/relative/path", "127.0.0.1:5000/x"] {
            assert!(
                matches!(derive_id(url), Err(IdentityError::MalformedUrl { .. })),
                "{:?} should be malformed",
                url
            );
        }
    }

    #[test]
    fn matches_known_digest() {
        assert_eq!(
            derive_id("http://127.0.0.1:5000").unwrap(),
            "f98eeff24e2fced1a1336182a3e8775326262914cc4087066d9346431795ccdb"
        );
        assert_eq!(
            derive_id("http://[::1]:3000").unwrap(),
            "79a1212a674bd8c0b252c3e412c8909f34301b9cd3b56354f466e3517fe86c01"
        );
    }

    #[test]
    fn path_and_scheme_do_not_change_identity() {
        let a = derive_id("http://host:5000").unwrap();
        assert_eq!(a, derive_id("http://host:5000/").unwrap());
        assert_eq!(a, derive_id("http://host:5000/api?x=1").unwrap());
        assert_eq!(a, derive_id("https://host:5000").unwrap());
        assert_ne!(a, derive_id("http://host:5001").unwrap());
    }

    proptest! {
        #[test]
        fn id_is_deterministic_lowercase_hex(host in "[a-z][a-z0-9]{0,20}", port in 1u16..) {
            let url = format!("http://{}:{}", host, port);
            let first = derive_id(&url).unwrap();
            prop_assert_eq!(&first, &derive_id(&url).unwrap());
            prop_assert_eq!(first.len(), 64);
            prop_assert!(first.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
    }
}
