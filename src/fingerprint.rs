//! Request identity used as the store key.

use std::fmt;

use http::uri::PathAndQuery;
use http::{Method, Uri};

use crate::error::CacheError;

/// Identity of an outbound request's full target: scheme, authority, path and
/// query. Two requests with the same fingerprint share one store entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprints an absolute URI. Returns `None` for relative URIs.
    pub fn of(uri: &Uri) -> Option<Self> {
        let scheme = uri.scheme_str()?;
        let authority = uri.authority()?;
        let path = match uri.path() {
            "" => "/",
            path => path,
        };

        let mut key = format!(
            "{}://{}{}",
            scheme.to_ascii_lowercase(),
            authority.as_str().to_ascii_lowercase(),
            path
        );
        if let Some(query) = uri.query() {
            key.push('?');
            key.push_str(query);
        }
        Some(Self(key))
    }

    /// Fingerprints a request, or returns `None` when it must not be cached.
    ///
    /// Only `GET` requests are answered from or written to the store; a `HEAD`
    /// response has no body and would poison the entry for its `GET`.
    pub fn for_request(method: &Method, target: &Uri) -> Option<Self> {
        if *method == Method::GET {
            Self::of(target)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parses an origin such as `https://app.example`. Any path is ignored.
pub fn parse_origin(origin: &str) -> Result<Uri, CacheError> {
    let invalid = |reason: &str| CacheError::InvalidLocator {
        locator: origin.to_owned(),
        reason: reason.to_owned(),
    };

    let uri: Uri = origin.parse().map_err(|_| invalid("not a URI"))?;
    let scheme = uri.scheme().cloned().ok_or_else(|| invalid("missing scheme"))?;
    let authority = uri
        .authority()
        .cloned()
        .ok_or_else(|| invalid("missing host"))?;

    Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query("/")
        .build()
        .map_err(|err| invalid(&err.to_string()))
}

/// Makes `uri` absolute by borrowing scheme and authority from `origin`.
///
/// Absolute URIs are returned unchanged. Relative URIs without an origin
/// cannot be resolved.
pub fn resolve(uri: &Uri, origin: Option<&Uri>) -> Option<Uri> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Some(uri.clone());
    }

    let origin = origin?;
    let path_and_query = uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));

    Uri::builder()
        .scheme(origin.scheme()?.clone())
        .authority(origin.authority()?.clone())
        .path_and_query(path_and_query)
        .build()
        .ok()
}

/// Resolves a configured pre-seed locator into an absolute URI.
pub fn resolve_locator(locator: &str, origin: Option<&Uri>) -> Result<Uri, CacheError> {
    let invalid = |reason: &str| CacheError::InvalidLocator {
        locator: locator.to_owned(),
        reason: reason.to_owned(),
    };

    let uri: Uri = locator.parse().map_err(|_| invalid("not a URI"))?;
    resolve(&uri, origin).ok_or_else(|| invalid("relative locator without an origin"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_covers_scheme_host_path_and_query() {
        let uri = Uri::from_static("https://Raw.GitHubUserContent.com/x/y.json?rev=2");
        let fp = Fingerprint::of(&uri).unwrap();
        assert_eq!(fp.as_str(), "https://raw.githubusercontent.com/x/y.json?rev=2");

        let other = Fingerprint::of(&Uri::from_static(
            "https://raw.githubusercontent.com/x/y.json?rev=3",
        ))
        .unwrap();
        assert_ne!(fp, other);

        let plain_http =
            Fingerprint::of(&Uri::from_static("http://raw.githubusercontent.com/x/y.json?rev=2"))
                .unwrap();
        assert_ne!(fp, plain_http);
    }

    #[test]
    fn fingerprint_requires_absolute_uri() {
        assert!(Fingerprint::of(&Uri::from_static("/media/icon.png")).is_none());
    }

    #[test]
    fn only_gets_are_fingerprinted() {
        let uri = Uri::from_static("https://app.example/index.html");
        assert!(Fingerprint::for_request(&Method::GET, &uri).is_some());
        assert!(Fingerprint::for_request(&Method::HEAD, &uri).is_none());
        assert!(Fingerprint::for_request(&Method::POST, &uri).is_none());
    }

    #[test]
    fn relative_uri_resolves_against_origin() {
        let origin = parse_origin("https://app.example/ignored/path").unwrap();
        let resolved = resolve(&Uri::from_static("/media/icon.png?v=1"), Some(&origin)).unwrap();
        assert_eq!(resolved, "https://app.example/media/icon.png?v=1");

        let absolute = Uri::from_static("https://cdn.example/a");
        assert_eq!(resolve(&absolute, Some(&origin)).unwrap(), absolute);
        assert!(resolve(&Uri::from_static("/a"), None).is_none());
    }

    #[test]
    fn locator_errors_name_the_locator() {
        match resolve_locator("/index.html", None) {
            Err(CacheError::InvalidLocator { locator, .. }) => assert_eq!(locator, "/index.html"),
            other => panic!("expected invalid locator, got {:?}", other),
        }
        assert!(parse_origin("/no-scheme").is_err());
    }
}
