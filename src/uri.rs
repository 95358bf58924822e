//! URI resolution registry.
//!
//! Element image sources are URI-like references. Resolution walks pluggable
//! handlers: each handler recognizes a scheme via [`UriHandler::test`] and
//! turns the reference into loadable bytes. The internal `content://`
//! handler is consulted before any registered handler, regardless of
//! registration order — content-store references are never shadowed.
//!
//! Schemes consumed out of the box:
//!
//! | Scheme | Handler |
//! |---|---|
//! | `content://<name>` | internal, backed by the [`ContentStore`] |
//! | `data:...;base64,` | [`DataUriHandler`] |
//! | `http://` / `https://` | [`HttpHandler`] over a caller-supplied [`RemoteFetcher`] |
//!
//! Unknown schemes fail with [`UriError::NoHandler`]; callers with a
//! declared placeholder fall back to it.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;

use crate::content::ContentStore;

/// Scheme prefix for content-store references.
pub const CONTENT_SCHEME: &str = "content://";

#[derive(Error, Debug)]
pub enum UriError {
    #[error("no handler found for uri: {0}")]
    NoHandler(String),
    #[error("asset not in content store: {0}")]
    MissingAsset(String),
    #[error("invalid data uri: {0}")]
    InvalidDataUri(String),
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("remote fetch failed for {url}: {message}")]
    Remote { url: String, message: String },
    #[error("cannot stringify reference: {0}")]
    Unsupported(String),
}

/// Context handed to handlers during resolution.
pub struct ResolveCtx<'a> {
    pub store: &'a ContentStore,
}

/// A pluggable scheme handler.
pub trait UriHandler {
    /// Whether this handler recognizes the reference.
    fn test(&self, uri: &str) -> bool;
    /// Resolve the reference to loadable bytes.
    fn resolve(&self, uri: &str, ctx: &ResolveCtx) -> Result<Arc<Vec<u8>>, UriError>;
}

/// External collaborator that performs network fetches for `http(s)` refs.
pub trait RemoteFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, UriError>;
}

/// Inline `data:` references. Only the base64 form is supported.
pub struct DataUriHandler;

impl UriHandler for DataUriHandler {
    fn test(&self, uri: &str) -> bool {
        uri.starts_with("data:")
    }

    fn resolve(&self, uri: &str, _ctx: &ResolveCtx) -> Result<Arc<Vec<u8>>, UriError> {
        let payload = uri
            .split_once(";base64,")
            .map(|(_, rest)| rest)
            .ok_or_else(|| UriError::InvalidDataUri(uri.to_string()))?;
        Ok(Arc::new(BASE64.decode(payload)?))
    }
}

/// `http(s)://` references, delegated to a [`RemoteFetcher`].
pub struct HttpHandler {
    fetcher: Box<dyn RemoteFetcher>,
}

impl HttpHandler {
    pub fn new(fetcher: Box<dyn RemoteFetcher>) -> Self {
        Self { fetcher }
    }
}

impl UriHandler for HttpHandler {
    fn test(&self, uri: &str) -> bool {
        uri.starts_with("http://") || uri.starts_with("https://")
    }

    fn resolve(&self, uri: &str, _ctx: &ResolveCtx) -> Result<Arc<Vec<u8>>, UriError> {
        self.fetcher.fetch(uri).map(Arc::new)
    }
}

/// Input shapes accepted by [`Resolver::stringify`].
pub enum StringifySource<'a> {
    /// A content-store asset by name.
    Asset(&'a str),
    /// An already-formed reference string.
    Reference(&'a str),
}

/// Ordered handler registry with a fixed-priority internal content handler.
#[derive(Default)]
pub struct Resolver {
    handlers: Vec<Box<dyn UriHandler>>,
}

impl Resolver {
    /// Registry with no external handlers — only `content://` resolves.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `data:` handler pre-registered.
    pub fn with_defaults() -> Self {
        let mut resolver = Self::new();
        resolver.register(Box::new(DataUriHandler));
        resolver
    }

    pub fn register(&mut self, handler: Box<dyn UriHandler>) {
        self.handlers.push(handler);
    }

    /// Resolve a reference to loadable bytes.
    ///
    /// The internal content handler runs first; registered handlers are
    /// then tried in registration order.
    pub fn resolve(&self, uri: &str, ctx: &ResolveCtx) -> Result<Arc<Vec<u8>>, UriError> {
        if let Some(name) = uri.strip_prefix(CONTENT_SCHEME) {
            return ctx
                .store
                .get(name)
                .ok_or_else(|| UriError::MissingAsset(name.to_string()));
        }
        for handler in &self.handlers {
            if handler.test(uri) {
                return handler.resolve(uri, ctx);
            }
        }
        Err(UriError::NoHandler(uri.to_string()))
    }

    /// Produce a canonical reference string for a known asset or an
    /// already-formed reference.
    pub fn stringify(
        &self,
        source: StringifySource<'_>,
        store: &ContentStore,
    ) -> Result<String, UriError> {
        match source {
            StringifySource::Asset(name) => {
                if store.contains(name) {
                    Ok(format!("{CONTENT_SCHEME}{name}"))
                } else {
                    Err(UriError::MissingAsset(name.to_string()))
                }
            }
            StringifySource::Reference(text) => {
                let known = text.starts_with(CONTENT_SCHEME)
                    || text.starts_with("data:")
                    || self.handlers.iter().any(|h| h.test(text));
                if known {
                    Ok(text.to_string())
                } else {
                    Err(UriError::Unsupported(text.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Claims every uri — used to prove the content handler keeps priority.
    struct GreedyHandler;

    impl UriHandler for GreedyHandler {
        fn test(&self, _uri: &str) -> bool {
            true
        }
        fn resolve(&self, _uri: &str, _ctx: &ResolveCtx) -> Result<Arc<Vec<u8>>, UriError> {
            Ok(Arc::new(b"greedy".to_vec()))
        }
    }

    struct StubFetcher;

    impl RemoteFetcher for StubFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, UriError> {
            if url.ends_with("ok.png") {
                Ok(b"remote bytes".to_vec())
            } else {
                Err(UriError::Remote {
                    url: url.to_string(),
                    message: "404".to_string(),
                })
            }
        }
    }

    #[test]
    fn content_scheme_resolves_from_store() {
        let mut store = ContentStore::new();
        store.insert("logo.png", vec![7, 8]);
        let resolver = Resolver::new();
        let ctx = ResolveCtx { store: &store };

        let bytes = resolver.resolve("content://logo.png", &ctx).unwrap();
        assert_eq!(bytes.as_slice(), &[7, 8]);
    }

    #[test]
    fn content_scheme_missing_asset() {
        let store = ContentStore::new();
        let resolver = Resolver::new();
        let ctx = ResolveCtx { store: &store };
        assert!(matches!(
            resolver.resolve("content://nope.png", &ctx),
            Err(UriError::MissingAsset(name)) if name == "nope.png"
        ));
    }

    #[test]
    fn content_handler_beats_registered_handlers() {
        let mut store = ContentStore::new();
        store.insert("a.png", vec![1]);
        let mut resolver = Resolver::new();
        resolver.register(Box::new(GreedyHandler));
        let ctx = ResolveCtx { store: &store };

        // The greedy handler claims everything, but content:// still wins.
        let bytes = resolver.resolve("content://a.png", &ctx).unwrap();
        assert_eq!(bytes.as_slice(), &[1]);
    }

    #[test]
    fn handlers_tried_in_registration_order() {
        let store = ContentStore::new();
        let mut resolver = Resolver::with_defaults();
        resolver.register(Box::new(GreedyHandler));
        let ctx = ResolveCtx { store: &store };

        // data: matches the earlier data handler, not the greedy one.
        let bytes = resolver
            .resolve("data:image/png;base64,AQID", &ctx)
            .unwrap();
        assert_eq!(bytes.as_slice(), &[1, 2, 3]);

        // Everything else falls through to the greedy handler.
        let bytes = resolver.resolve("whatever", &ctx).unwrap();
        assert_eq!(bytes.as_slice(), b"greedy");
    }

    #[test]
    fn unknown_scheme_fails_without_handlers() {
        let store = ContentStore::new();
        let resolver = Resolver::with_defaults();
        let ctx = ResolveCtx { store: &store };
        assert!(matches!(
            resolver.resolve("gopher://old.net/a", &ctx),
            Err(UriError::NoHandler(_))
        ));
    }

    #[test]
    fn data_uri_requires_base64_form() {
        let store = ContentStore::new();
        let resolver = Resolver::with_defaults();
        let ctx = ResolveCtx { store: &store };
        assert!(matches!(
            resolver.resolve("data:text/plain,hello", &ctx),
            Err(UriError::InvalidDataUri(_))
        ));
    }

    #[test]
    fn http_handler_uses_fetcher() {
        let store = ContentStore::new();
        let mut resolver = Resolver::new();
        resolver.register(Box::new(HttpHandler::new(Box::new(StubFetcher))));
        let ctx = ResolveCtx { store: &store };

        let bytes = resolver.resolve("https://cdn.example/ok.png", &ctx).unwrap();
        assert_eq!(bytes.as_slice(), b"remote bytes");
        assert!(matches!(
            resolver.resolve("https://cdn.example/gone.png", &ctx),
            Err(UriError::Remote { .. })
        ));
    }

    #[test]
    fn stringify_asset_and_reference() {
        let mut store = ContentStore::new();
        store.insert("bg.png", vec![]);
        let resolver = Resolver::with_defaults();

        assert_eq!(
            resolver
                .stringify(StringifySource::Asset("bg.png"), &store)
                .unwrap(),
            "content://bg.png"
        );
        assert!(matches!(
            resolver.stringify(StringifySource::Asset("missing"), &store),
            Err(UriError::MissingAsset(_))
        ));
        assert_eq!(
            resolver
                .stringify(StringifySource::Reference("data:x;base64,AA=="), &store)
                .unwrap(),
            "data:x;base64,AA=="
        );
        assert!(matches!(
            resolver.stringify(StringifySource::Reference("plain text"), &store),
            Err(UriError::Unsupported(_))
        ));
    }
}
