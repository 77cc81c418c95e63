//! URL parsing for user input and resource lists.

use url::Url;

/// Error type for URL parsing failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<UrlError> for permacache_core::Error {
    fn from(err: UrlError) -> Self {
        permacache_core::Error::InvalidInput(err.to_string())
    }
}

/// Parse a URL typed by a caller.
///
/// Whitespace is trimmed, a missing scheme defaults to `https`, the host is
/// lower-cased and the fragment dropped. The query string is kept as is.
pub fn canonicalize(input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let with_scheme = if trimmed.contains("://") { trimmed.to_string() } else { format!("https://{trimmed}") };
    let mut parsed = Url::parse(&with_scheme).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(UrlError::UnsupportedScheme(parsed.scheme().to_string()));
    }

    if let Some(host) = parsed.host_str().map(str::to_lowercase) {
        parsed
            .set_host(Some(&host))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }
    parsed.set_fragment(None);

    Ok(parsed)
}

/// Resolve a resource reference from an API payload.
///
/// Protocol-relative references (`//upload.wikimedia.org/...`) take the
/// scheme of `base`; relative paths resolve against `base`.
pub fn resolve_resource(base: &Url, reference: &str) -> Result<Url, UrlError> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(UrlError::Empty);
    }
    if let Some(rest) = reference.strip_prefix("//") {
        return Url::parse(&format!("{}://{rest}", base.scheme())).map_err(|e| UrlError::InvalidUrl(e.to_string()));
    }
    base.join(reference).map_err(|e| UrlError::InvalidUrl(e.to_string()))
}
