use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;
use url::Url;

/// Placeholder used when an entry's origin URL cannot be parsed.
pub const ORIGIN_PLACEHOLDER: &str = "#";

/// Errors from extracting a site origin out of a feed's `htmlUrl`.
#[derive(Error, Debug)]
pub enum OriginError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
}

/// Reduce a site URL to `scheme://host[:port]`.
///
/// ```
/// use feedwatch::util::site_origin;
///
/// let origin = site_origin("https://blog.example.com/posts/1?x=y").unwrap();
/// assert_eq!(origin, "https://blog.example.com");
/// assert!(site_origin("mailto:someone@example.com").is_err());
/// ```
pub fn site_origin(raw: &str) -> Result<String, OriginError> {
    let url = Url::parse(raw.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(OriginError::UnsupportedScheme(scheme.to_owned())),
    }

    let host = url.host_str().ok_or(OriginError::MissingHost)?;
    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

/// Like [`site_origin`], but degrades to [`ORIGIN_PLACEHOLDER`] instead of failing.
pub fn site_origin_or_placeholder(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return ORIGIN_PLACEHOLDER.to_string();
    };

    match site_origin(raw) {
        Ok(origin) => origin,
        Err(e) => {
            tracing::debug!(url = %raw, error = %e, "Malformed origin URL, using placeholder");
            ORIGIN_PLACEHOLDER.to_string()
        }
    }
}

/// Validates a URL before handing it to a browser collaborator.
///
/// Only http and https are accepted so a hostile feed cannot smuggle
/// `file://` or `javascript:` links through.
pub fn validate_url_for_open(raw: &str) -> Result<Url, OriginError> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(OriginError::UnsupportedScheme(scheme.to_owned())),
    }
}

/// Everything outside the unreserved set and the URI delimiters.
const URI_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'#');

/// Percent-encode a string for use inside a link: reserved URI characters
/// (`/`, `:`, `?`, `#`, ...) are left alone, everything else outside the
/// unreserved set is escaped as UTF-8.
pub fn encode_uri(input: &str) -> String {
    utf8_percent_encode(input, URI_ESCAPE).to_string()
}
