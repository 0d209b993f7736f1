//! Utility functions for common operations.
//!
//! - **Origin extraction**: reduce a feed's site URL to `scheme://host` with a
//!   placeholder fallback for malformed input
//! - **Open validation**: only http/https links leave the engine
//! - **URI encoding**: percent-escaping that leaves URI delimiters intact,
//!   used for category ids embedded in links

mod origin;

pub use origin::{
    encode_uri, site_origin, site_origin_or_placeholder, validate_url_for_open, OriginError,
    ORIGIN_PLACEHOLDER,
};
