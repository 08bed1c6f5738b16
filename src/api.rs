use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

use crate::url_repo::UrlMapping;

/// Path segment that redirects live under.
pub const REDIRECT_PREFIX: &str = "/r";

#[derive(Debug, Deserialize)]
pub struct ShortenPayload {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UrlResponse {
    pub original_url: String,
    pub short_url: String,
    pub short_code: String,
    /// Timestamp in RFC 3339 format
    pub created_at: String,
    pub hit_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Error {
    pub error: String,
    pub error_id: String,
}

impl UrlResponse {
    /// # Errors
    /// Will return [`Err`] if the creation timestamp cannot be formatted.
    pub fn from_mapping(mapping: UrlMapping, base_url: &str) -> Result<Self, time::error::Format> {
        let short_code = mapping.short_code.into_inner();
        Ok(Self {
            short_url: format!(
                "{}{REDIRECT_PREFIX}/{short_code}",
                base_url.trim_end_matches('/')
            ),
            original_url: mapping.original_url,
            short_code,
            created_at: mapping.created_at.format(&Rfc3339)?,
            hit_count: mapping.hit_count,
        })
    }
}
