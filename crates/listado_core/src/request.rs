use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Country;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("a search needs keywords or an exact listing URL")]
    MissingQuery,
    #[error("price_min ({min}) is above price_max ({max})")]
    InvalidPriceRange { min: u64, max: u64 },
    #[error("not a recognizable listing URL: {0}")]
    UnsupportedUrl(String),
}

/// One search as the caller specified it. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Keyword terms joined into the listing slug.
    pub keywords: Vec<String>,
    pub country: Country,
    /// Exact listing URL captured from a browser; replayed verbatim for the
    /// first page, with later pages following the parsed "next" link.
    pub search_url: Option<String>,
    /// Session cookies applied to every request. Insertion order is
    /// irrelevant to the source.
    pub cookies: Vec<(String, String)>,
    /// Page budget; 0 means unbounded.
    pub max_pages: u32,
    pub include_international: bool,
}

impl SearchRequest {
    pub fn with_keywords<I, S>(keywords: I, country: Country) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            country,
            search_url: None,
            cookies: Vec::new(),
            max_pages: 0,
            include_international: false,
        }
    }

    /// Invariant check: keywords non-empty or exact URL present.
    pub fn validate(&self) -> Result<(), RequestError> {
        let has_keywords = self.keywords.iter().any(|w| !w.trim().is_empty());
        if !has_keywords && self.search_url.as_deref().map_or(true, str::is_empty) {
            return Err(RequestError::MissingQuery);
        }
        Ok(())
    }

    /// Keywords joined for display and for slug building.
    pub fn query(&self) -> String {
        self.keywords.join(" ")
    }

    /// Cookie pairs rendered as a single `Cookie` header value, or `None`
    /// when no session state was supplied.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Parses a raw `Cookie` header ("a=1; b=2") into name/value pairs.
///
/// Tolerates a UTF-8 BOM at the start (cookie files saved from Windows
/// editors carry one) and skips tokens without a `=`.
pub fn parse_cookie_pairs(raw: &str) -> Vec<(String, String)> {
    raw.trim_start_matches('\u{feff}')
        .split(';')
        .filter_map(|token| {
            let (name, value) = token.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}
