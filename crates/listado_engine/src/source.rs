use std::time::Duration;

use listado_core::{Condition, ConditionFilter, FilterSpec, SearchRequest};
use reqwest::StatusCode;
use thiserror::Error;
use url::form_urlencoded;

use crate::decode::decode_page;
use crate::parse::{parse_detail_condition, parse_search_page};
use crate::types::{PageBatch, PageCursor};

pub const DEFAULT_PAGE_SIZE: u32 = 48;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Listing filter the source can evaluate server-side. Client-side filtering
/// stays authoritative; these only shrink the pages we have to walk.
const LOCAL_SHIPPING_TOKEN: &str = "SHIPPING*ORIGIN_10215068";

/// Challenge text served instead of results when the session lacks
/// anti-bot state.
const JS_CHALLENGE_MARKER: &str = "This page requires JavaScript to work";

/// Structural markers a real results page carries.
const RESULT_MARKERS: [&str; 3] = [
    "poly-component__title",
    "ui-search-layout",
    "poly-card__content",
];

/// A classified failure from one source interaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The source served a degraded shell page instead of results.
    #[error("source returned a degraded page (blocked or missing session state)")]
    Blocked,
    /// Network trouble, 429 or 5xx; worth retrying.
    #[error("transient source failure: {message}")]
    Transient {
        status: Option<u16>,
        message: String,
    },
    /// The page was removed.
    #[error("listing or page not found")]
    NotFound,
    /// Payload could not be understood.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient { .. })
    }
}

/// One page fetch or one detail fetch against the external source.
/// Retry/backoff lives in [`crate::retry::RetryingClient`], never here
/// and never in the callers.
#[async_trait::async_trait]
pub trait SourceClient: Send + Sync {
    async fn fetch_page(
        &self,
        request: &SearchRequest,
        cursor: &PageCursor,
    ) -> Result<PageBatch, SourceError>;

    async fn fetch_detail(&self, permalink: &str) -> Result<Condition, SourceError>;
}

/// Decides whether a fetched page is a degraded "shell" response. The exact
/// structural signal is source-specific, so implementations are injectable
/// and tested against both a normal and a degraded fixture.
pub trait BlockDetector: Send + Sync {
    fn is_blocked(&self, html: &str) -> bool;
}

/// Default detection: the anti-bot challenge text, or the absence of every
/// expected result container.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerBlockDetector;

impl BlockDetector for MarkerBlockDetector {
    fn is_blocked(&self, html: &str) -> bool {
        if html.contains(JS_CHALLENGE_MARKER) {
            return true;
        }
        !RESULT_MARKERS.iter().any(|marker| html.contains(marker))
    }
}

pub(crate) fn has_js_challenge(html: &str) -> bool {
    html.contains(JS_CHALLENGE_MARKER)
}

/// Filter criteria pushed down into the listing URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushdownFilters {
    pub sort_price: bool,
    pub price_min: u64,
    pub price_max: u64,
    pub discount_min: u8,
    pub condition: ConditionFilter,
}

impl PushdownFilters {
    pub fn from_spec(spec: &FilterSpec, sort_price: bool) -> Self {
        Self {
            sort_price,
            price_min: spec.price_min,
            price_max: spec.price_max,
            discount_min: spec.discount_min,
            condition: spec.condition,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub page_size: u32,
    /// Session cookies rendered as a `Cookie` header, applied to every
    /// request when present.
    pub cookie_header: Option<String>,
    pub pushdown: PushdownFilters,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(20),
            page_size: DEFAULT_PAGE_SIZE,
            cookie_header: None,
            pushdown: PushdownFilters::default(),
        }
    }
}

/// Builds the listing URL for one page of a search.
///
/// Layout follows the source's slug scheme: `_Desde_{offset}` continuation,
/// filter tokens joined by underscores, `NoIndex_True` always, and the
/// local-shipping token unless international listings were requested.
pub fn build_page_url(request: &SearchRequest, pushdown: &PushdownFilters, page_size: u32, page_index: u32) -> String {
    let domain = request.country.domain();
    let slug = slugify(&request.query());
    let mut base = format!("https://listado.{domain}/{slug}");
    if page_index > 0 {
        let offset = u64::from(page_index) * u64::from(page_size) + 1;
        base = format!("{base}_Desde_{offset}");
    }

    let mut tokens: Vec<String> = Vec::new();
    if pushdown.sort_price {
        tokens.push("OrderId_PRICE".to_string());
    }
    if pushdown.price_min > 0 || pushdown.price_max > 0 {
        let low = pushdown.price_min;
        let high = if pushdown.price_max > 0 {
            pushdown.price_max
        } else {
            999_999_999
        };
        tokens.push(format!("PriceRange_{low}-{high}"));
    }
    if pushdown.discount_min > 0 {
        let floor = pushdown.discount_min.clamp(1, 100);
        tokens.push(format!("Discount_{floor}-100"));
    }
    if let Some(token) = condition_token(pushdown.condition) {
        tokens.push(token.to_string());
    }
    tokens.push("NoIndex_True".to_string());
    if !request.include_international {
        tokens.push(LOCAL_SHIPPING_TOKEN.to_string());
    }

    format!("{base}_{}", tokens.join("_"))
}

fn condition_token(condition: ConditionFilter) -> Option<&'static str> {
    match condition {
        ConditionFilter::Any => None,
        ConditionFilter::New => Some("ITEM*CONDITION_2230284"),
        ConditionFilter::Used => Some("ITEM*CONDITION_2230581"),
        ConditionFilter::Reconditioned => Some("ITEM*CONDITION_2234833"),
    }
}

fn slugify(query: &str) -> String {
    form_urlencoded::byte_serialize(query.trim().as_bytes())
        .collect::<String>()
        .replace('+', "-")
}

/// Live HTTP implementation of [`SourceClient`].
pub struct HttpSourceClient {
    client: reqwest::Client,
    settings: ClientSettings,
    detector: Box<dyn BlockDetector>,
}

impl HttpSourceClient {
    pub fn new(settings: ClientSettings) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| SourceError::Transient {
                status: None,
                message: format!("failed to build http client: {err}"),
            })?;
        Ok(Self {
            client,
            settings,
            detector: Box::new(MarkerBlockDetector),
        })
    }

    pub fn with_detector(mut self, detector: Box<dyn BlockDetector>) -> Self {
        self.detector = detector;
        self
    }

    async fn fetch_html(
        &self,
        url: &str,
        cookie_header: Option<&str>,
    ) -> Result<String, SourceError> {
        let mut builder = self.client.get(url);
        if let Some(cookie) = cookie_header.or(self.settings.cookie_header.as_deref()) {
            builder = builder.header(reqwest::header::COOKIE, cookie);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound);
        }
        if !status.is_success() {
            return Err(SourceError::Transient {
                status: Some(status.as_u16()),
                message: status.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        let decoded = decode_page(&bytes, content_type.as_deref());
        log::debug!(
            "fetched {} bytes from {url} ({})",
            bytes.len(),
            decoded.encoding_label
        );
        Ok(decoded.html)
    }
}

#[async_trait::async_trait]
impl SourceClient for HttpSourceClient {
    async fn fetch_page(
        &self,
        request: &SearchRequest,
        cursor: &PageCursor,
    ) -> Result<PageBatch, SourceError> {
        let follow_links = request.search_url.is_some();
        let url = match (&cursor.url, &request.search_url) {
            (Some(next), _) => next.clone(),
            (None, Some(exact)) if cursor.index == 0 => exact.trim().to_string(),
            _ => build_page_url(
                request,
                &self.settings.pushdown,
                self.settings.page_size,
                cursor.index,
            ),
        };

        let html = self
            .fetch_html(&url, request.cookie_header().as_deref())
            .await?;
        if self.detector.is_blocked(&html) {
            return Err(SourceError::Blocked);
        }

        let parsed = parse_search_page(&html, cursor.index, request.country.currency(), &url);
        let has_more = parsed.next_url.is_some();
        let next = has_more.then(|| PageCursor {
            index: cursor.index + 1,
            url: if follow_links { parsed.next_url.clone() } else { None },
        });

        Ok(PageBatch {
            listings: parsed.listings,
            declared_total: parsed.declared_total,
            has_more,
            next,
        })
    }

    async fn fetch_detail(&self, permalink: &str) -> Result<Condition, SourceError> {
        let html = self.fetch_html(permalink, None).await?;
        if has_js_challenge(&html) {
            return Err(SourceError::Blocked);
        }
        // A detail page with no recognizable condition markup is a valid
        // unknown, not a failure.
        Ok(parse_detail_condition(&html).unwrap_or(Condition::Unknown))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> SourceError {
    let status = err.status().map(|s| s.as_u16());
    SourceError::Transient {
        status,
        message: err.to_string(),
    }
}
