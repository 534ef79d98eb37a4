use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use listado_core::{Country, EnrichedListing, FilterSpec, RawListing, SearchRequest};
use serde::Serialize;

/// Position of the next page fetch. Page indices start at 0; `url` carries
/// the parsed "next" link when the enumeration follows an exact browser URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub index: u32,
    pub url: Option<String>,
}

impl PageCursor {
    pub fn start() -> Self {
        Self {
            index: 0,
            url: None,
        }
    }
}

/// One fetched and parsed results page. Produced once per page fetch;
/// never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBatch {
    pub listings: Vec<RawListing>,
    /// Total result count the source declared on the page, when present.
    pub declared_total: Option<u64>,
    pub has_more: bool,
    /// Continuation for the following page; `None` when `has_more` is false
    /// or the source exposed no usable next link.
    pub next: Option<PageCursor>,
}

/// Why a result is less than the full answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PartialReason {
    /// A page fetch failed mid-run after retries; earlier pages were kept.
    SourceFailed { page: u32, reason: String },
    /// The source started blocking detail fetches; the remainder carries
    /// unknown condition.
    EnrichmentBlocked,
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for PartialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartialReason::SourceFailed { page, reason } => {
                write!(f, "page {page} failed: {reason}")
            }
            PartialReason::EnrichmentBlocked => write!(f, "detail fetches blocked by the source"),
            PartialReason::Cancelled => write!(f, "cancelled"),
            PartialReason::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Completeness tag attached to every result, so a truncated answer is never
/// mistaken for a final one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum Completeness {
    Complete,
    Partial(PartialReason),
}

impl Completeness {
    pub fn is_complete(&self) -> bool {
        matches!(self, Completeness::Complete)
    }
}

impl fmt::Display for Completeness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completeness::Complete => write!(f, "complete"),
            Completeness::Partial(reason) => write!(f, "partial: {reason}"),
        }
    }
}

/// The resolved criteria a run actually used, echoed back so callers can
/// display "applied filters" without re-deriving them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedFilters {
    pub query: String,
    pub country: Country,
    pub price_min: u64,
    pub price_max: u64,
    pub discount_min: u8,
    pub condition: String,
    pub include_words: Vec<String>,
    pub exclude_words: Vec<String>,
    pub include_international: bool,
}

impl AppliedFilters {
    pub fn resolve(request: &SearchRequest, filter: &FilterSpec) -> Self {
        let clean = |words: &[String]| -> Vec<String> {
            words
                .iter()
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty())
                .collect()
        };
        Self {
            query: request.query(),
            country: request.country,
            price_min: filter.price_min,
            price_max: filter.price_max,
            discount_min: filter.discount_min,
            condition: format!("{:?}", filter.condition).to_lowercase(),
            include_words: clean(&filter.include_words),
            exclude_words: clean(&filter.exclude_words),
            include_international: request.include_international,
        }
    }
}

/// Column names of the preview/export table.
pub const RESULT_COLUMNS: [&str; 6] = [
    "Posicion",
    "Titulo",
    "Precio",
    "Descuento",
    "Estado",
    "Link",
];

/// Mode-dependent payload of a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Count {
        value: u64,
        /// True when the value was scaled from a sample rather than fully
        /// enumerated or source-declared.
        estimate: bool,
    },
    Preview {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
        listings: Vec<EnrichedListing>,
    },
    Export {
        path: PathBuf,
        rows: usize,
    },
}

/// What every operating mode returns.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub outcome: Outcome,
    pub elapsed: Duration,
    pub applied: AppliedFilters,
    pub completeness: Completeness,
}
