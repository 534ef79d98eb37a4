use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Product condition, enriched from the listing's detail page when the
/// search card does not carry it. `Unknown` is a valid terminal value,
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    New,
    Used,
    Reconditioned,
    #[default]
    Unknown,
}

impl Condition {
    /// Maps the source's Spanish card labels to a condition.
    ///
    /// "nuevo con caja abierta" still counts as new, so the reconditioned
    /// and used markers are checked first.
    pub fn from_card_text(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        if lower.contains("reacondicion") {
            return Some(Condition::Reconditioned);
        }
        if lower.contains("usado") {
            return Some(Condition::Used);
        }
        if lower.contains("nuevo") {
            return Some(Condition::New);
        }
        None
    }

    /// Maps a schema.org `itemCondition` value from a detail page.
    pub fn from_schema_value(value: &str) -> Option<Self> {
        let lower = value.to_lowercase();
        if lower.contains("newcondition") {
            return Some(Condition::New);
        }
        if lower.contains("usedcondition") {
            return Some(Condition::Used);
        }
        if lower.contains("refurbishedcondition") || lower.contains("reconditionedcondition") {
            return Some(Condition::Reconditioned);
        }
        None
    }

    /// Spanish display label, matching the export/preview surface.
    pub fn display_es(self) -> &'static str {
        match self {
            Condition::New => "Nuevo",
            Condition::Used => "Usado",
            Condition::Reconditioned => "Reacondicionado",
            Condition::Unknown => "N/D",
        }
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "new" => Ok(Condition::New),
            "used" => Ok(Condition::Used),
            "reconditioned" => Ok(Condition::Reconditioned),
            "unknown" => Ok(Condition::Unknown),
            other => Err(format!("unknown condition: {other}")),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Condition::New => "new",
            Condition::Used => "used",
            Condition::Reconditioned => "reconditioned",
            Condition::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// One search-result entry as parsed from a page. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListing {
    pub id: String,
    pub title: String,
    /// Price in minor units; absent when the card carried no parseable price.
    pub price: Option<u64>,
    pub original_price: Option<u64>,
    pub currency: String,
    pub permalink: String,
    pub thumbnail: Option<String>,
    pub international: bool,
    /// Page the listing came from, 0-based.
    pub page_index: u32,
    /// Position on that page, 0-based.
    pub position: u32,
    /// Condition read from the search card, when the card showed one.
    /// `Unknown` here means the detail page must be consulted.
    pub card_condition: Condition,
}

/// A listing plus the attributes the enrichment stage derived. Enrichment
/// builds a new value; it never mutates the raw listing in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedListing {
    #[serde(flatten)]
    pub raw: RawListing,
    pub condition: Condition,
    pub discount_pct: u8,
}

impl EnrichedListing {
    pub fn new(raw: RawListing, condition: Condition) -> Self {
        let discount_pct = discount_pct(raw.price, raw.original_price);
        Self {
            raw,
            condition,
            discount_pct,
        }
    }
}

/// Discount percentage: `round(100 * (1 - price/original_price))`, 0 when
/// either price is absent or the original price is not above the current one.
pub fn discount_pct(price: Option<u64>, original_price: Option<u64>) -> u8 {
    let (Some(price), Some(original)) = (price, original_price) else {
        return 0;
    };
    if original == 0 || original <= price {
        return 0;
    }
    let pct = (100.0 * (1.0 - price as f64 / original as f64)).round();
    pct.clamp(0.0, 100.0) as u8
}
