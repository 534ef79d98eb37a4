use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::listing::{Condition, EnrichedListing};
use crate::request::RequestError;

/// Condition criterion; `Any` always passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionFilter {
    #[default]
    Any,
    New,
    Used,
    Reconditioned,
}

impl ConditionFilter {
    fn accepts(self, condition: Condition) -> bool {
        match self {
            ConditionFilter::Any => true,
            ConditionFilter::New => condition == Condition::New,
            ConditionFilter::Used => condition == Condition::Used,
            ConditionFilter::Reconditioned => condition == Condition::Reconditioned,
        }
    }
}

impl std::str::FromStr for ConditionFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(ConditionFilter::Any),
            "new" => Ok(ConditionFilter::New),
            "used" => Ok(ConditionFilter::Used),
            "reconditioned" => Ok(ConditionFilter::Reconditioned),
            other => Err(format!("unknown condition filter: {other}")),
        }
    }
}

/// The multi-criterion filter a listing must survive.
///
/// Word matching is case-insensitive, diacritic-sensitive, substring-based:
/// "gamer" matches "Notebook Gamer Pro".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Lower price bound in minor units; 0 = unbounded.
    pub price_min: u64,
    /// Upper price bound in minor units; 0 = unbounded.
    pub price_max: u64,
    /// Minimum discount percentage; 0 = unbounded.
    pub discount_min: u8,
    pub condition: ConditionFilter,
    /// Every word must appear in the title.
    pub include_words: Vec<String>,
    /// Any match rejects the listing.
    pub exclude_words: Vec<String>,
    pub include_international: bool,
}

impl FilterSpec {
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.price_min > 0 && self.price_max > 0 && self.price_min > self.price_max {
            return Err(RequestError::InvalidPriceRange {
                min: self.price_min,
                max: self.price_max,
            });
        }
        Ok(())
    }

    /// Whether any criterion needs listing-level inspection. When none does,
    /// the fast-count path can return the source-declared total directly.
    pub fn has_listing_criteria(&self) -> bool {
        self.price_min > 0
            || self.price_max > 0
            || self.discount_min > 0
            || self.condition != ConditionFilter::Any
            || self.include_words.iter().any(|w| !w.trim().is_empty())
            || self.exclude_words.iter().any(|w| !w.trim().is_empty())
    }

    /// Whether the condition must be known before filtering, i.e. whether
    /// enrichment affects the survivor set.
    pub fn needs_condition(&self) -> bool {
        self.condition != ConditionFilter::Any
    }
}

/// Criteria a listing can fail, reported by [`explain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    PriceRange,
    DiscountFloor,
    Condition,
    ExcludeWords,
    IncludeWords,
}

/// Pure pass/fail check, evaluated cheapest-first with short-circuiting:
/// price range, discount floor, condition, exclude words, include words.
pub fn matches(listing: &EnrichedListing, spec: &FilterSpec) -> bool {
    passes_price(listing, spec)
        && passes_discount(listing, spec)
        && spec.condition.accepts(listing.condition)
        && passes_exclude_words(listing, spec)
        && passes_include_words(listing, spec)
}

/// Names every criterion the listing fails. Diagnostics only; the pipeline
/// always decides through [`matches`].
pub fn explain(listing: &EnrichedListing, spec: &FilterSpec) -> BTreeSet<Criterion> {
    let mut failed = BTreeSet::new();
    if !passes_price(listing, spec) {
        failed.insert(Criterion::PriceRange);
    }
    if !passes_discount(listing, spec) {
        failed.insert(Criterion::DiscountFloor);
    }
    if !spec.condition.accepts(listing.condition) {
        failed.insert(Criterion::Condition);
    }
    if !passes_exclude_words(listing, spec) {
        failed.insert(Criterion::ExcludeWords);
    }
    if !passes_include_words(listing, spec) {
        failed.insert(Criterion::IncludeWords);
    }
    failed
}

fn passes_price(listing: &EnrichedListing, spec: &FilterSpec) -> bool {
    if spec.price_min == 0 && spec.price_max == 0 {
        return true;
    }
    // A bounded range demands a known price.
    let Some(price) = listing.raw.price else {
        return false;
    };
    if spec.price_min > 0 && price < spec.price_min {
        return false;
    }
    if spec.price_max > 0 && price > spec.price_max {
        return false;
    }
    true
}

fn passes_discount(listing: &EnrichedListing, spec: &FilterSpec) -> bool {
    spec.discount_min == 0 || listing.discount_pct >= spec.discount_min
}

fn passes_exclude_words(listing: &EnrichedListing, spec: &FilterSpec) -> bool {
    let title = listing.raw.title.to_lowercase();
    !spec
        .exclude_words
        .iter()
        .filter(|w| !w.trim().is_empty())
        .any(|w| title.contains(&w.trim().to_lowercase()))
}

fn passes_include_words(listing: &EnrichedListing, spec: &FilterSpec) -> bool {
    let title = listing.raw.title.to_lowercase();
    spec.include_words
        .iter()
        .filter(|w| !w.trim().is_empty())
        .all(|w| title.contains(&w.trim().to_lowercase()))
}
