//! Listado core: pure data model and filter engine.
//!
//! No I/O lives here. The engine crate layers fetching, pagination and
//! enrichment on top of these types.
mod country;
mod filter;
mod listing;
mod request;

pub use country::Country;
pub use filter::{Criterion, FilterSpec, ConditionFilter, matches, explain};
pub use listing::{discount_pct, Condition, EnrichedListing, RawListing};
pub use request::{parse_cookie_pairs, RequestError, SearchRequest};
