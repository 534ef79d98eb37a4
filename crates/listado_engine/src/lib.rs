//! Async acquisition engine: fetches marketplace result pages, enriches
//! listings with their detail-page condition under a concurrency bound, and
//! composes the filter/sort/sink pipeline. All I/O lives here; the data
//! model and filter semantics live in `listado_core`.

mod decode;
mod enrich;
mod enumerate;
mod export;
mod parse;
mod pipeline;
mod retry;
mod source;
mod translate;
mod types;

pub use decode::{decode_page, DecodedPage};
pub use enrich::{EnrichmentOutcome, EnrichmentPool, DEFAULT_WORKERS};
pub use enumerate::{EnumerateError, PageEnumerator, StopReason, MAX_EMPTY_PAGES};
pub use export::{
    default_export_path, ensure_output_dir, CsvWriter, ExportError, SpreadsheetWriter,
};
pub use parse::{parse_detail_condition, parse_search_page, ParsedPage};
pub use pipeline::{
    ExecutionOptions, Pipeline, PipelineError, DEFAULT_PREVIEW_LIMIT,
};
pub use retry::{RetryPolicy, RetryingClient};
pub use source::{
    build_page_url, BlockDetector, ClientSettings, HttpSourceClient, MarkerBlockDetector,
    PushdownFilters, SourceClient, SourceError, DEFAULT_PAGE_SIZE,
};
pub use translate::{ListadoUrlTranslator, UrlTranslator};
pub use types::{
    AppliedFilters, Completeness, Outcome, PageBatch, PageCursor, PartialReason, PipelineResult,
    RESULT_COLUMNS,
};
