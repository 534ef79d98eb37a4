use std::path::PathBuf;
use std::time::Instant;

use listado_core::{matches, EnrichedListing, FilterSpec, RequestError, SearchRequest};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::enrich::{EnrichmentPool, DEFAULT_WORKERS};
use crate::enumerate::{EnumerateError, PageEnumerator, StopReason};
use crate::export::{default_export_path, CsvWriter, ExportError, SpreadsheetWriter};
use crate::source::{SourceClient, SourceError};
use crate::types::{
    AppliedFilters, Completeness, Outcome, PartialReason, PipelineResult, RESULT_COLUMNS,
};

/// Default number of listings a preview shows.
pub const DEFAULT_PREVIEW_LIMIT: usize = 20;

/// Per-run tunables. Everything travels explicitly; a pipeline holds no
/// ambient configuration.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Overrides the request's page budget when set.
    pub max_pages: Option<u32>,
    pub worker_count: usize,
    pub sort_by_price: bool,
    pub preview_limit: usize,
    pub cancel: CancellationToken,
    /// Wall-clock budget for the whole run; sugar over the token.
    pub deadline: Option<std::time::Duration>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_pages: None,
            worker_count: DEFAULT_WORKERS,
            sort_by_price: false,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }
}

/// Run-level failures. Anything that truncates rather than invalidates a run
/// shows up as [`Completeness::Partial`] on a successful result instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(
        "blocked by the source on page {page}{}",
        if *cookies_supplied { "" } else { "; supplying browser session cookies may help" }
    )]
    Blocked { page: u32, cookies_supplied: bool },
    #[error("source unavailable: {0}")]
    Transient(#[source] SourceError),
    #[error("first results page could not be understood: {0}")]
    Malformed(String),
    #[error(transparent)]
    InvalidRequest(#[from] RequestError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Composes enumerator, enrichment pool, filter, sort and sink into the four
/// operating modes. All modes share one collection path, so fast and exact
/// counts always agree on the filter composition.
pub struct Pipeline<S> {
    client: S,
    writer: Box<dyn SpreadsheetWriter>,
}

impl<S: SourceClient> Pipeline<S> {
    pub fn new(client: S) -> Self {
        Self {
            client,
            writer: Box::new(CsvWriter),
        }
    }

    pub fn with_writer(mut self, writer: Box<dyn SpreadsheetWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// One page fetch, then either the source-declared total as-is (no
    /// listing-level criteria) or that total scaled by the sample pass-rate.
    pub async fn run_fast_count(
        &self,
        request: &SearchRequest,
        filter: &FilterSpec,
        options: &ExecutionOptions,
    ) -> Result<PipelineResult, PipelineError> {
        let run = RunContext::start(request, filter)?;
        let cancel = deadline_token(options);

        let mut enumerator = PageEnumerator::new(&self.client, request, 1, cancel.clone());
        let sample = enumerator.next_page().await.map_err(map_enumerate)?;
        let sample = sample.unwrap_or_default();
        let declared = enumerator.declared_total();

        let (value, estimate, partial) = if !filter.has_listing_criteria() {
            match declared {
                Some(total) => (total, false, None),
                // No declared total on the page; the sample is all we know.
                None => (sample.len() as u64, true, None),
            }
        } else {
            let sample_len = sample.len();
            let (enriched, partial) = self.enrich_batch(sample, options, &cancel).await;
            let survivors = enriched.iter().filter(|l| matches(l, filter)).count();
            let value = match declared {
                Some(total) if sample_len > 0 => {
                    let rate = survivors as f64 / sample_len as f64;
                    (total as f64 * rate).round() as u64
                }
                _ => survivors as u64,
            };
            (value, true, partial)
        };

        Ok(run.finish(
            Outcome::Count { value, estimate },
            partial.or_else(|| stop_partial(enumerator.stop_reason(), options)),
        ))
    }

    /// Full enumerate → enrich → filter, counting survivors.
    pub async fn run_exact_count(
        &self,
        request: &SearchRequest,
        filter: &FilterSpec,
        options: &ExecutionOptions,
    ) -> Result<PipelineResult, PipelineError> {
        let run = RunContext::start(request, filter)?;
        let (survivors, partial) = self.collect(request, filter, options, None).await?;
        Ok(run.finish(
            Outcome::Count {
                value: survivors.len() as u64,
                estimate: false,
            },
            partial,
        ))
    }

    /// Collect until `preview_limit` survivors, sort if requested, render the
    /// tabular rows.
    pub async fn run_preview(
        &self,
        request: &SearchRequest,
        filter: &FilterSpec,
        options: &ExecutionOptions,
    ) -> Result<PipelineResult, PipelineError> {
        let run = RunContext::start(request, filter)?;
        let needed = (options.preview_limit > 0).then_some(options.preview_limit);
        let (mut survivors, partial) = self.collect(request, filter, options, needed).await?;
        if options.sort_by_price {
            sort_by_price(&mut survivors);
        }
        if let Some(limit) = needed {
            survivors.truncate(limit);
        }
        let rows = render_rows(&survivors);
        Ok(run.finish(
            Outcome::Preview {
                columns: RESULT_COLUMNS.iter().map(|c| c.to_string()).collect(),
                rows,
                listings: survivors,
            },
            partial,
        ))
    }

    /// Full collection handed to the spreadsheet writer. `dest` of `None`
    /// derives a deterministic path under `exports/`.
    pub async fn run_export(
        &self,
        request: &SearchRequest,
        filter: &FilterSpec,
        options: &ExecutionOptions,
        dest: Option<PathBuf>,
    ) -> Result<PipelineResult, PipelineError> {
        let run = RunContext::start(request, filter)?;
        let (mut survivors, partial) = self.collect(request, filter, options, None).await?;
        if options.sort_by_price {
            sort_by_price(&mut survivors);
        }
        let rows = render_rows(&survivors);
        let path = dest.unwrap_or_else(|| default_export_path(request));
        let path = self.writer.write(&path, &RESULT_COLUMNS, &rows)?;
        log::info!("exported {} rows to {}", rows.len(), path.display());
        Ok(run.finish(
            Outcome::Export {
                path,
                rows: rows.len(),
            },
            partial,
        ))
    }

    /// Shared enumerate/enrich/filter loop. Stops early once `needed`
    /// survivors exist; that early stop is a budget, not a truncation, so it
    /// never marks the result partial.
    async fn collect(
        &self,
        request: &SearchRequest,
        filter: &FilterSpec,
        options: &ExecutionOptions,
        needed: Option<usize>,
    ) -> Result<(Vec<EnrichedListing>, Option<PartialReason>), PipelineError> {
        let cancel = deadline_token(options);
        let max_pages = effective_max_pages(request, options);
        let mut enumerator = PageEnumerator::new(&self.client, request, max_pages, cancel.clone());

        let mut survivors: Vec<EnrichedListing> = Vec::new();
        let mut partial = None;
        loop {
            let Some(batch) = enumerator.next_page().await.map_err(map_enumerate)? else {
                break;
            };
            let (enriched, blocked) = self.enrich_batch(batch, options, &cancel).await;
            survivors.extend(enriched.into_iter().filter(|l| matches(l, filter)));
            if blocked.is_some() {
                partial = blocked;
                break;
            }
            if needed.is_some_and(|n| survivors.len() >= n) {
                break;
            }
        }

        let partial = partial.or_else(|| stop_partial(enumerator.stop_reason(), options));
        Ok((survivors, partial))
    }

    /// Enrichment for one page batch; a block verdict from the pool comes
    /// back as the partial reason.
    async fn enrich_batch(
        &self,
        batch: Vec<listado_core::RawListing>,
        options: &ExecutionOptions,
        cancel: &CancellationToken,
    ) -> (Vec<EnrichedListing>, Option<PartialReason>) {
        let pool = EnrichmentPool::new(options.worker_count);
        let outcome = pool.enrich(&self.client, batch, cancel).await;
        let partial = outcome.blocked.then_some(PartialReason::EnrichmentBlocked);
        (outcome.listings, partial)
    }
}

/// Validation plus the clock and the applied-filters echo every mode shares.
struct RunContext {
    started: Instant,
    applied: AppliedFilters,
}

impl RunContext {
    fn start(request: &SearchRequest, filter: &FilterSpec) -> Result<Self, PipelineError> {
        request.validate()?;
        filter.validate()?;
        Ok(Self {
            started: Instant::now(),
            applied: AppliedFilters::resolve(request, filter),
        })
    }

    fn finish(self, outcome: Outcome, partial: Option<PartialReason>) -> PipelineResult {
        PipelineResult {
            outcome,
            elapsed: self.started.elapsed(),
            applied: self.applied,
            completeness: match partial {
                Some(reason) => Completeness::Partial(reason),
                None => Completeness::Complete,
            },
        }
    }
}

/// Child token that also fires on the deadline, so every stage observes one
/// signal for both.
fn deadline_token(options: &ExecutionOptions) -> CancellationToken {
    let token = options.cancel.child_token();
    if let Some(deadline) = options.deadline {
        let deadline_side = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            deadline_side.cancel();
        });
    }
    token
}

fn effective_max_pages(request: &SearchRequest, options: &ExecutionOptions) -> u32 {
    let budget = options.max_pages.unwrap_or(request.max_pages);
    if budget == 0 {
        u32::MAX
    } else {
        budget
    }
}

fn stop_partial(stop: Option<&StopReason>, options: &ExecutionOptions) -> Option<PartialReason> {
    match stop? {
        StopReason::SourceFailed { page, reason } => Some(PartialReason::SourceFailed {
            page: *page,
            reason: reason.clone(),
        }),
        StopReason::Cancelled => {
            if options.cancel.is_cancelled() {
                Some(PartialReason::Cancelled)
            } else {
                Some(PartialReason::DeadlineExceeded)
            }
        }
        StopReason::Exhausted | StopReason::PageBudget | StopReason::EmptyStreak => None,
    }
}

fn map_enumerate(err: EnumerateError) -> PipelineError {
    match err {
        EnumerateError::Blocked {
            page,
            cookies_supplied,
        } => PipelineError::Blocked {
            page,
            cookies_supplied,
        },
        EnumerateError::FirstPageFailed { source } => match source {
            SourceError::Malformed(reason) => PipelineError::Malformed(reason),
            other => PipelineError::Transient(other),
        },
    }
}

/// Ascending price, ties broken by page order; unpriced listings sort last.
fn sort_by_price(listings: &mut [EnrichedListing]) {
    listings.sort_by_key(|l| {
        (
            l.raw.price.unwrap_or(u64::MAX),
            l.raw.page_index,
            l.raw.position,
        )
    });
}

fn render_rows(listings: &[EnrichedListing]) -> Vec<Vec<String>> {
    listings
        .iter()
        .enumerate()
        .map(|(i, l)| {
            vec![
                (i + 1).to_string(),
                l.raw.title.clone(),
                format_price(l.raw.price),
                format_discount(l.discount_pct),
                l.condition.display_es().to_string(),
                l.raw.permalink.clone(),
            ]
        })
        .collect()
}

/// Dot-grouped integer price, `N/D` when the card carried none.
fn format_price(price: Option<u64>) -> String {
    let Some(price) = price else {
        return "N/D".to_string();
    };
    let digits = price.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    out
}

fn format_discount(pct: u8) -> String {
    if pct == 0 {
        String::new()
    } else {
        format!("{pct}%")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use listado_core::{Condition, Country, FilterSpec, RawListing, SearchRequest};
    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    use super::{
        format_price, sort_by_price, ExecutionOptions, Pipeline, PipelineError,
    };
    use crate::source::{SourceClient, SourceError};
    use crate::types::{Completeness, Outcome, PageBatch, PageCursor, PartialReason};

    fn listing(permalink: &str, page: u32, position: u32, price: Option<u64>) -> RawListing {
        RawListing {
            id: format!("MLC-{permalink}"),
            title: format!("Notebook {permalink}"),
            price,
            original_price: None,
            currency: "CLP".into(),
            permalink: format!("https://example.com/{permalink}"),
            thumbnail: None,
            international: false,
            page_index: page,
            position,
            card_condition: Condition::New,
        }
    }

    fn page_of(count: u32, page: u32, has_more: bool, declared: Option<u64>) -> PageBatch {
        PageBatch {
            listings: (0..count)
                .map(|i| listing(&format!("p{page}-{i}"), page, i, Some(100_000 + u64::from(i))))
                .collect(),
            declared_total: declared,
            has_more,
            next: has_more.then(|| PageCursor {
                index: page + 1,
                url: None,
            }),
        }
    }

    struct Scripted {
        pages: Mutex<Vec<Result<PageBatch, SourceError>>>,
    }

    impl Scripted {
        fn new(pages: Vec<Result<PageBatch, SourceError>>) -> Self {
            Self {
                pages: Mutex::new(pages),
            }
        }
    }

    #[async_trait::async_trait]
    impl SourceClient for Scripted {
        async fn fetch_page(
            &self,
            _request: &SearchRequest,
            cursor: &PageCursor,
        ) -> Result<PageBatch, SourceError> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                panic!("fetched past the scripted pages (page {})", cursor.index);
            }
            pages.remove(0)
        }

        async fn fetch_detail(&self, _permalink: &str) -> Result<Condition, SourceError> {
            Ok(Condition::New)
        }
    }

    fn request() -> SearchRequest {
        SearchRequest::with_keywords(["notebook"], Country::Cl)
    }

    #[tokio::test]
    async fn exact_count_walks_both_pages() {
        let pipeline = Pipeline::new(Scripted::new(vec![
            Ok(page_of(48, 0, true, Some(80))),
            Ok(page_of(32, 1, false, None)),
        ]));
        let result = pipeline
            .run_exact_count(&request(), &FilterSpec::default(), &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(
            result.outcome,
            Outcome::Count {
                value: 80,
                estimate: false,
            }
        );
        assert_eq!(result.completeness, Completeness::Complete);
    }

    #[tokio::test]
    async fn fast_count_returns_the_declared_total_without_criteria() {
        let pipeline = Pipeline::new(Scripted::new(vec![Ok(page_of(48, 0, true, Some(1234)))]));
        let result = pipeline
            .run_fast_count(&request(), &FilterSpec::default(), &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(
            result.outcome,
            Outcome::Count {
                value: 1234,
                estimate: false,
            }
        );
    }

    #[tokio::test]
    async fn fast_count_scales_the_total_by_the_sample_pass_rate() {
        // 48-listing sample, prices 100_000..100_047; a cap at 100_011
        // passes 12 of 48, a quarter of the declared 1000.
        let pipeline = Pipeline::new(Scripted::new(vec![Ok(page_of(48, 0, true, Some(1000)))]));
        let filter = FilterSpec {
            price_max: 100_011,
            ..FilterSpec::default()
        };
        let result = pipeline
            .run_fast_count(&request(), &filter, &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(
            result.outcome,
            Outcome::Count {
                value: 250,
                estimate: true,
            }
        );
    }

    #[tokio::test]
    async fn blocked_first_page_is_a_run_level_error() {
        let pipeline = Pipeline::new(Scripted::new(vec![Err(SourceError::Blocked)]));
        let err = pipeline
            .run_exact_count(&request(), &FilterSpec::default(), &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Blocked {
                page: 0,
                cookies_supplied: false,
            }
        ));
    }

    #[tokio::test]
    async fn mid_run_failure_yields_a_partial_count() {
        let pipeline = Pipeline::new(Scripted::new(vec![
            Ok(page_of(48, 0, true, Some(96))),
            Err(SourceError::Transient {
                status: Some(503),
                message: "unavailable".into(),
            }),
        ]));
        let result = pipeline
            .run_exact_count(&request(), &FilterSpec::default(), &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(
            result.outcome,
            Outcome::Count {
                value: 48,
                estimate: false,
            }
        );
        assert!(matches!(
            result.completeness,
            Completeness::Partial(PartialReason::SourceFailed { page: 1, .. })
        ));
    }

    #[tokio::test]
    async fn invalid_request_never_reaches_the_source() {
        let pipeline = Pipeline::new(Scripted::new(Vec::new()));
        let empty = SearchRequest::with_keywords(Vec::<String>::new(), Country::Cl);
        let err = pipeline
            .run_exact_count(&empty, &FilterSpec::default(), &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));

        let inverted = FilterSpec {
            price_min: 900,
            price_max: 100,
            ..FilterSpec::default()
        };
        let err = pipeline
            .run_exact_count(&request(), &inverted, &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn preview_renders_sorted_rows_with_tie_break_by_position() {
        let batch = PageBatch {
            listings: vec![
                listing("a", 0, 1, Some(500)),
                listing("b", 0, 2, Some(200)),
                listing("c", 0, 3, Some(200)),
                listing("d", 0, 4, Some(800)),
            ],
            declared_total: Some(4),
            has_more: false,
            next: None,
        };
        let pipeline = Pipeline::new(Scripted::new(vec![Ok(batch)]));
        let options = ExecutionOptions {
            sort_by_price: true,
            ..ExecutionOptions::default()
        };
        let result = pipeline
            .run_preview(&request(), &FilterSpec::default(), &options)
            .await
            .unwrap();
        let Outcome::Preview { columns, rows, .. } = result.outcome else {
            panic!("expected a preview outcome");
        };
        assert_eq!(
            columns,
            vec!["Posicion", "Titulo", "Precio", "Descuento", "Estado", "Link"]
        );
        let titles: Vec<&str> = rows.iter().map(|r| r[1].as_str()).collect();
        assert_eq!(
            titles,
            vec!["Notebook b", "Notebook c", "Notebook a", "Notebook d"]
        );
        assert_eq!(rows[0][0], "1");
        assert_eq!(rows[0][4], "Nuevo");
    }

    #[tokio::test]
    async fn preview_stops_once_the_limit_is_reached() {
        // Page 1 exists but the limit is satisfied by page 0; fetching it
        // would panic the scripted client via over-read of an empty script.
        let pipeline = Pipeline::new(Scripted::new(vec![Ok(page_of(48, 0, true, None))]));
        let options = ExecutionOptions {
            preview_limit: 10,
            ..ExecutionOptions::default()
        };
        let result = pipeline
            .run_preview(&request(), &FilterSpec::default(), &options)
            .await
            .unwrap();
        let Outcome::Preview { rows, .. } = result.outcome else {
            panic!("expected a preview outcome");
        };
        assert_eq!(rows.len(), 10);
        assert_eq!(result.completeness, Completeness::Complete);
    }

    #[tokio::test]
    async fn export_writes_through_the_injected_writer() {
        use std::path::{Path, PathBuf};
        use std::sync::{Arc, Mutex};

        use crate::export::{ExportError, SpreadsheetWriter};

        #[derive(Clone, Default)]
        struct Recording {
            written: Arc<Mutex<Vec<(PathBuf, usize)>>>,
        }

        impl SpreadsheetWriter for Recording {
            fn write(
                &self,
                path: &Path,
                _columns: &[&str],
                rows: &[Vec<String>],
            ) -> Result<PathBuf, ExportError> {
                self.written
                    .lock()
                    .unwrap()
                    .push((path.to_path_buf(), rows.len()));
                Ok(path.to_path_buf())
            }
        }

        let writer = Recording::default();
        let pipeline = Pipeline::new(Scripted::new(vec![Ok(page_of(5, 0, false, None))]))
            .with_writer(Box::new(writer.clone()));
        let result = pipeline
            .run_export(
                &request(),
                &FilterSpec::default(),
                &ExecutionOptions::default(),
                None,
            )
            .await
            .unwrap();
        let Outcome::Export { path, rows } = result.outcome else {
            panic!("expected an export outcome");
        };
        assert_eq!(rows, 5);
        assert!(path.starts_with("exports"));
        assert_eq!(writer.written.lock().unwrap().as_slice(), &[(path, 5)]);
    }

    #[tokio::test]
    async fn cancellation_marks_the_result_partial() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pipeline = Pipeline::new(Scripted::new(vec![Ok(page_of(5, 0, true, None))]));
        let options = ExecutionOptions {
            cancel,
            ..ExecutionOptions::default()
        };
        let result = pipeline
            .run_exact_count(&request(), &FilterSpec::default(), &options)
            .await
            .unwrap();
        assert_eq!(
            result.completeness,
            Completeness::Partial(PartialReason::Cancelled)
        );
    }

    #[tokio::test]
    async fn deadline_marks_the_result_partial() {
        struct Slow;

        #[async_trait::async_trait]
        impl SourceClient for Slow {
            async fn fetch_page(
                &self,
                _request: &SearchRequest,
                cursor: &PageCursor,
            ) -> Result<PageBatch, SourceError> {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(page_of(2, cursor.index, true, None))
            }

            async fn fetch_detail(&self, _permalink: &str) -> Result<Condition, SourceError> {
                Ok(Condition::New)
            }
        }

        let pipeline = Pipeline::new(Slow);
        let options = ExecutionOptions {
            deadline: Some(Duration::from_millis(30)),
            ..ExecutionOptions::default()
        };
        let result = pipeline
            .run_exact_count(&request(), &FilterSpec::default(), &options)
            .await
            .unwrap();
        assert_eq!(
            result.completeness,
            Completeness::Partial(PartialReason::DeadlineExceeded)
        );
    }

    #[test]
    fn price_formatting_groups_thousands() {
        assert_eq!(format_price(Some(999)), "999");
        assert_eq!(format_price(Some(1_234_567)), "1.234.567");
        assert_eq!(format_price(None), "N/D");
    }

    #[test]
    fn unpriced_listings_sort_last() {
        let mut listings = vec![
            listado_core::EnrichedListing::new(listing("a", 0, 1, None), Condition::New),
            listado_core::EnrichedListing::new(listing("b", 0, 2, Some(300)), Condition::New),
        ];
        sort_by_price(&mut listings);
        assert_eq!(listings[0].raw.permalink, "https://example.com/b");
    }
}
