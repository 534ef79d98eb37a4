use std::collections::HashSet;

use listado_core::{RawListing, SearchRequest};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::source::{SourceClient, SourceError};
use crate::types::PageCursor;

/// Consecutive result-free pages tolerated before giving up on the walk.
/// The source sometimes pads its declared total with pages that render
/// empty, so a single empty page is not the end.
pub const MAX_EMPTY_PAGES: u32 = 5;

/// Why a page walk stopped without an error. Distinct from a block: every
/// variant here means the listings gathered so far are trustworthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The source reported no further page.
    Exhausted,
    /// The configured page budget was reached.
    PageBudget,
    /// Too many consecutive pages yielded nothing new.
    EmptyStreak,
    /// A mid-run page failed after retries; earlier pages were kept.
    SourceFailed { page: u32, reason: String },
    Cancelled,
}

/// Walk-level failures that invalidate the run rather than truncate it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnumerateError {
    /// The source served a degraded shell instead of results.
    #[error("blocked by the source on page {page}")]
    Blocked { page: u32, cookies_supplied: bool },
    /// The very first page failed, so there is nothing to truncate to.
    #[error("first results page failed: {source}")]
    FirstPageFailed {
        #[source]
        source: SourceError,
    },
}

/// Sequential, stateful walk over result pages.
///
/// Pages are fetched lazily, one per [`next_page`](Self::next_page) call, so
/// callers that stop early (fast count, small previews) never pay for pages
/// they do not read. Duplicate permalinks are dropped across the whole walk,
/// and international listings are dropped up front unless requested.
pub struct PageEnumerator<'a, S> {
    client: &'a S,
    request: &'a SearchRequest,
    cancel: CancellationToken,
    max_pages: u32,
    cursor: Option<PageCursor>,
    seen: HashSet<String>,
    empty_streak: u32,
    pages_fetched: u32,
    declared_total: Option<u64>,
    stop: Option<StopReason>,
}

impl<'a, S: SourceClient> PageEnumerator<'a, S> {
    pub fn new(
        client: &'a S,
        request: &'a SearchRequest,
        max_pages: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            request,
            cancel,
            max_pages,
            cursor: Some(PageCursor::start()),
            seen: HashSet::new(),
            empty_streak: 0,
            pages_fetched: 0,
            declared_total: None,
            stop: None,
        }
    }

    /// Total result count the source declared, captured from the first page
    /// that carried one.
    pub fn declared_total(&self) -> Option<u64> {
        self.declared_total
    }

    /// Why the walk ended. `None` while pages remain.
    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop.as_ref()
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Fetch and filter the next page. `Ok(None)` means the walk is over;
    /// [`stop_reason`](Self::stop_reason) says why.
    pub async fn next_page(&mut self) -> Result<Option<Vec<RawListing>>, EnumerateError> {
        loop {
            if self.stop.is_some() {
                return Ok(None);
            }
            let Some(cursor) = self.cursor.clone() else {
                self.stop = Some(StopReason::Exhausted);
                return Ok(None);
            };
            if self.cancel.is_cancelled() {
                self.stop = Some(StopReason::Cancelled);
                return Ok(None);
            }
            if self.pages_fetched >= self.max_pages {
                self.stop = Some(StopReason::PageBudget);
                return Ok(None);
            }

            let batch = match self.client.fetch_page(self.request, &cursor).await {
                Ok(batch) => batch,
                Err(SourceError::Blocked) => {
                    return Err(EnumerateError::Blocked {
                        page: cursor.index,
                        cookies_supplied: !self.request.cookies.is_empty(),
                    });
                }
                // The walk ran off the end of the results.
                Err(SourceError::NotFound) => {
                    self.stop = Some(StopReason::Exhausted);
                    return Ok(None);
                }
                Err(err) if cursor.index == 0 => {
                    return Err(EnumerateError::FirstPageFailed { source: err });
                }
                Err(err) => {
                    log::warn!("page {} failed after retries: {err}", cursor.index);
                    self.stop = Some(StopReason::SourceFailed {
                        page: cursor.index,
                        reason: err.to_string(),
                    });
                    return Ok(None);
                }
            };

            self.pages_fetched += 1;
            if self.declared_total.is_none() {
                self.declared_total = batch.declared_total;
            }
            self.cursor = if batch.has_more { batch.next } else { None };

            let mut fresh = Vec::with_capacity(batch.listings.len());
            for listing in batch.listings {
                if listing.international && !self.request.include_international {
                    continue;
                }
                if self.seen.insert(listing.permalink.clone()) {
                    fresh.push(listing);
                }
            }

            if fresh.is_empty() {
                self.empty_streak += 1;
                log::debug!(
                    "page {} added nothing new ({} empty in a row)",
                    cursor.index,
                    self.empty_streak
                );
                if self.empty_streak >= MAX_EMPTY_PAGES {
                    self.stop = Some(StopReason::EmptyStreak);
                    return Ok(None);
                }
                continue;
            }

            self.empty_streak = 0;
            return Ok(Some(fresh));
        }
    }
}
