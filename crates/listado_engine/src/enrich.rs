use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use listado_core::{Condition, EnrichedListing, RawListing};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::source::{SourceClient, SourceError};

/// Default number of concurrent detail fetches.
pub const DEFAULT_WORKERS: usize = 16;

/// What a pass over the pool produced. `listings` always has one entry per
/// input listing; enrichment degrades to an unknown condition, never to a
/// dropped listing.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentOutcome {
    pub listings: Vec<EnrichedListing>,
    /// The source started blocking detail pages; remaining listings carry
    /// unknown condition and no further fetches were attempted.
    pub blocked: bool,
    /// Detail fetches that failed after retries (blocked fetches excluded).
    pub detail_failures: usize,
}

/// Bounded-concurrency condition enrichment.
///
/// Listings whose search card already named a condition are finished without
/// a detail fetch. The rest fan out through a semaphore so at most
/// `workers` detail requests are in flight; one blocked verdict stops all
/// further fetches for the pass.
#[derive(Debug, Clone, Copy)]
pub struct EnrichmentPool {
    workers: usize,
}

impl Default for EnrichmentPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl EnrichmentPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub async fn enrich<S: SourceClient>(
        &self,
        client: &S,
        batch: Vec<RawListing>,
        cancel: &CancellationToken,
    ) -> EnrichmentOutcome {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let blocked = AtomicBool::new(false);
        let total = batch.len();

        let mut tasks = FuturesUnordered::new();
        for (index, raw) in batch.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let blocked = &blocked;
            tasks.push(async move {
                let resolved = if raw.card_condition != Condition::Unknown {
                    Resolved::Known(raw.card_condition)
                } else if cancel.is_cancelled() || blocked.load(Ordering::Acquire) {
                    Resolved::Skipped
                } else {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                    // Re-check after waiting for a slot; a block verdict
                    // may have landed in the meantime.
                    if cancel.is_cancelled() || blocked.load(Ordering::Acquire) {
                        Resolved::Skipped
                    } else {
                        match client.fetch_detail(&raw.permalink).await {
                            Ok(condition) => Resolved::Known(condition),
                            Err(SourceError::Blocked) => {
                                blocked.store(true, Ordering::Release);
                                Resolved::Skipped
                            }
                            Err(err) => {
                                log::warn!("detail fetch failed for {}: {err}", raw.permalink);
                                Resolved::Failed
                            }
                        }
                    }
                };
                (index, raw, resolved)
            });
        }

        let mut slots: Vec<Option<EnrichedListing>> = std::iter::repeat_with(|| None)
            .take(total)
            .collect();
        let mut detail_failures = 0usize;
        while let Some((index, raw, resolved)) = tasks.next().await {
            let condition = match resolved {
                Resolved::Known(condition) => condition,
                Resolved::Skipped => Condition::Unknown,
                Resolved::Failed => {
                    detail_failures += 1;
                    Condition::Unknown
                }
            };
            slots[index] = Some(EnrichedListing::new(raw, condition));
        }

        EnrichmentOutcome {
            listings: slots.into_iter().flatten().collect(),
            blocked: blocked.load(Ordering::Acquire),
            detail_failures,
        }
    }
}

enum Resolved {
    Known(Condition),
    Skipped,
    Failed,
}
