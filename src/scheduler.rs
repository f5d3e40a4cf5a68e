//! Batch scheduler with memory-exhaustion recovery.
//!
//! Work is driven in bounded batches. When a batch trips the exhaustion
//! signal the whole batch is abandoned, the failing size becomes a watermark
//! that is never retried upward within the run, the size is halved, and the
//! same pending items are retried. Recovery bottoms out at size one: an item
//! that exhausts memory alone is marked failed and processing moves on, so a
//! single pathological item cannot abort the run.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::providers::TranslationProvider;

/// Batch sizing state for one run. Shared across jobs within the run so a
/// watermark learned on one language carries to the next.
#[derive(Debug, Clone)]
pub struct BatchState {
    max: usize,
    current: usize,
    exhaustion_watermark: Option<usize>,
    failure_count: u32,
}

impl BatchState {
    pub fn new(max_batch_size: usize) -> Self {
        let max = max_batch_size.max(1);
        Self {
            max,
            current: max,
            exhaustion_watermark: None,
            failure_count: 0,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn exhaustion_watermark(&self) -> Option<usize> {
        self.exhaustion_watermark
    }

    /// Records an exhaustion at the attempted batch length and shrinks.
    /// Monotonic: the size never grows back within the run, even if pressure
    /// subsides. The attempted length, not the configured size, is what was
    /// observed to exhaust; a short tail batch must shrink below its own
    /// length or the retry would repeat the identical doomed batch.
    fn record_exhaustion(&mut self, attempted: usize) {
        let attempted = attempted.max(1);
        self.failure_count += 1;
        self.exhaustion_watermark = Some(
            self.exhaustion_watermark
                .map_or(attempted, |w| w.min(attempted)),
        );
        self.current = self.current.min(attempted.div_ceil(2)).max(1);
        warn!(
            "Memory exhaustion at batch size {}, shrinking to {}",
            attempted, self.current
        );
    }
}

/// Outcome for one work item, yielded as soon as it is known so the caller
/// can commit incrementally.
#[derive(Debug)]
pub enum ItemOutcome<O> {
    Done(O),
    Failed(String),
}

/// One batched backend call. Implementations must surface the exhaustion
/// signal as `JimakuError::MemoryExhaustion`; any other error fails only the
/// items of that batch.
#[async_trait]
pub trait BatchExecutor<T, O>: Send
where
    T: Sync,
    O: Send,
{
    async fn execute(&mut self, batch: &[T]) -> Result<Vec<O>>;

    /// Aggressive resource reclamation between a failure and its retry.
    async fn reclaim(&mut self) {}
}

/// Drives `items` through the executor in batches of the current size,
/// invoking `sink` once per item in submission order.
pub async fn run_batches<T, O>(
    state: &mut BatchState,
    items: &[T],
    executor: &mut (dyn BatchExecutor<T, O> + '_),
    sink: &mut dyn FnMut(usize, ItemOutcome<O>) -> Result<()>,
) -> Result<()>
where
    T: Sync,
    O: Send,
{
    let mut position = 0;

    while position < items.len() {
        let size = state.current();
        let end = (position + size).min(items.len());
        let batch = &items[position..end];

        match executor.execute(batch).await {
            Ok(outputs) => {
                debug!(
                    "Batch of {} completed at size {} ({}..{})",
                    batch.len(),
                    size,
                    position,
                    end
                );
                for (offset, output) in outputs.into_iter().enumerate() {
                    sink(position + offset, ItemOutcome::Done(output))?;
                }
                position = end;
            }
            Err(e) if e.is_exhaustion() => {
                // Nothing from this batch is marked done; shrink and retry
                // the same pending items at the smaller size.
                let attempted = batch.len();
                state.record_exhaustion(attempted);
                executor.reclaim().await;

                if attempted == 1 {
                    // Pathological single item: fail it and keep going.
                    warn!("Item {} exhausts memory alone, marking failed", position);
                    sink(position, ItemOutcome::Failed(e.to_string()))?;
                    position += 1;
                }
            }
            Err(e) => {
                // Ordinary failure: fail exactly this batch's items, continue.
                warn!("Batch {}..{} failed: {}", position, end, e);
                let message = e.to_string();
                for index in position..end {
                    sink(index, ItemOutcome::Failed(message.clone()))?;
                }
                position = end;
            }
        }
    }

    Ok(())
}

/// Adapts a translation provider to the batch executor contract for one
/// source/target language pair.
pub struct TranslationBatch<'a> {
    pub provider: &'a mut dyn TranslationProvider,
    pub source: String,
    pub target: String,
}

#[async_trait]
impl BatchExecutor<String, String> for TranslationBatch<'_> {
    async fn execute(&mut self, batch: &[String]) -> Result<Vec<String>> {
        self.provider
            .translate_batch(batch, &self.source, &self.target)
            .await
    }

    async fn reclaim(&mut self) {
        self.provider.reclaim().await;
    }
}
