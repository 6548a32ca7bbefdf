//! Upload sink: turns a flushed batch of witnesses into reports and
//! submits them to the learn service.
//!
//! A witness that cannot be encoded is dropped on its own; the rest of the
//! batch still ships. A failed submission drops the whole batch. Retrying
//! is the transport's job, not ours.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use witness_core::{LearnSessionId, NetworkDirection, WitnessReport};

use crate::batcher::BatchSink;
use crate::learn_client::LearnClient;
use crate::pair_cache::AddressedWitness;
use crate::stats::CollectorStats;

pub struct WitnessUploader {
    client: Arc<dyn LearnClient>,
    session: LearnSessionId,
    direction: NetworkDirection,
    timeout: Duration,
    stats: Arc<CollectorStats>,
}

impl WitnessUploader {
    pub fn new(
        client: Arc<dyn LearnClient>,
        session: LearnSessionId,
        direction: NetworkDirection,
        timeout: Duration,
        stats: Arc<CollectorStats>,
    ) -> Self {
        Self {
            client,
            session,
            direction,
            timeout,
            stats,
        }
    }

    fn encode(&self, batch: Vec<AddressedWitness>) -> Vec<WitnessReport> {
        batch
            .into_iter()
            .filter_map(|item| match item.to_report(self.direction) {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::warn!(id = %item.id, error = %e, "failed to encode witness, dropping");
                    CollectorStats::incr(&self.stats.report_errors);
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl BatchSink<AddressedWitness> for WitnessUploader {
    async fn flush(&mut self, batch: Vec<AddressedWitness>) {
        let reports = self.encode(batch);
        if reports.is_empty() {
            return;
        }
        let count = reports.len();

        match self
            .client
            .report_witnesses(&self.session, reports, Some(self.timeout))
            .await
        {
            Ok(()) => {
                tracing::debug!(count, direction = %self.direction, "uploaded witness batch");
                CollectorStats::incr(&self.stats.batches_uploaded);
                CollectorStats::add(&self.stats.reports_uploaded, count as u64);
            }
            Err(e) => {
                tracing::warn!(
                    count,
                    direction = %self.direction,
                    error = %e,
                    "failed to upload witnesses, dropping batch"
                );
                CollectorStats::incr(&self.stats.batches_failed);
            }
        }
    }
}
