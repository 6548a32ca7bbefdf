//! Live ingestion: JSON-lines frames on stdin, one per line:
//!
//!   {"direction": "inbound", "traffic": { ... NetworkTraffic ... }}
//!
//! Each frame goes to the collector for its direction. Lines that do not
//! decode are skipped.

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use witness_core::{NetworkDirection, NetworkTraffic};
use witness_services::Collector;

#[derive(Debug, Deserialize)]
pub struct IngestFrame {
    pub direction: NetworkDirection,
    pub traffic: NetworkTraffic,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub frames: u64,
    pub skipped: u64,
}

/// Read frames until EOF.
pub async fn ingest_lines<R>(
    reader: R,
    inbound: &mut dyn Collector,
    outbound: &mut dyn Collector,
) -> Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut summary = IngestSummary::default();

    while let Some(line) = lines.next_line().await.context("failed to read frame")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let frame: IngestFrame = match serde_json::from_str(line) {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!(error = %e, "skipping undecodable frame");
                summary.skipped += 1;
                continue;
            }
        };

        summary.frames += 1;
        match frame.direction {
            NetworkDirection::Inbound => inbound.process(frame.traffic),
            NetworkDirection::Outbound => outbound.process(frame.traffic),
        };
    }

    Ok(summary)
}
