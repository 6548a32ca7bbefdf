//! Witness collector: pairs request and response halves and feeds finished
//! witnesses through plugins and redaction into the upload batcher.
//!
//! One collector serves one traffic direction and has a single caller:
//! `process` and `close` are never invoked concurrently. Uploads run on the
//! batcher's worker, so a slow learn service never stalls ingestion.
//!
//! Stale halves are swept lazily. After each frame, if more than
//! `cleanup_interval` has passed since the last sweep, every half cached
//! more than `expiration` ago is shipped on its own. Age is measured on the
//! collector's clock, never on the frame's observation time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use witness_core::config::WitnessConfig;
use witness_core::wire::{
    PAIR_CACHE_CLEANUP_INTERVAL_SECS, PAIR_CACHE_EXPIRATION_SECS, UPLOAD_BATCH_FLUSH_SECS,
    UPLOAD_BATCH_MAX_SIZE,
};
use witness_core::{NetworkContent, NetworkDirection, NetworkTraffic, PartialWitness};

use crate::batcher::{BatchSink, Batcher};
use crate::pair_cache::{AddressedWitness, CacheEntry, PairCache};
use crate::parser::{HttpParser, ParseError, Parser};
use crate::plugin::PluginChain;
use crate::redact::Redactor;
use crate::stats::CollectorStats;

/// Consumes frames from one ingestion source.
#[async_trait]
pub trait Collector: Send {
    fn process(&mut self, traffic: NetworkTraffic) -> ProcessOutcome;

    /// Ship everything still cached and wait for the final upload.
    /// Calling it again ships nothing new.
    async fn close(&mut self);
}

/// What `process` did with a frame.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Not a protocol we understand.
    Ignored,
    /// First half of an exchange; waiting for its partner.
    Cached,
    /// Completed a pair; the witness was handed to the upload path.
    Paired,
    /// The frame was skipped.
    ParseFailed(ParseError),
}

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub expiration: Duration,
    pub cleanup_interval: Duration,
    pub batch_max_size: usize,
    pub flush_interval: Duration,
}

impl CollectorSettings {
    pub fn from_config(config: &WitnessConfig) -> Self {
        Self {
            expiration: config.pairing.expiration(),
            cleanup_interval: config.pairing.cleanup_interval(),
            batch_max_size: config.upload.batch_max_size,
            flush_interval: config.upload.flush_interval(),
        }
    }
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            expiration: Duration::from_secs(PAIR_CACHE_EXPIRATION_SECS),
            cleanup_interval: Duration::from_secs(PAIR_CACHE_CLEANUP_INTERVAL_SECS),
            batch_max_size: UPLOAD_BATCH_MAX_SIZE,
            flush_interval: Duration::from_secs(UPLOAD_BATCH_FLUSH_SECS),
        }
    }
}

pub struct WitnessCollector {
    direction: NetworkDirection,
    parser: Box<dyn Parser>,
    cache: PairCache,
    plugins: PluginChain,
    redactor: Box<dyn Redactor>,
    batcher: Batcher<AddressedWitness>,
    stats: Arc<CollectorStats>,

    expiration: chrono::Duration,
    cleanup_interval: chrono::Duration,
    last_sweep: Option<DateTime<Utc>>,
    closed: bool,
}

impl WitnessCollector {
    /// Build a collector using the default HTTP parser. Spawns the batch
    /// worker, so it must be called inside a tokio runtime.
    pub fn new<S>(
        direction: NetworkDirection,
        settings: CollectorSettings,
        sink: S,
        plugins: PluginChain,
        redactor: impl Redactor + 'static,
        stats: Arc<CollectorStats>,
    ) -> Self
    where
        S: BatchSink<AddressedWitness>,
    {
        Self {
            direction,
            parser: Box::new(HttpParser),
            cache: PairCache::new(),
            plugins,
            redactor: Box::new(redactor),
            batcher: Batcher::new(sink, settings.batch_max_size, settings.flush_interval),
            stats,
            expiration: to_chrono(settings.expiration),
            cleanup_interval: to_chrono(settings.cleanup_interval),
            last_sweep: None,
            closed: false,
        }
    }

    /// Replace the parser.
    pub fn with_parser(mut self, parser: impl Parser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    pub fn direction(&self) -> NetworkDirection {
        self.direction
    }

    pub fn stats(&self) -> &Arc<CollectorStats> {
        &self.stats
    }

    /// Number of halves waiting for their partner.
    pub fn pending(&self) -> usize {
        self.cache.len()
    }

    /// `process` with an explicit sweep clock.
    pub fn process_at(&mut self, traffic: NetworkTraffic, now: DateTime<Utc>) -> ProcessOutcome {
        CollectorStats::incr(&self.stats.frames);
        let outcome = self.handle(traffic, now);
        self.maybe_sweep(now);
        outcome
    }

    fn handle(&mut self, traffic: NetworkTraffic, now: DateTime<Utc>) -> ProcessOutcome {
        let parsed = match &traffic.content {
            NetworkContent::HttpRequest(req) => self.parser.parse_request(req),
            NetworkContent::HttpResponse(resp) => self.parser.parse_response(resp),
            NetworkContent::Unrecognized => {
                CollectorStats::incr(&self.stats.ignored);
                return ProcessOutcome::Ignored;
            }
        };

        let partial = match parsed {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(
                    direction = %self.direction,
                    src = %traffic.src,
                    dst = %traffic.dst,
                    error = %e,
                    "failed to parse frame, skipping"
                );
                CollectorStats::incr(&self.stats.parse_errors);
                return ProcessOutcome::ParseFailed(e);
            }
        };

        self.pair(partial, &traffic, now)
    }

    fn pair(
        &mut self,
        partial: PartialWitness,
        traffic: &NetworkTraffic,
        now: DateTime<Utc>,
    ) -> ProcessOutcome {
        let PartialWitness {
            pair_key,
            side,
            witness,
        } = partial;

        match self.cache.take(&pair_key) {
            None => {
                tracing::trace!(id = %pair_key, ?side, "caching first half");
                self.cache.insert(
                    pair_key,
                    CacheEntry {
                        src: traffic.src,
                        dst: traffic.dst,
                        observation_time: traffic.observation_time,
                        cached_at: now,
                        first_side: side,
                        witness,
                    },
                );
                ProcessOutcome::Cached
            }
            Some(mut entry) => {
                tracing::trace!(id = %pair_key, ?side, "completing pair");
                let cached = std::mem::take(&mut entry.witness);
                entry.witness = self.parser.merge(cached, witness);
                CollectorStats::incr(&self.stats.paired);
                self.queue_upload(entry.into_addressed(pair_key));
                ProcessOutcome::Paired
            }
        }
    }

    fn maybe_sweep(&mut self, now: DateTime<Utc>) {
        let Some(last) = self.last_sweep else {
            self.last_sweep = Some(now);
            return;
        };
        if now - last <= self.cleanup_interval {
            return;
        }
        self.last_sweep = Some(now);

        let Some(cutoff) = now.checked_sub_signed(self.expiration) else {
            return;
        };
        let expired = self.cache.drain_older_than(cutoff);
        if expired.is_empty() {
            return;
        }
        tracing::debug!(
            direction = %self.direction,
            count = expired.len(),
            "shipping unpaired witnesses"
        );
        for (key, entry) in expired {
            CollectorStats::incr(&self.stats.expired);
            self.queue_upload(entry.into_addressed(key));
        }
    }

    /// Plugins, then redaction, then the batcher.
    fn queue_upload(&mut self, mut item: AddressedWitness) {
        if let Err(veto) = self.plugins.transform(&mut item.witness) {
            tracing::error!(
                plugin = %veto.plugin,
                id = %item.id,
                error = %veto.error,
                "witness rejected by plugin"
            );
            CollectorStats::incr(&self.stats.vetoed);
            return;
        }

        item.witness = self.redactor.redact(std::mem::take(&mut item.witness));

        let id = item.id;
        match self.batcher.add(item) {
            Ok(()) => CollectorStats::incr(&self.stats.queued),
            Err(e) => {
                tracing::warn!(%id, direction = %self.direction, error = %e, "dropping witness");
                CollectorStats::incr(&self.stats.dropped);
            }
        }
    }
}

#[async_trait]
impl Collector for WitnessCollector {
    fn process(&mut self, traffic: NetworkTraffic) -> ProcessOutcome {
        self.process_at(traffic, Utc::now())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let remaining = self.cache.drain_all();
            if !remaining.is_empty() {
                tracing::info!(
                    direction = %self.direction,
                    count = remaining.len(),
                    "flushing unpaired witnesses on close"
                );
            }
            for (key, entry) in remaining {
                CollectorStats::incr(&self.stats.expired);
                self.queue_upload(entry.into_addressed(key));
            }
        }
        self.batcher.close().await;
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Mutex;

    use uuid::Uuid;
    use witness_core::witness::Value;
    use witness_core::{Header, HttpRequest, HttpResponse, PairKey, Witness};

    use crate::plugin::{ExclusionPlugin, WitnessPlugin};
    use crate::redact::{NoRedaction, Obfuscator};

    const CLIENT: &str = "10.0.0.1:40000";
    const SERVER: &str = "10.0.0.2:80";

    #[derive(Clone, Default)]
    struct Recorder {
        items: Arc<Mutex<Vec<AddressedWitness>>>,
    }

    impl Recorder {
        fn items(&self) -> Vec<AddressedWitness> {
            self.items.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchSink<AddressedWitness> for Recorder {
        async fn flush(&mut self, batch: Vec<AddressedWitness>) {
            self.items.lock().unwrap().extend(batch);
        }
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn request(seq: u64, path: &str, at: DateTime<Utc>) -> NetworkTraffic {
        NetworkTraffic {
            observation_time: at,
            src: addr(CLIENT),
            dst: addr(SERVER),
            content: NetworkContent::HttpRequest(HttpRequest {
                stream_id: Uuid::nil(),
                seq,
                method: "GET".to_string(),
                host: "api.example.com".to_string(),
                path: path.to_string(),
                query: vec![("q".to_string(), "Alice42".to_string())],
                headers: Vec::new(),
                body: Vec::new(),
            }),
        }
    }

    fn response(seq: u64, at: DateTime<Utc>) -> NetworkTraffic {
        NetworkTraffic {
            observation_time: at,
            src: addr(SERVER),
            dst: addr(CLIENT),
            content: NetworkContent::HttpResponse(HttpResponse {
                stream_id: Uuid::nil(),
                seq,
                status_code: 200,
                headers: vec![Header::new("Content-Type", "application/json")],
                body: br#"{"ok": true}"#.to_vec(),
            }),
        }
    }

    fn noise(at: DateTime<Utc>) -> NetworkTraffic {
        NetworkTraffic {
            observation_time: at,
            src: addr(CLIENT),
            dst: addr(SERVER),
            content: NetworkContent::Unrecognized,
        }
    }

    fn collector(recorder: &Recorder, plugins: PluginChain) -> WitnessCollector {
        WitnessCollector::new(
            NetworkDirection::Inbound,
            CollectorSettings::default(),
            recorder.clone(),
            plugins,
            NoRedaction,
            CollectorStats::shared(),
        )
    }

    #[tokio::test]
    async fn request_then_response_pairs_once() {
        let recorder = Recorder::default();
        let mut c = collector(&recorder, PluginChain::new());

        assert!(matches!(c.process_at(request(1, "/a", t(0)), t(0)), ProcessOutcome::Cached));
        assert!(matches!(c.process_at(response(1, t(2)), t(2)), ProcessOutcome::Paired));
        assert_eq!(c.pending(), 0);
        c.close().await;

        let items = recorder.items();
        assert_eq!(items.len(), 1);
        assert!(items[0].witness.is_complete());
        assert_eq!(items[0].origin, addr(CLIENT));
        assert_eq!(items[0].destination, addr(SERVER));
        assert_eq!(items[0].id, PairKey::new(Uuid::nil(), 1));
        assert_eq!(items[0].observation_time, t(0));
    }

    #[tokio::test]
    async fn response_then_request_keeps_client_as_origin() {
        let recorder = Recorder::default();
        let mut c = collector(&recorder, PluginChain::new());

        c.process_at(response(1, t(0)), t(0));
        c.process_at(request(1, "/a", t(1)), t(1));
        c.close().await;

        let items = recorder.items();
        assert_eq!(items.len(), 1);
        assert!(items[0].witness.is_complete());
        assert_eq!(items[0].origin, addr(CLIENT));
        assert_eq!(items[0].destination, addr(SERVER));
    }

    #[tokio::test]
    async fn unpaired_half_expires_exactly_once() {
        let recorder = Recorder::default();
        let mut c = collector(&recorder, PluginChain::new());

        c.process_at(response(1, t(0)), t(0));
        c.process_at(noise(t(45)), t(45));
        assert_eq!(c.pending(), 1, "not yet past the expiration bound");

        c.process_at(noise(t(91)), t(91));
        assert_eq!(c.pending(), 0);

        c.process_at(noise(t(200)), t(200));
        c.close().await;
        c.close().await;

        let items = recorder.items();
        assert_eq!(items.len(), 1);
        assert!(!items[0].witness.is_complete());
        assert!(items[0].witness.has_response());
        assert_eq!(items[0].origin, addr(CLIENT));
        assert_eq!(c.stats().snapshot().expired, 1);
    }

    #[tokio::test]
    async fn sweep_waits_for_cleanup_interval() {
        let recorder = Recorder::default();
        let mut c = collector(&recorder, PluginChain::new());

        c.process_at(request(1, "/a", t(0)), t(0));
        c.process_at(noise(t(29)), t(29));
        // Sweeps here, but the first entry sits exactly on the bound.
        c.process_at(request(2, "/b", t(60)), t(60));
        assert_eq!(c.pending(), 2);

        c.process_at(noise(t(80)), t(80));
        assert_eq!(c.pending(), 2, "less than a cleanup interval since last sweep");

        c.process_at(noise(t(121)), t(121));
        assert_eq!(c.pending(), 0);
        c.close().await;
        assert_eq!(recorder.items().len(), 2);
    }

    #[tokio::test]
    async fn old_observation_times_do_not_split_pairs() {
        let recorder = Recorder::default();
        let mut c = collector(&recorder, PluginChain::new());

        // Archive timestamps stay fixed while the collector clock moves on.
        let outcomes = [
            c.process_at(request(1, "/a", t(0)), t(1_000)),
            c.process_at(response(1, t(0)), t(1_000)),
            c.process_at(request(2, "/b", t(1)), t(1_031)),
            c.process_at(response(2, t(1)), t(1_031)),
        ];
        assert!(matches!(outcomes[0], ProcessOutcome::Cached));
        assert!(matches!(outcomes[1], ProcessOutcome::Paired));
        assert!(matches!(outcomes[2], ProcessOutcome::Cached));
        assert!(matches!(outcomes[3], ProcessOutcome::Paired));
        c.close().await;

        let items = recorder.items();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.witness.is_complete()));
        assert_eq!(items[1].observation_time, t(1));
        assert_eq!(c.stats().snapshot().expired, 0);
    }

    #[tokio::test]
    async fn close_ships_cached_halves_and_is_idempotent() {
        let recorder = Recorder::default();
        let mut c = collector(&recorder, PluginChain::new());

        c.process_at(request(1, "/a", t(0)), t(0));
        c.process_at(request(2, "/b", t(1)), t(1));
        c.close().await;
        assert_eq!(recorder.items().len(), 2);

        c.close().await;
        assert_eq!(recorder.items().len(), 2);
    }

    #[tokio::test]
    async fn plugin_veto_drops_only_that_witness() {
        let recorder = Recorder::default();
        let plugins = PluginChain::new()
            .with(ExclusionPlugin::new(&["^/internal".to_string()], &[]).unwrap());
        let mut c = collector(&recorder, plugins);

        c.process_at(request(1, "/internal/debug", t(0)), t(0));
        c.process_at(response(1, t(0)), t(0));
        c.process_at(request(2, "/public", t(1)), t(1));
        c.process_at(response(2, t(1)), t(1));
        c.close().await;

        let items = recorder.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id.seq, 2);
        assert_eq!(c.stats().snapshot().vetoed, 1);
    }

    #[tokio::test]
    async fn plugins_see_the_merged_witness_before_redaction() {
        struct RequireComplete;

        impl WitnessPlugin for RequireComplete {
            fn name(&self) -> &str {
                "require-complete"
            }

            fn transform(&self, witness: &mut Witness) -> anyhow::Result<()> {
                anyhow::ensure!(witness.is_complete(), "incomplete witness");
                Ok(())
            }
        }

        let recorder = Recorder::default();
        let mut c = WitnessCollector::new(
            NetworkDirection::Outbound,
            CollectorSettings::default(),
            recorder.clone(),
            PluginChain::new().with(RequireComplete),
            Obfuscator,
            CollectorStats::shared(),
        );

        c.process_at(request(1, "/a", t(0)), t(0));
        c.process_at(response(1, t(0)), t(0));
        c.process_at(request(2, "/b", t(0)), t(0));
        c.close().await;

        let items = recorder.items();
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].witness.method.args["query.q"].value,
            Value::String("Xxxxx00".to_string())
        );
    }

    #[tokio::test]
    async fn parse_failures_skip_the_frame() {
        let recorder = Recorder::default();
        let mut c = collector(&recorder, PluginChain::new());

        let mut bad = response(1, t(0));
        if let NetworkContent::HttpResponse(resp) = &mut bad.content {
            resp.body = b"{broken".to_vec();
        }
        assert!(matches!(c.process_at(bad, t(0)), ProcessOutcome::ParseFailed(_)));
        assert!(matches!(c.process_at(noise(t(0)), t(0)), ProcessOutcome::Ignored));
        assert!(matches!(c.process_at(request(1, "/a", t(0)), t(0)), ProcessOutcome::Cached));
        c.close().await;

        let snap = c.stats().snapshot();
        assert_eq!(snap.frames, 3);
        assert_eq!(snap.parse_errors, 1);
        assert_eq!(snap.ignored, 1);
        assert_eq!(recorder.items().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_ships_before_the_age_limit() {
        let recorder = Recorder::default();
        let settings = CollectorSettings {
            batch_max_size: 2,
            ..Default::default()
        };
        let mut c = WitnessCollector::new(
            NetworkDirection::Inbound,
            settings,
            recorder.clone(),
            PluginChain::new(),
            NoRedaction,
            CollectorStats::shared(),
        );

        for seq in 0..2 {
            c.process_at(request(seq, "/a", t(0)), t(0));
            c.process_at(response(seq, t(0)), t(0));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(recorder.items().len(), 2);

        c.close().await;
    }
}
