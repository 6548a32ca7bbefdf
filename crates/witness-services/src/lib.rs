pub mod batcher;
pub mod collector;
pub mod learn_client;
pub mod pair_cache;
pub mod parser;
pub mod plugin;
pub mod redact;
pub mod replay;
pub mod sampled_err;
pub mod stats;
pub mod uploader;

pub use batcher::{AddError, BatchSink, Batcher};
pub use collector::{Collector, CollectorSettings, ProcessOutcome, WitnessCollector};
pub use learn_client::{ClientError, LearnClient, RestLearnClient, RetryPolicy};
pub use pair_cache::{AddressedWitness, CacheEntry, PairCache};
pub use parser::{HttpParser, ParseError, Parser};
pub use plugin::{ExclusionPlugin, PluginChain, PluginVeto, SamplingPlugin, WitnessPlugin};
pub use redact::{NoRedaction, Obfuscator, Redactor};
pub use replay::{load_archive, replay_archive, replay_entries, Archive, ReplayError, ReplayReport};
pub use sampled_err::SampledErrors;
pub use stats::{CollectorStats, StatsSnapshot};
pub use uploader::WitnessUploader;
