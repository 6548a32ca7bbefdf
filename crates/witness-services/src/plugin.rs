//! Witness plugins: transforms applied to every finished witness before it
//! is queued for upload. Any plugin may veto a witness by returning an error.

use std::fmt;

use rand::Rng;
use regex::Regex;

use witness_core::config::FilterConfig;
use witness_core::Witness;

pub trait WitnessPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Transform the witness in place. An error drops the witness.
    fn transform(&self, witness: &mut Witness) -> anyhow::Result<()>;
}

/// A plugin rejected a witness.
#[derive(Debug)]
pub struct PluginVeto {
    pub plugin: String,
    pub error: anyhow::Error,
}

impl fmt::Display for PluginVeto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin {} rejected witness: {:#}", self.plugin, self.error)
    }
}

impl std::error::Error for PluginVeto {}

/// Ordered list of plugins. Runs them in registration order and stops at
/// the first veto.
#[derive(Default)]
pub struct PluginChain {
    plugins: Vec<Box<dyn WitnessPlugin>>,
}

impl PluginChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, plugin: impl WitnessPlugin + 'static) {
        self.plugins.push(Box::new(plugin));
    }

    pub fn with(mut self, plugin: impl WitnessPlugin + 'static) -> Self {
        self.push(plugin);
        self
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn transform(&self, witness: &mut Witness) -> Result<(), PluginVeto> {
        for plugin in &self.plugins {
            plugin.transform(witness).map_err(|error| PluginVeto {
                plugin: plugin.name().to_string(),
                error,
            })?;
        }
        Ok(())
    }

    /// Build the chain described by the `[filters]` config section.
    pub fn from_filters(filters: &FilterConfig) -> Result<Self, regex::Error> {
        let mut chain = Self::new();
        if !filters.path_exclusions.is_empty() || !filters.host_exclusions.is_empty() {
            chain.push(ExclusionPlugin::new(
                &filters.path_exclusions,
                &filters.host_exclusions,
            )?);
        }
        if filters.sample_rate < 1.0 {
            chain.push(SamplingPlugin::new(filters.sample_rate));
        }
        Ok(chain)
    }
}

impl fmt::Debug for PluginChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| p.name()))
            .finish()
    }
}

// ── Exclusions ────────────────────────────────────────────────────────────────

/// Drops witnesses whose request path or host matches a configured pattern.
#[derive(Debug)]
pub struct ExclusionPlugin {
    paths: Vec<Regex>,
    hosts: Vec<Regex>,
}

impl ExclusionPlugin {
    pub fn new(paths: &[String], hosts: &[String]) -> Result<Self, regex::Error> {
        Ok(Self {
            paths: paths.iter().map(|p| Regex::new(p)).collect::<Result<_, _>>()?,
            hosts: hosts.iter().map(|h| Regex::new(h)).collect::<Result<_, _>>()?,
        })
    }
}

impl WitnessPlugin for ExclusionPlugin {
    fn name(&self) -> &str {
        "exclusions"
    }

    fn transform(&self, witness: &mut Witness) -> anyhow::Result<()> {
        let Some(meta) = &witness.method.meta else {
            return Ok(());
        };
        if let Some(re) = self.paths.iter().find(|re| re.is_match(&meta.path)) {
            anyhow::bail!("path {} matches exclusion {}", meta.path, re.as_str());
        }
        if let Some(re) = self.hosts.iter().find(|re| re.is_match(&meta.host)) {
            anyhow::bail!("host {} matches exclusion {}", meta.host, re.as_str());
        }
        Ok(())
    }
}

// ── Sampling ──────────────────────────────────────────────────────────────────

/// Keeps each witness with probability `rate`.
#[derive(Debug, Clone, Copy)]
pub struct SamplingPlugin {
    rate: f64,
}

impl SamplingPlugin {
    pub fn new(rate: f64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
        }
    }
}

impl WitnessPlugin for SamplingPlugin {
    fn name(&self) -> &str {
        "sampling"
    }

    fn transform(&self, _witness: &mut Witness) -> anyhow::Result<()> {
        if rand::thread_rng().gen::<f64>() < self.rate {
            Ok(())
        } else {
            anyhow::bail!("not sampled at rate {}", self.rate)
        }
    }
}
