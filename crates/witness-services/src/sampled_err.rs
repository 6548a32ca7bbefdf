//! Bounded error sampling: a total count plus the first few messages.

use std::fmt;

/// Number of messages kept by [`SampledErrors::default`].
pub const DEFAULT_SAMPLE_COUNT: usize = 3;

#[derive(Debug, Clone)]
pub struct SampledErrors {
    sample_count: usize,
    samples: Vec<String>,
    total_count: usize,
}

impl Default for SampledErrors {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_COUNT)
    }
}

impl SampledErrors {
    pub fn new(sample_count: usize) -> Self {
        Self {
            sample_count,
            samples: Vec::with_capacity(sample_count),
            total_count: 0,
        }
    }

    /// Count an error, keeping its message if the sample is not yet full.
    pub fn add(&mut self, err: impl fmt::Display) {
        self.total_count += 1;
        if self.samples.len() < self.sample_count {
            self.samples.push(err.to_string());
        }
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }
}

impl fmt::Display for SampledErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s)", self.total_count)?;
        if !self.samples.is_empty() {
            write!(f, ", e.g.: {}", self.samples.join("; "))?;
        }
        Ok(())
    }
}
