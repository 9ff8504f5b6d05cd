//! Ordered filter chains and the factories that build them

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::iir::Filter;
use super::parser::{FilterCascadeParser, FilterParseError};

/// Builds one filter instance for a concrete sample rate
pub type FilterFactory = Arc<dyn Fn(f64) -> Box<dyn Filter> + Send + Sync>;

/// Parsed filter chain description, not yet bound to a sample rate.
///
/// Two creators are equal when they were parsed from the same source text.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FilterCascadeCreator {
    source: String,
    factories: Vec<FilterFactory>,
}

impl FilterCascadeCreator {
    pub fn new(source: impl Into<String>, factories: Vec<FilterFactory>) -> Self {
        Self {
            source: source.into(),
            factories,
        }
    }

    /// Descriptor text this creator was parsed from
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Create fresh filter instances for `sample_rate`
    pub fn instantiate(&self, sample_rate: f64) -> FilterCascade {
        FilterCascade {
            filters: self.factories.iter().map(|factory| factory(sample_rate)).collect(),
            processed: Vec::new(),
        }
    }
}

impl PartialEq for FilterCascadeCreator {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Debug for FilterCascadeCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterCascadeCreator")
            .field("source", &self.source)
            .field("filters", &self.factories.len())
            .finish()
    }
}

impl TryFrom<String> for FilterCascadeCreator {
    type Error = FilterParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FilterCascadeParser::parse(&value)
    }
}

impl From<FilterCascadeCreator> for String {
    fn from(creator: FilterCascadeCreator) -> Self {
        creator.source
    }
}

/// Stateful chain of filters bound to one sample rate
#[derive(Default)]
pub struct FilterCascade {
    filters: Vec<Box<dyn Filter>>,
    processed: Vec<f32>,
}

impl FilterCascade {
    /// Copy `wave` once and run every filter over the copy in order.
    ///
    /// An empty cascade returns an unmodified copy.
    pub fn apply(&mut self, wave: &[f32]) -> &[f32] {
        self.processed.clear();
        self.processed.extend_from_slice(wave);
        for filter in &mut self.filters {
            filter.apply(&mut self.processed);
        }
        &self.processed
    }

    /// Run every filter over `samples` in place
    pub fn apply_inplace(&mut self, samples: &mut [f32]) {
        for filter in &mut self.filters {
            filter.apply(samples);
        }
    }

    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
