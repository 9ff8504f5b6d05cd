//! Descriptor parser for filter chains
//!
//! Grammar: `name(key value, key value, ...)[, name(...)]*`, for example
//! `bqHighPass(q 0.7, freq 40), bwLowPass(order 4, freq 12000, forcedGain 3)`.
//! Filter names and keys are case-insensitive.

use std::sync::Arc;

use thiserror::Error;

use super::biquad::{BiQuad, BiQuadKind};
use super::butterworth;
use super::cascade::{FilterCascadeCreator, FilterFactory};
use super::iir::{boxed_filter, Filter};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterParseError {
    #[error("malformed filter description: {0}")]
    Syntax(String),

    #[error("unknown filter type: {0}")]
    UnknownFilter(String),

    #[error("filter {filter}: required parameter '{key}' is missing")]
    MissingParameter { filter: String, key: String },

    #[error("filter {filter}: parameter '{key}' has invalid value '{value}'")]
    InvalidValue {
        filter: String,
        key: String,
        value: String,
    },

    #[error("filter {filter}: order must be an integer in range [1, 5], got {order}")]
    InvalidOrder { filter: String, order: f64 },
}

const MAX_ORDER: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ButterworthKind {
    LowPass,
    HighPass,
    BandPass,
    BandStop,
}

impl ButterworthKind {
    fn is_two_sided(self) -> bool {
        matches!(self, Self::BandPass | Self::BandStop)
    }
}

enum FilterKind {
    BiQuad(BiQuadKind),
    Butterworth(ButterworthKind),
}

fn filter_kind(name: &str) -> Option<FilterKind> {
    const NAMES: [(&str, FilterKind); 9] = [
        ("bqHighPass", FilterKind::BiQuad(BiQuadKind::HighPass)),
        ("bqLowPass", FilterKind::BiQuad(BiQuadKind::LowPass)),
        ("bqHighShelf", FilterKind::BiQuad(BiQuadKind::HighShelf)),
        ("bqLowShelf", FilterKind::BiQuad(BiQuadKind::LowShelf)),
        ("bqPeak", FilterKind::BiQuad(BiQuadKind::Peak)),
        ("bwLowPass", FilterKind::Butterworth(ButterworthKind::LowPass)),
        ("bwHighPass", FilterKind::Butterworth(ButterworthKind::HighPass)),
        ("bwBandPass", FilterKind::Butterworth(ButterworthKind::BandPass)),
        ("bwBandStop", FilterKind::Butterworth(ButterworthKind::BandStop)),
    ];
    NAMES
        .into_iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
        .map(|(_, kind)| kind)
}

/// Arguments of one filter entry, tracking which keys were read
struct FilterArgs<'a> {
    filter: &'a str,
    entries: Vec<(&'a str, &'a str)>,
    used: Vec<bool>,
}

impl<'a> FilterArgs<'a> {
    fn parse(filter: &'a str, args: &'a str) -> Result<Self, FilterParseError> {
        let mut entries = Vec::new();
        for arg in args.split(',').map(str::trim).filter(|arg| !arg.is_empty()) {
            let mut tokens = arg.split_whitespace();
            match (tokens.next(), tokens.next(), tokens.next()) {
                (Some(key), Some(value), None) => entries.push((key, value)),
                _ => {
                    return Err(FilterParseError::Syntax(format!(
                        "expected 'key value' in {filter}, got '{arg}'"
                    )))
                }
            }
        }
        let used = vec![false; entries.len()];
        Ok(Self {
            filter,
            entries,
            used,
        })
    }

    fn lookup(&mut self, key: &str) -> Option<&'a str> {
        let position = self
            .entries
            .iter()
            .position(|(candidate, _)| candidate.eq_ignore_ascii_case(key))?;
        self.used[position] = true;
        Some(self.entries[position].1)
    }

    fn optional(&mut self, key: &str) -> Result<Option<f64>, FilterParseError> {
        match self.lookup(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(Some)
                .ok_or_else(|| FilterParseError::InvalidValue {
                    filter: self.filter.to_string(),
                    key: key.to_string(),
                    value: raw.to_string(),
                }),
        }
    }

    fn required(&mut self, key: &str) -> Result<f64, FilterParseError> {
        self.optional(key)?
            .ok_or_else(|| FilterParseError::MissingParameter {
                filter: self.filter.to_string(),
                key: key.to_string(),
            })
    }

    fn warn_unused(&self) {
        for ((key, _), used) in self.entries.iter().zip(&self.used) {
            if !used {
                log::warn!("filter {}: unused parameter '{}'", self.filter, key);
            }
        }
    }
}

/// Split a descriptor into `(name, arguments)` pairs
fn split_entries(descriptor: &str) -> Result<Vec<(&str, &str)>, FilterParseError> {
    let mut entries = Vec::new();
    let mut rest = descriptor.trim();

    while !rest.is_empty() {
        let open = rest
            .find('(')
            .ok_or_else(|| FilterParseError::Syntax(format!("missing '(' in '{rest}'")))?;
        let name = rest[..open].trim();
        if name.is_empty() || name.contains([',', ')']) {
            return Err(FilterParseError::Syntax(format!("missing filter name in '{rest}'")));
        }

        let close = rest[open..]
            .find(')')
            .map(|offset| open + offset)
            .ok_or_else(|| FilterParseError::Syntax(format!("missing ')' after '{name}'")))?;
        entries.push((name, &rest[open + 1..close]));

        rest = rest[close + 1..].trim_start();
        if let Some(next) = rest.strip_prefix(',') {
            rest = next.trim_start();
            if rest.is_empty() {
                return Err(FilterParseError::Syntax("trailing ','".to_string()));
            }
        } else if !rest.is_empty() {
            return Err(FilterParseError::Syntax(format!("expected ',' before '{rest}'")));
        }
    }

    Ok(entries)
}

/// Parser for filter chain descriptors
pub struct FilterCascadeParser;

impl FilterCascadeParser {
    /// Parse a full descriptor into a creator.
    ///
    /// Fails on the first malformed or incomplete entry. Unused keys only produce warnings.
    pub fn parse(descriptor: &str) -> Result<FilterCascadeCreator, FilterParseError> {
        let mut factories = Vec::new();
        for (name, args) in split_entries(descriptor)? {
            factories.push(Self::parse_filter(name, args)?);
        }
        Ok(FilterCascadeCreator::new(descriptor.trim(), factories))
    }

    fn parse_filter(name: &str, args: &str) -> Result<FilterFactory, FilterParseError> {
        let kind = filter_kind(name).ok_or_else(|| FilterParseError::UnknownFilter(name.to_string()))?;
        let mut args = FilterArgs::parse(name, args)?;

        let factory = match kind {
            FilterKind::BiQuad(kind) => Self::parse_biquad(kind, &mut args)?,
            FilterKind::Butterworth(kind) => Self::parse_butterworth(kind, &mut args)?,
        };
        args.warn_unused();
        Ok(factory)
    }

    fn parse_biquad(kind: BiQuadKind, args: &mut FilterArgs<'_>) -> Result<FilterFactory, FilterParseError> {
        let min = f64::from(f32::EPSILON);
        let q = args.required("q")?.max(min);
        let freq = args.required("freq")?.max(min);
        let gain = if kind.uses_gain() {
            args.required("gain")?
        } else {
            0.0
        };
        let forced_gain = args.optional("forcedGain")?.unwrap_or(0.0);

        Ok(Arc::new(move |sample_rate: f64| -> Box<dyn Filter> {
            let mut filter = BiQuad::new(kind.design(q, freq, sample_rate, gain));
            if gain > 0.0 {
                filter.add_gain_db_energy(-gain);
            }
            filter.add_gain_db_energy(forced_gain);
            Box::new(filter)
        }))
    }

    fn parse_butterworth(
        kind: ButterworthKind,
        args: &mut FilterArgs<'_>,
    ) -> Result<FilterFactory, FilterParseError> {
        let raw_order = args.required("order")?;
        if raw_order.fract() != 0.0 || raw_order < 1.0 || raw_order > MAX_ORDER as f64 {
            return Err(FilterParseError::InvalidOrder {
                filter: args.filter.to_string(),
                order: raw_order,
            });
        }
        let order = raw_order as usize;

        let (low, high) = if kind.is_two_sided() {
            (args.required("freqLow")?, args.required("freqHigh")?)
        } else {
            let freq = args.required("freq")?;
            (freq, freq)
        };
        let forced_gain = args.optional("forcedGain")?.unwrap_or(0.0);

        Ok(Arc::new(move |sample_rate: f64| -> Box<dyn Filter> {
            let nyquist = sample_rate * 0.5;
            let (low, high) = (low / nyquist, high / nyquist);
            let params = match kind {
                ButterworthKind::LowPass => butterworth::low_pass(order, low),
                ButterworthKind::HighPass => butterworth::high_pass(order, low),
                ButterworthKind::BandPass => butterworth::band_pass(order, low, high),
                ButterworthKind::BandStop => butterworth::band_stop(order, low, high),
            };
            let mut filter = boxed_filter(params);
            filter.add_gain_db_energy(forced_gain);
            filter
        }))
    }
}
