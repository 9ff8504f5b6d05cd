//! Value transform chains turning raw magnitudes into display-ready numbers
//!
//! Grammar: `name[(key value, ...)][, name[(...)]]*`, for example
//! `db, map(from -70:0, to 0:1), clamp(min 0, max 1), filter(attack 50, decay 200)`.
//! Steps run left to right; names and keys are case-insensitive.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::smoothing::LogarithmicIrf;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformParseError {
    #[error("malformed transform description: {0}")]
    Syntax(String),

    #[error("unknown transform type: {0}")]
    UnknownTransform(String),

    #[error("transform {transform}: required parameter '{key}' is missing")]
    MissingParameter { transform: String, key: String },

    #[error("transform {transform}: parameter '{key}' has invalid value '{value}'")]
    InvalidValue {
        transform: String,
        key: String,
        value: String,
    },

    #[error("transform map: source range {0}:{1} is empty")]
    EmptyRange(f32, f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransformStep {
    /// `10·log10(v)`, with `v` floored at the smallest positive float
    Db,
    /// Linear map of `from` onto `to`, without clamping
    Map { from: (f32, f32), to: (f32, f32) },
    Clamp { min: f32, max: f32 },
    /// Attack/decay smoothing over consecutive chunks
    Filter { attack_ms: f64, decay_ms: f64 },
}

impl TransformStep {
    fn apply(&self, value: f32) -> f32 {
        match *self {
            Self::Db => 10.0 * value.max(f32::MIN_POSITIVE).log10(),
            Self::Map { from, to } => to.0 + (value - from.0) * (to.1 - to.0) / (from.1 - from.0),
            Self::Clamp { min, max } => value.clamp(min, max),
            Self::Filter { .. } => value,
        }
    }
}

/// Parsed transform chain; compares and serializes as its descriptor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ValueTransform {
    descriptor: String,
    steps: Vec<TransformStep>,
}

impl ValueTransform {
    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Build the runtime chain for values spaced `stride` samples apart
    pub fn instantiate(&self, sample_rate: f64, stride: usize) -> TransformChain {
        let stages = self
            .steps
            .iter()
            .map(|step| match *step {
                TransformStep::Filter {
                    attack_ms,
                    decay_ms,
                } => Stage::Filter {
                    irf: LogarithmicIrf::new(attack_ms, decay_ms, sample_rate, stride),
                    history: Vec::new(),
                },
                step => Stage::Pure(step),
            })
            .collect();
        TransformChain { stages }
    }
}

impl PartialEq for ValueTransform {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor
    }
}

impl fmt::Display for ValueTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor)
    }
}

impl FromStr for ValueTransform {
    type Err = TransformParseError;

    fn from_str(descriptor: &str) -> Result<Self, Self::Err> {
        let mut steps = Vec::new();
        for (name, args) in split_steps(descriptor)? {
            steps.push(parse_step(name, args)?);
        }
        Ok(Self {
            descriptor: descriptor.trim().to_string(),
            steps,
        })
    }
}

impl TryFrom<String> for ValueTransform {
    type Error = TransformParseError;

    fn try_from(descriptor: String) -> Result<Self, Self::Error> {
        descriptor.parse()
    }
}

impl From<ValueTransform> for String {
    fn from(transform: ValueTransform) -> Self {
        transform.descriptor
    }
}

/// Split at top-level commas into `(name, arguments)`; arguments are empty for bare names
fn split_steps(descriptor: &str) -> Result<Vec<(&str, &str)>, TransformParseError> {
    let mut steps = Vec::new();
    let mut rest = descriptor.trim();

    while !rest.is_empty() {
        let end = rest.find([',', '(']).unwrap_or(rest.len());
        let name = rest[..end].trim();
        if name.is_empty() || name.contains(')') {
            return Err(TransformParseError::Syntax(format!(
                "missing transform name in '{rest}'"
            )));
        }

        let mut args = "";
        rest = &rest[end..];
        if let Some(inner) = rest.strip_prefix('(') {
            let close = inner
                .find(')')
                .ok_or_else(|| TransformParseError::Syntax(format!("missing ')' after '{name}'")))?;
            args = &inner[..close];
            rest = inner[close + 1..].trim_start();
        }
        steps.push((name, args));

        if let Some(next) = rest.strip_prefix(',') {
            rest = next.trim_start();
            if rest.is_empty() {
                return Err(TransformParseError::Syntax("trailing ','".to_string()));
            }
        } else if !rest.is_empty() {
            return Err(TransformParseError::Syntax(format!("expected ',' before '{rest}'")));
        }
    }

    Ok(steps)
}

/// `key value` pairs of one step
struct StepArgs<'a> {
    transform: &'a str,
    entries: Vec<(&'a str, &'a str)>,
}

impl<'a> StepArgs<'a> {
    fn parse(transform: &'a str, args: &'a str) -> Result<Self, TransformParseError> {
        let mut entries = Vec::new();
        for arg in args.split(',').map(str::trim).filter(|arg| !arg.is_empty()) {
            let mut tokens = arg.split_whitespace();
            match (tokens.next(), tokens.next(), tokens.next()) {
                (Some(key), Some(value), None) => entries.push((key, value)),
                _ => {
                    return Err(TransformParseError::Syntax(format!(
                        "expected 'key value' in {transform}, got '{arg}'"
                    )))
                }
            }
        }
        let known: &[&str] = match transform.to_ascii_lowercase().as_str() {
            "map" => &["from", "to"],
            "clamp" => &["min", "max"],
            "filter" => &["attack", "decay"],
            _ => &[],
        };
        for (key, _) in &entries {
            if !known.iter().any(|known| known.eq_ignore_ascii_case(key)) {
                log::warn!("transform {}: unused parameter '{}'", transform, key);
            }
        }
        Ok(Self { transform, entries })
    }

    fn lookup(&self, key: &str) -> Option<&'a str> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
            .map(|(_, value)| *value)
    }

    fn invalid(&self, key: &str, value: &str) -> TransformParseError {
        TransformParseError::InvalidValue {
            transform: self.transform.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    fn number(&self, key: &str) -> Result<Option<f64>, TransformParseError> {
        match self.lookup(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(Some)
                .ok_or_else(|| self.invalid(key, raw)),
        }
    }

    /// `low:high`
    fn range(&self, key: &str) -> Result<Option<(f32, f32)>, TransformParseError> {
        let Some(raw) = self.lookup(key) else {
            return Ok(None);
        };
        let parse = |part: &str| part.trim().parse::<f32>().ok().filter(|v| v.is_finite());
        match raw.split_once(':') {
            Some((low, high)) => match (parse(low), parse(high)) {
                (Some(low), Some(high)) => Ok(Some((low, high))),
                _ => Err(self.invalid(key, raw)),
            },
            None => Err(self.invalid(key, raw)),
        }
    }
}

fn parse_step(name: &str, args: &str) -> Result<TransformStep, TransformParseError> {
    let args = StepArgs::parse(name, args)?;
    match name.to_ascii_lowercase().as_str() {
        "db" => Ok(TransformStep::Db),
        "map" => {
            let from = args
                .range("from")?
                .ok_or_else(|| TransformParseError::MissingParameter {
                    transform: name.to_string(),
                    key: "from".to_string(),
                })?;
            if (from.1 - from.0).abs() < f32::EPSILON {
                return Err(TransformParseError::EmptyRange(from.0, from.1));
            }
            let to = args.range("to")?.unwrap_or((0.0, 1.0));
            Ok(TransformStep::Map { from, to })
        }
        "clamp" => {
            let low = args.number("min")?.unwrap_or(0.0) as f32;
            let high = args.number("max")?.unwrap_or(1.0) as f32;
            Ok(TransformStep::Clamp {
                min: low.min(high),
                max: low.max(high),
            })
        }
        "filter" => {
            let attack_ms = args.number("attack")?.unwrap_or(0.0).max(0.0);
            let decay_ms = args.number("decay")?.unwrap_or(attack_ms).max(0.0);
            Ok(TransformStep::Filter {
                attack_ms,
                decay_ms,
            })
        }
        _ => Err(TransformParseError::UnknownTransform(name.to_string())),
    }
}

#[derive(Debug, Clone)]
enum Stage {
    Pure(TransformStep),
    Filter {
        irf: LogarithmicIrf,
        /// Previous output per value index
        history: Vec<f32>,
    },
}

/// Runtime state of a [`ValueTransform`]
#[derive(Debug, Clone, Default)]
pub struct TransformChain {
    stages: Vec<Stage>,
}

impl TransformChain {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Transform one chunk in place.
    ///
    /// Filter stages keep one state per index; a chunk of a different length
    /// restarts them from zero.
    pub fn apply(&mut self, values: &mut [f32]) {
        for stage in &mut self.stages {
            match stage {
                Stage::Pure(step) => {
                    for value in values.iter_mut() {
                        *value = step.apply(*value);
                    }
                }
                Stage::Filter { irf, history } => {
                    if history.len() != values.len() {
                        history.clear();
                        history.resize(values.len(), 0.0);
                    }
                    irf.apply_slice(history, values);
                    values.copy_from_slice(history);
                }
            }
        }
    }

    pub fn apply_value(&mut self, value: f32) -> f32 {
        let mut values = [value];
        self.apply(&mut values);
        values[0]
    }

    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            if let Stage::Filter { history, .. } = stage {
                history.fill(0.0);
            }
        }
    }
}
