//! Combines the per-cascade band values of a resampler into one spectrum

use std::fmt;
use std::time::Instant;

use ndarray::Array2;
use serde::{Deserialize, Deserializer, Serialize};

use super::{
    ConfigError, DataSize, HandlerData, HandlerError, HandlerInfo, ProcessContext, SoundHandler,
};

/// How the values of the selected cascades are merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MixFunction {
    /// Geometric mean
    #[default]
    Product,
    /// Arithmetic mean
    Average,
}

impl MixFunction {
    /// Parse a name, warning and assuming [`MixFunction::Product`] when unknown
    pub fn parse_lenient(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "product" => Self::Product,
            "average" => Self::Average,
            other => {
                log::warn!("mix function '{other}' is not recognized, assume 'product'");
                Self::Product
            }
        }
    }
}

impl fmt::Display for MixFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Product => f.write_str("product"),
            Self::Average => f.write_str("average"),
        }
    }
}

impl<'de> Deserialize<'de> for MixFunction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandCascadeParams {
    /// Cascades with a band weight at or below this are skipped
    pub min_weight: f32,
    /// Accumulated weight after which no more cascades are added
    pub target_weight: f32,
    /// A cascade whose whole chunk stays at or below this has not warmed up yet
    pub zero_level: f32,
    pub mix: MixFunction,
}

impl Default for BandCascadeParams {
    fn default() -> Self {
        Self {
            min_weight: 0.0,
            target_weight: 2.5,
            zero_level: 0.0,
            mix: MixFunction::Product,
        }
    }
}

/// Read position of one source layer
#[derive(Debug, Clone, Default)]
struct LayerCursor {
    values: Vec<f32>,
    max_value: f32,
    next_chunk: usize,
    // input samples until the next chunk of this layer is due
    offset: i64,
}

impl LayerCursor {
    fn take(&mut self, values: &[f32]) {
        self.values.clear();
        self.values.extend_from_slice(values);
        self.max_value = values.iter().copied().fold(f32::MIN, f32::max);
    }
}

pub struct BandCascadeTransformer {
    params: BandCascadeParams,
    data: HandlerData,
    weights: Array2<f32>,
    eq_wave_sizes: Vec<usize>,
    cursors: Vec<LayerCursor>,
    scratch: Vec<f32>,
}

impl BandCascadeTransformer {
    pub fn new(name: &str, params: BandCascadeParams) -> Self {
        Self {
            params,
            data: HandlerData::new(name),
            weights: Array2::zeros((0, 0)),
            eq_wave_sizes: Vec::new(),
            cursors: Vec::new(),
            scratch: Vec::new(),
        }
    }

    /// Move every layer cursor forward by one output chunk
    fn advance(&mut self, source: &HandlerData) {
        let step = self.eq_wave_sizes[0] as i64;
        for (layer, cursor) in self.cursors.iter_mut().enumerate() {
            cursor.offset -= step;
            if cursor.offset >= 0 || cursor.next_chunk >= source.chunk_count(layer) {
                continue;
            }
            cursor.take(source.chunk(layer, cursor.next_chunk));
            cursor.next_chunk += 1;
            cursor.offset += self.eq_wave_sizes[layer] as i64;
        }
    }

    fn compute_band(&self, band: usize) -> f32 {
        let params = &self.params;
        let mut weight = 0.0f32;
        let mut summed = 0usize;
        let mut product = 1.0f64;
        let mut sum = 0.0f64;

        for (cascade, cursor) in self.cursors.iter().enumerate() {
            if cursor.max_value <= params.zero_level {
                // later cascades have not seen enough samples since the last silence
                if summed == 0 {
                    return match cascade {
                        0 => 0.0,
                        _ => self.cursors[cascade - 1].values[band],
                    };
                }
                break;
            }

            let band_weight = self.weights[[cascade, band]];
            if band_weight <= params.min_weight {
                continue;
            }

            let magnitude = cursor.values[band];
            summed += 1;
            product *= magnitude as f64;
            sum += magnitude as f64;
            weight += band_weight;
            if weight >= params.target_weight {
                break;
            }
        }

        if summed == 0 {
            return (0..self.cursors.len())
                .rev()
                .map(|cascade| (self.weights[[cascade, band]], self.cursors[cascade].values[band]))
                .find(|&(band_weight, value)| band_weight > 0.0 && value > params.zero_level)
                .map_or(0.0, |(_, value)| value);
        }

        let value = match params.mix {
            MixFunction::Product => product.powf(1.0 / summed as f64),
            MixFunction::Average => sum / summed as f64,
        };
        value as f32
    }

    fn transform(
        &mut self,
        source: &HandlerData,
        kill_time: Instant,
        scratch: &mut [f32],
    ) -> Result<(), HandlerError> {
        for (layer, cursor) in self.cursors.iter_mut().enumerate() {
            cursor.next_chunk = 0;
            cursor.take(source.saved(layer));
        }

        for _ in 0..source.chunk_count(0) {
            // cursors move even when the values are not recomputed
            self.advance(source);
            if Instant::now() > kill_time {
                self.data.repeat_last(0)?;
                continue;
            }

            for (band, out) in scratch.iter_mut().enumerate() {
                *out = self.compute_band(band);
            }
            self.data.push_layer(0, scratch)?;
        }
        Ok(())
    }
}

impl SoundHandler for BandCascadeTransformer {
    fn configure(
        &mut self,
        _sample_rate: f64,
        source: Option<&dyn SoundHandler>,
    ) -> Result<DataSize, ConfigError> {
        let handler = self.data.name().to_string();
        let source = source.ok_or(ConfigError::MissingSource {
            handler: handler.clone(),
        })?;
        let invalid = || ConfigError::InvalidSource {
            handler: handler.clone(),
            expected: "BandResampler",
        };
        let weights = source.band_weights().ok_or_else(invalid)?;
        let source_size = source.data().size();
        if source_size.is_empty() || weights.nrows() != source_size.layers_count() {
            return Err(invalid());
        }

        self.weights = weights.clone();
        self.eq_wave_sizes = source_size.eq_wave_sizes.clone();
        self.cursors = vec![LayerCursor::default(); source_size.layers_count()];

        let size = DataSize::new(source_size.values_count, vec![self.eq_wave_sizes[0]]);
        self.data.set_size(size.clone());
        Ok(size)
    }

    fn process(
        &mut self,
        ctx: &ProcessContext<'_>,
        source: Option<&dyn SoundHandler>,
    ) -> Result<(), HandlerError> {
        let Some(source) = source else {
            return Ok(());
        };
        if self.cursors.is_empty() {
            return Ok(());
        }

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(self.data.size().values_count, 0.0);
        let result = self.transform(source.data(), ctx.kill_time, &mut scratch);
        self.scratch = scratch;
        result
    }

    fn data(&self) -> &HandlerData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut HandlerData {
        &mut self.data
    }

    fn info(&self) -> HandlerInfo {
        HandlerInfo::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::time::Duration;

    /// Band source with fixed weights and hand-written chunks
    struct StubBands {
        data: HandlerData,
        weights: Array2<f32>,
    }

    impl StubBands {
        fn new(weights: Array2<f32>, eq_wave_sizes: Vec<usize>) -> Self {
            let mut data = HandlerData::new("stub");
            data.set_size(DataSize::new(weights.ncols(), eq_wave_sizes));
            Self { data, weights }
        }
    }

    impl SoundHandler for StubBands {
        fn configure(&mut self, _: f64, _: Option<&dyn SoundHandler>) -> Result<DataSize, ConfigError> {
            Ok(self.data.size().clone())
        }

        fn process(&mut self, _: &ProcessContext<'_>, _: Option<&dyn SoundHandler>) -> Result<(), HandlerError> {
            Ok(())
        }

        fn data(&self) -> &HandlerData {
            &self.data
        }

        fn data_mut(&mut self) -> &mut HandlerData {
            &mut self.data
        }

        fn band_weights(&self) -> Option<&Array2<f32>> {
            Some(&self.weights)
        }
    }

    fn far() -> ProcessContext<'static> {
        ProcessContext::new(&[], Instant::now() + Duration::from_secs(60))
    }

    fn run(params: BandCascadeParams, source: &StubBands) -> BandCascadeTransformer {
        let mut transformer = BandCascadeTransformer::new("bct", params);
        transformer.configure(48000.0, Some(source)).unwrap();
        transformer.process(&far(), Some(source)).unwrap();
        transformer
    }

    #[test]
    fn test_single_cascade_is_passed_through() {
        let mut source = StubBands::new(array![[0.4, 1.0]], vec![16]);
        source.data.push_layer(0, &[0.3, 0.7]).unwrap();

        let params = BandCascadeParams {
            target_weight: 100.0,
            ..BandCascadeParams::default()
        };
        let transformer = run(params, &source);
        assert_eq!(transformer.data().chunk(0, 0), &[0.3, 0.7]);
    }

    #[test]
    fn test_product_and_average() {
        let mut source = StubBands::new(array![[1.0], [1.0]], vec![16, 16]);
        source.data.push_layer(0, &[4.0]).unwrap();
        source.data.push_layer(1, &[1.0]).unwrap();

        let product = run(BandCascadeParams::default(), &source);
        assert!((product.data().chunk(0, 0)[0] - 2.0).abs() < 1e-6);

        let average = run(
            BandCascadeParams {
                mix: MixFunction::Average,
                ..BandCascadeParams::default()
            },
            &source,
        );
        assert!((average.data().chunk(0, 0)[0] - 2.5).abs() < 1e-6);

        // target reached by the first cascade alone
        let first_only = run(
            BandCascadeParams {
                target_weight: 1.0,
                ..BandCascadeParams::default()
            },
            &source,
        );
        assert_eq!(first_only.data().chunk(0, 0), &[4.0]);
    }

    #[test]
    fn test_cold_cascades() {
        // cascade 1 has not produced anything yet: only cascade 0 counts
        let mut source = StubBands::new(array![[1.0], [1.0]], vec![16, 16]);
        source.data.push_layer(0, &[9.0]).unwrap();
        source.data.push_layer(1, &[0.0]).unwrap();
        assert_eq!(run(BandCascadeParams::default(), &source).data().chunk(0, 0), &[9.0]);

        // cold cascade 0 forces zero
        let mut source = StubBands::new(array![[1.0], [1.0]], vec![16, 16]);
        source.data.push_layer(0, &[0.0]).unwrap();
        source.data.push_layer(1, &[5.0]).unwrap();
        assert_eq!(run(BandCascadeParams::default(), &source).data().chunk(0, 0), &[0.0]);

        // nothing accumulated before a cold cascade: reuse its predecessor
        let mut source = StubBands::new(array![[0.0], [1.0]], vec![16, 16]);
        source.data.push_layer(0, &[3.0]).unwrap();
        source.data.push_layer(1, &[0.0]).unwrap();
        assert_eq!(run(BandCascadeParams::default(), &source).data().chunk(0, 0), &[3.0]);
    }

    #[test]
    fn test_fallback_to_last_weighted_cascade() {
        let mut source = StubBands::new(array![[0.1, 1.0], [0.05, 1.0]], vec![16, 16]);
        source.data.push_layer(0, &[2.0, 1.0]).unwrap();
        source.data.push_layer(1, &[6.0, 1.0]).unwrap();

        let params = BandCascadeParams {
            min_weight: 0.5,
            ..BandCascadeParams::default()
        };
        let transformer = run(params, &source);
        assert_eq!(transformer.data().chunk(0, 0)[0], 6.0);
    }

    #[test]
    fn test_layers_align_by_wave_size() {
        let mut source = StubBands::new(array![[1.0], [1.0]], vec![16, 32]);
        source.data.push_layer(0, &[4.0]).unwrap();
        source.data.push_layer(0, &[16.0]).unwrap();
        source.data.push_layer(1, &[1.0]).unwrap();

        let transformer = run(BandCascadeParams::default(), &source);
        assert_eq!(transformer.data().chunk_count(0), 2);
        assert!((transformer.data().chunk(0, 0)[0] - 2.0).abs() < 1e-6);
        assert!((transformer.data().chunk(0, 1)[0] - 4.0).abs() < 1e-6);
        assert_eq!(transformer.data().size().eq_wave_sizes, vec![16]);
    }

    #[test]
    fn test_expired_deadline_repeats_previous_output() {
        let mut source = StubBands::new(array![[1.0]], vec![16]);
        source.data.push_layer(0, &[0.5]).unwrap();
        let mut transformer = run(BandCascadeParams::default(), &source);

        transformer.data_mut().clear_chunks();
        source.data.clear_chunks();
        source.data.push_layer(0, &[0.9]).unwrap();
        source.data.push_layer(0, &[0.8]).unwrap();

        let expired = Instant::now();
        std::thread::sleep(Duration::from_millis(2));
        transformer
            .process(&ProcessContext::new(&[], expired), Some(&source))
            .unwrap();
        assert_eq!(transformer.data().chunk_count(0), 2);
        assert!(transformer.data().chunks(0).all(|chunk| chunk == [0.5]));
    }

    #[test]
    fn test_missed_deadline_keeps_layers_aligned() {
        let params = BandCascadeParams {
            mix: MixFunction::Average,
            ..BandCascadeParams::default()
        };
        let mut source = StubBands::new(array![[1.0], [1.0]], vec![16, 32]);
        let mut transformer = BandCascadeTransformer::new("bct", params);
        transformer.configure(48000.0, Some(&source)).unwrap();

        let mut next_call = |source: &mut StubBands, layer0: &[f32], layer1: &[f32], ctx: &ProcessContext<'_>| {
            source.data.clear_chunks();
            transformer.data_mut().clear_chunks();
            for &value in layer0 {
                source.data.push_layer(0, &[value]).unwrap();
            }
            for &value in layer1 {
                source.data.push_layer(1, &[value]).unwrap();
            }
            transformer.process(ctx, Some(&*source)).unwrap();
            transformer.data().chunks(0).map(|chunk| chunk[0]).collect::<Vec<_>>()
        };

        assert_eq!(next_call(&mut source, &[1.0], &[10.0], &far()), vec![5.5]);

        let expired = Instant::now();
        std::thread::sleep(Duration::from_millis(2));
        let late = ProcessContext::new(&[], expired);
        assert_eq!(next_call(&mut source, &[1.0], &[], &late), vec![5.5]);

        // the second layer is due again on the first chunk of this call
        assert_eq!(next_call(&mut source, &[1.0, 1.0], &[30.0], &far()), vec![15.5, 15.5]);
    }

    #[test]
    fn test_needs_band_source() {
        let mut transformer = BandCascadeTransformer::new("bct", BandCascadeParams::default());
        let other = BandCascadeTransformer::new("other", BandCascadeParams::default());
        assert!(matches!(
            transformer.configure(48000.0, Some(&other)),
            Err(ConfigError::InvalidSource { .. })
        ));
    }

    #[test]
    fn test_mix_function_names() {
        assert_eq!(MixFunction::parse_lenient("Average"), MixFunction::Average);
        assert_eq!(MixFunction::parse_lenient("median"), MixFunction::Product);
        let params: BandCascadeParams = serde_json::from_str(r#"{ "mix": "average" }"#).unwrap();
        assert_eq!(params.mix, MixFunction::Average);
        assert_eq!(params.target_weight, 2.5);
        assert_eq!(MixFunction::Average.to_string(), "average");
    }
}
