//! End-to-end runs of the processing pipeline

use std::collections::BTreeMap;
use std::f32::consts::PI;
use std::time::{Duration, Instant};

use spectral_cascade::audio::{Channel, ChannelLayout, ChannelMixer};
use spectral_cascade::handlers::{HandlerParams, MAX_BUFFER_SIZE};
use spectral_cascade::processing::{OrchestratorConfig, ProcessingConfig, ProcessingOrchestrator};

const SAMPLE_RATE: f64 = 48000.0;

const SPECTRUM_UNIT: &str = r#"{
    "channels": ["Auto", "Left"],
    "target_rate": 48000,
    "filter": "bqHighPass(q 0.7, freq 20)",
    "handlers": [
        { "name": "fft", "type": "Fft", "bin_width": 100, "cascades_count": 5, "window": "hann" },
        { "name": "bands", "source": "fft", "type": "BandResampler", "bands": "linear(10, 550, 1550)" },
        { "name": "combined", "source": "bands", "type": "BandCascade", "mix": "product" },
        { "name": "blur", "source": "bands", "type": "UniformBlur", "radius": 4 },
        { "name": "rms", "type": "BlockRms", "resolution_ms": 20 }
    ]
}"#;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn far() -> Instant {
    Instant::now() + Duration::from_secs(600)
}

fn sine(frequency: f32, amplitude: f32, samples: usize) -> Vec<f32> {
    (0..samples)
        .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / SAMPLE_RATE as f32).sin())
        .collect()
}

#[test]
fn test_config_round_trip() {
    let config: ProcessingConfig = serde_json::from_str(SPECTRUM_UNIT).unwrap();
    assert_eq!(config.channels, vec![Channel::Auto, Channel::FrontLeft]);
    assert_eq!(config.filter.len(), 1);
    assert_eq!(config.handlers.len(), 5);
    assert_eq!(config.handlers[1].source.as_deref(), Some("fft"));
    assert!(matches!(config.handlers[4].params, HandlerParams::BlockRms(_)));

    let json = serde_json::to_string(&config).unwrap();
    let parsed: ProcessingConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);

    let defaults: ProcessingConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(defaults, ProcessingConfig::default());
    assert!(defaults.handlers.is_empty());
}

#[test]
fn test_invalid_descriptors_are_rejected() {
    let bad_filter = SPECTRUM_UNIT.replace("bqHighPass", "bqNowhere");
    assert!(serde_json::from_str::<ProcessingConfig>(&bad_filter).is_err());

    let bad_bands = SPECTRUM_UNIT.replace("linear(10, 550, 1550)", "linear(10, 1550, 550)");
    assert!(serde_json::from_str::<ProcessingConfig>(&bad_bands).is_err());
}

#[test]
fn test_sine_lands_in_its_band() {
    init_logger();
    let config: ProcessingConfig = serde_json::from_str(SPECTRUM_UNIT).unwrap();
    let mut orchestrator = ProcessingOrchestrator::new(
        OrchestratorConfig::default(),
        ChannelLayout::stereo(),
        SAMPLE_RATE,
    );
    orchestrator.set_unit("spectrum", config);
    let reader = orchestrator.reader();

    let tone = sine(1000.0, 0.5, 48000);
    let mut mixer = ChannelMixer::new(ChannelLayout::stereo(), SAMPLE_RATE);
    // arbitrary piece sizes
    for piece in tone.chunks(733) {
        mixer.push_planar(&[piece, piece]);
        orchestrator.process_until(&mut mixer, far());
    }
    orchestrator.exchange_data();

    let combined: Vec<f32> = (0..10)
        .map(|band| reader.value("spectrum", Channel::Auto, "combined", band).unwrap())
        .collect();
    let loudest = combined
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(band, _)| band)
        .unwrap();
    // [950, 1050) Hz
    assert_eq!(loudest, 4);
    assert!(combined[4] > 2.0 * combined[0]);

    assert_eq!(
        reader.prop("spectrum", Channel::Auto, "bands", "bands count").as_deref(),
        Some("10")
    );
    assert_eq!(
        reader.prop("spectrum", Channel::Auto, "bands", "central frequency 5").as_deref(),
        Some("1000")
    );
    assert_eq!(
        reader.prop("spectrum", Channel::Auto, "fft", "size").as_deref(),
        Some("480")
    );
    assert_eq!(
        reader.prop("spectrum", Channel::FrontLeft, "rms", "block size").as_deref(),
        Some("960")
    );

    let rms = reader.value("spectrum", Channel::FrontLeft, "rms", 0).unwrap();
    assert!((rms - 0.5 / 2f32.sqrt()).abs() < 0.02, "rms {rms}");

    let blurred = reader.value("spectrum", Channel::Auto, "blur", 4).unwrap();
    assert!(blurred > 0.0);
    assert_eq!(reader.version(), 1);
}

#[test]
fn test_overflow_disables_only_its_unit() {
    init_logger();
    // 16-point FFT: 8 values every 16 samples
    let greedy: ProcessingConfig = serde_json::from_str(
        r#"{ "handlers": [ { "name": "fft", "type": "Fft", "bin_width": 3000, "cascades_count": 1 } ] }"#,
    )
    .unwrap();
    let modest: ProcessingConfig = serde_json::from_str(
        r#"{ "handlers": [ { "name": "peak", "type": "BlockPeak" } ] }"#,
    )
    .unwrap();

    let mut orchestrator = ProcessingOrchestrator::new(
        OrchestratorConfig::default(),
        ChannelLayout::mono(),
        SAMPLE_RATE,
    );
    let mut units = BTreeMap::new();
    units.insert("greedy".to_string(), greedy);
    units.insert("modest".to_string(), modest);
    orchestrator.patch(&units);
    let reader = orchestrator.reader();

    let samples = 2_100_000;
    assert!(samples / 16 * 8 > MAX_BUFFER_SIZE);
    let mut mixer = ChannelMixer::new(ChannelLayout::mono(), SAMPLE_RATE);
    let wave = sine(440.0, 0.25, samples);
    mixer.push_planar(&[wave.as_slice()]);
    orchestrator.process_until(&mut mixer, far());
    orchestrator.exchange_data();

    assert!(!orchestrator.unit("greedy").unwrap().is_active());
    assert!(orchestrator.snapshot().unit("greedy").unwrap().is_empty());
    assert_eq!(reader.value("greedy", Channel::Auto, "fft", 0), None);

    assert!(orchestrator.unit("modest").unwrap().is_active());
    let peak = reader.value("modest", Channel::Auto, "peak", 0).unwrap();
    assert!((peak - 0.25).abs() < 0.01);

    // the disabled unit stays quiet on later calls
    mixer.push_planar(&[&wave[..4800]]);
    orchestrator.process_until(&mut mixer, far());
    assert!(orchestrator.snapshot().unit("greedy").unwrap().is_empty());
}

#[test]
fn test_expired_deadline_still_publishes() {
    let config: ProcessingConfig = serde_json::from_str(SPECTRUM_UNIT).unwrap();
    let mut orchestrator = ProcessingOrchestrator::new(
        OrchestratorConfig::default(),
        ChannelLayout::stereo(),
        SAMPLE_RATE,
    );
    orchestrator.set_unit("spectrum", config);
    let reader = orchestrator.reader();

    let tone = sine(1000.0, 0.5, 9600);
    let mut mixer = ChannelMixer::new(ChannelLayout::stereo(), SAMPLE_RATE);
    mixer.push_planar(&[tone.as_slice(), tone.as_slice()]);
    let expired = Instant::now()
        .checked_sub(Duration::from_millis(10))
        .unwrap_or_else(Instant::now);
    orchestrator.process_until(&mut mixer, expired);
    orchestrator.exchange_data();

    // every handler kept its shape, stale values are zeros
    for band in 0..10 {
        assert_eq!(reader.value("spectrum", Channel::Auto, "bands", band), Some(0.0));
    }
    let unit = orchestrator.unit("spectrum").unwrap();
    assert!(unit.is_active());
    assert!(unit.handler(Channel::Auto, "fft").unwrap().data().chunk_count(0) > 0);
}

#[test]
fn test_silence_produces_zeros() {
    let config: ProcessingConfig = serde_json::from_str(SPECTRUM_UNIT).unwrap();
    let mut orchestrator = ProcessingOrchestrator::new(
        OrchestratorConfig::default(),
        ChannelLayout::stereo(),
        SAMPLE_RATE,
    );
    orchestrator.set_unit("spectrum", config);

    let mut mixer = ChannelMixer::new(ChannelLayout::stereo(), SAMPLE_RATE);
    mixer.push_silence(24000);
    orchestrator.process_until(&mut mixer, far());

    let snapshot = orchestrator.snapshot();
    let auto = &snapshot.unit("spectrum").unwrap()[&Channel::Auto];
    assert!(auto["fft"].values.iter().all(|&v| v == 0.0));
    assert!(auto["combined"].values.iter().all(|&v| v == 0.0));
    assert!(auto["rms"].values.iter().all(|&v| v == 0.0));
    let unit = orchestrator.unit("spectrum").unwrap();
    assert!(unit.handler(Channel::Auto, "rms").unwrap().data().chunk_count(0) > 0);
}

#[test]
fn test_smoothed_levels_and_loudness() {
    init_logger();
    let config: ProcessingConfig = serde_json::from_str(
        r#"{
            "handlers": [
                { "name": "fft", "type": "Fft", "bin_width": 100, "cascades_count": 3 },
                { "name": "bands", "source": "fft", "type": "BandResampler", "bands": "linear(10, 550, 1550)" },
                { "name": "smooth", "source": "bands", "type": "TimeResampler", "granularity_ms": 10, "attack_ms": 30, "decay_ms": 200 },
                { "name": "levels", "source": "smooth", "type": "ValueTransformer", "transform": "db, map(from -80:0), clamp" },
                { "name": "loudness", "type": "Loudness" }
            ]
        }"#,
    )
    .unwrap();
    let mut orchestrator = ProcessingOrchestrator::new(
        OrchestratorConfig::default(),
        ChannelLayout::mono(),
        SAMPLE_RATE,
    );
    orchestrator.set_unit("levels", config);
    let reader = orchestrator.reader();

    let tone = sine(1000.0, 0.5, 48000);
    let mut mixer = ChannelMixer::new(ChannelLayout::mono(), SAMPLE_RATE);
    for piece in tone.chunks(480) {
        mixer.push_planar(&[piece]);
        orchestrator.process_until(&mut mixer, far());

        // one smoothed chunk per 10 ms, whatever the FFT produced
        let unit = orchestrator.unit("levels").unwrap();
        let smooth = unit.handler(Channel::Auto, "smooth").unwrap();
        assert!((0..3).all(|layer| smooth.data().chunk_count(layer) == 1));
    }
    orchestrator.exchange_data();

    let levels: Vec<f32> = (0..10)
        .map(|band| reader.value("levels", Channel::Auto, "levels", band).unwrap())
        .collect();
    assert!(levels.iter().all(|level| (0.0..=1.0).contains(level)), "{levels:?}");
    assert!(levels[4] > levels[0] && levels[4] > 0.5, "{levels:?}");
    assert_eq!(
        reader.prop("levels", Channel::Auto, "smooth", "block size").as_deref(),
        Some("480")
    );

    let loudness = reader.value("levels", Channel::Auto, "loudness", 0).unwrap();
    assert!((loudness - 0.125).abs() < 0.005, "loudness {loudness}");
}
