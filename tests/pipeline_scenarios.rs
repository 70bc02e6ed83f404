//! End-to-end pipeline runs against mock capabilities.

use kwspot::KwsError;
use kwspot::audio::source::MockAudioSource;
use kwspot::audio::wav::{WavAudioSource, write_wav};
use kwspot::audio::{DiagnosticRing, HostAudioSource, RingRetention};
use kwspot::defaults;
use kwspot::features::{LogEnergyExtractor, MockFeatureExtractor};
use kwspot::inference::{InputShape, LinearEngine, MockInferenceEngine};
use kwspot::pipeline::{
    AbortFlag, CountdownAbort, Indicator, Pipeline, PipelineConfig, PipelinePhase, PipelineState,
    RecordingIndicator, RefreshPolicy, RunOutcome, StreamOptions,
};
use kwspot::stream::{
    ByteOrder, IoChannel, MemoryChannel, SharedChannel, StreamEncoder, StreamTag, TagSet,
    WireFormat, decode_all,
};
use std::io::Cursor;

const X: usize = defaults::FEATURE_COUNT;
const Y: usize = defaults::WINDOW_FRAMES;

fn shape() -> InputShape {
    InputShape::new(X, Y)
}

fn mock_pipeline(config: PipelineConfig, engine: MockInferenceEngine) -> Pipeline {
    Pipeline::new(
        config,
        Box::new(MockAudioSource::new()),
        Box::new(MockFeatureExtractor::new(X)),
        Box::new(engine),
    )
}

fn row_markers(input: &[f32], x: usize) -> Vec<f32> {
    input.chunks(x).map(|row| row[0]).collect()
}

#[test]
fn test_failing_engine_ends_run_with_its_code() {
    let engine = MockInferenceEngine::new(shape(), 2).with_error(5);
    let log = engine.input_log();
    let indicator = RecordingIndicator::new();
    let mut pipeline = mock_pipeline(PipelineConfig::default(), engine)
        .with_indicator(Box::new(indicator.clone()));
    let mut state = PipelineState::new();

    let result = pipeline.run(&mut state);

    match result {
        Err(KwsError::InferenceFailed { code }) => assert_eq!(code, 5),
        other => panic!("Expected InferenceFailed(5), got {:?}", other),
    }
    let inputs = log.lock().unwrap();
    assert_eq!(inputs.len(), 1, "inference runs exactly once");
    assert_eq!(inputs[0].len(), X * Y);
    assert_eq!(
        row_markers(&inputs[0], X),
        (0..Y).map(|n| n as f32).collect::<Vec<_>>()
    );
    assert!(indicator.states().is_empty(), "indicator must not change");
    assert_eq!(state.stats().frames_captured, Y as u64);
    assert_eq!(state.phase(), PipelinePhase::Idle);
}

#[test]
fn test_shift_mode_window_after_three_cycles() {
    let channel = SharedChannel::new(MemoryChannel::new());
    let encoder = StreamEncoder::new(Box::new(channel.clone()), WireFormat::default());
    let engine = MockInferenceEngine::new(shape(), 2);
    let log = engine.input_log();
    let config = PipelineConfig {
        refresh: RefreshPolicy::Shift,
        max_inferences: Some(4),
        stream: StreamOptions {
            features: true,
            ..StreamOptions::default()
        },
        ..PipelineConfig::default()
    };
    let mut pipeline = mock_pipeline(config, engine).with_encoder(encoder);
    let mut state = PipelineState::new();

    assert_eq!(pipeline.run(&mut state).unwrap(), RunOutcome::Completed);

    // frames are numbered from 0: priming takes 0..=61, the shifts add 62, 63, 64
    let expected: Vec<f32> = (3..Y + 3).map(|n| n as f32).collect();
    let inputs = log.lock().unwrap();
    assert_eq!(inputs.len(), 4);
    assert_eq!(row_markers(&inputs[3], X), expected);

    let bytes = channel.lock().unwrap().sent().to_vec();
    let windows: Vec<Vec<f32>> = decode_all(WireFormat::default(), &bytes)
        .unwrap()
        .into_iter()
        .filter(|f| f.tag == StreamTag::FeatureWindow)
        .map(|f| f.as_f32(ByteOrder::Little).unwrap())
        .collect();
    assert_eq!(windows.len(), 4);
    assert_eq!(row_markers(&windows[3], X), expected);
    assert_eq!(state.stats().frames_captured, (Y + 3) as u64);
}

#[test]
fn test_abort_mid_priming_skips_inference() {
    let engine = MockInferenceEngine::new(shape(), 2);
    let log = engine.input_log();
    let indicator = RecordingIndicator::new();
    let mut pipeline = mock_pipeline(PipelineConfig::default(), engine)
        .with_indicator(Box::new(indicator.clone()))
        .with_abort_signal(Box::new(CountdownAbort::new(10)));
    let mut state = PipelineState::new();

    assert_eq!(pipeline.run(&mut state).unwrap(), RunOutcome::Aborted);

    assert_eq!(state.stats().frames_captured, 10);
    assert!(log.lock().unwrap().is_empty());
    assert!(indicator.states().is_empty());
    assert_eq!(
        state.phase_history(),
        &[
            PipelinePhase::Priming,
            PipelinePhase::Aborting,
            PipelinePhase::Draining,
            PipelinePhase::Idle,
        ]
    );
}

#[test]
fn test_threshold_drives_indicator() {
    let engine = MockInferenceEngine::new(shape(), 2).with_outputs(vec![
        vec![0.2, 0.5],
        vec![0.9, 0.1],
        vec![0.3, 0.3],
    ]);
    let indicator = RecordingIndicator::new();
    let config = PipelineConfig {
        threshold: 0.5,
        max_inferences: Some(3),
        ..PipelineConfig::default()
    };
    let mut pipeline = mock_pipeline(config, engine).with_indicator(Box::new(indicator.clone()));
    let mut state = PipelineState::new();

    pipeline.run(&mut state).unwrap();

    assert_eq!(
        indicator.states(),
        vec![Indicator::Negative, Indicator::Positive, Indicator::Negative]
    );
    assert_eq!(state.stats().spotted, 1);
}

#[test]
fn test_raw_audio_ring_retention_is_explicit() {
    let cases = [(RingRetention::MostRecent, 2i16), (RingRetention::First, 0)];
    for (retention, first_marker) in cases {
        let channel = SharedChannel::new(MemoryChannel::new());
        let encoder = StreamEncoder::new(Box::new(channel.clone()), WireFormat::default());
        let shape = InputShape::new(2, 4);
        let config = PipelineConfig {
            frame_samples: 4,
            diagnostic_frames: 2,
            ring_retention: retention,
            max_inferences: Some(1),
            stream: StreamOptions {
                raw_audio: true,
                ..StreamOptions::default()
            },
            ..PipelineConfig::default()
        };
        let mut pipeline = Pipeline::new(
            config,
            Box::new(MockAudioSource::new().with_frame_samples(4)),
            Box::new(MockFeatureExtractor::new(2)),
            Box::new(MockInferenceEngine::new(shape, 1)),
        )
        .with_encoder(encoder);

        pipeline.run(&mut PipelineState::new()).unwrap();

        let bytes = channel.lock().unwrap().sent().to_vec();
        let raw = decode_all(WireFormat::default(), &bytes)
            .unwrap()
            .into_iter()
            .find(|f| f.tag == StreamTag::RawAudio)
            .unwrap();
        let samples = raw.as_i16(ByteOrder::Little).unwrap();
        assert_eq!(samples.len(), 8, "two frames of four samples");
        assert_eq!(samples[0], first_marker, "{retention:?}");
        assert_eq!(samples[4], first_marker + 1, "{retention:?}");
    }
}

#[test]
fn test_block_refill_abort_stops_in_steady() {
    let engine = MockInferenceEngine::new(shape(), 2);
    let log = engine.input_log();
    let indicator = RecordingIndicator::new();
    let config = PipelineConfig {
        refresh: RefreshPolicy::Block,
        ..PipelineConfig::default()
    };
    // Y polls while priming, one at the top of steady state, five during the refill
    let mut pipeline = mock_pipeline(config, engine)
        .with_indicator(Box::new(indicator.clone()))
        .with_abort_signal(Box::new(CountdownAbort::new(Y + 1 + 5)));
    let mut state = PipelineState::new();

    assert_eq!(pipeline.run(&mut state).unwrap(), RunOutcome::Aborted);

    assert_eq!(log.lock().unwrap().len(), 1, "no inference on a partial refill");
    assert_eq!(state.stats().frames_captured, (Y + 5) as u64);
    assert_eq!(indicator.states(), vec![Indicator::Negative]);
    assert!(state.window().as_flat_input().iter().all(|v| *v == 0.0));
    assert_eq!(
        state.phase_history(),
        &[
            PipelinePhase::Priming,
            PipelinePhase::Steady,
            PipelinePhase::Aborting,
            PipelinePhase::Draining,
            PipelinePhase::Idle,
        ]
    );
}

#[test]
fn test_shift_extraction_failure_drains_run() {
    let engine = MockInferenceEngine::new(shape(), 2);
    let log = engine.input_log();
    let indicator = RecordingIndicator::new();
    // priming plus two shifts succeed; the third shift capture fails
    let extractor = MockFeatureExtractor::new(X).with_failure_after((Y + 2) as u64);
    let mut pipeline = Pipeline::new(
        PipelineConfig::default(),
        Box::new(MockAudioSource::new()),
        Box::new(extractor),
        Box::new(engine),
    )
    .with_indicator(Box::new(indicator.clone()));
    let mut state = PipelineState::new();

    let result = pipeline.run(&mut state);

    assert!(matches!(result, Err(KwsError::FeatureExtractionFailed { .. })));
    assert_eq!(log.lock().unwrap().len(), 3);
    assert_eq!(state.stats().frames_captured, (Y + 2) as u64);
    assert_eq!(indicator.states(), vec![Indicator::Negative; 3]);
    assert_eq!(
        state.phase_history(),
        &[
            PipelinePhase::Priming,
            PipelinePhase::Steady,
            PipelinePhase::Aborting,
            PipelinePhase::Draining,
            PipelinePhase::Idle,
        ]
    );
}

#[test]
fn test_state_is_reusable_after_abort() {
    let mut state = PipelineState::new();

    let flag = AbortFlag::new();
    flag.raise();
    let engine = MockInferenceEngine::new(shape(), 2);
    let mut aborted =
        mock_pipeline(PipelineConfig::default(), engine).with_abort_signal(Box::new(flag));
    assert_eq!(aborted.run(&mut state).unwrap(), RunOutcome::Aborted);

    let engine = MockInferenceEngine::new(shape(), 2);
    let log = engine.input_log();
    let config = PipelineConfig {
        max_inferences: Some(1),
        ..PipelineConfig::default()
    };
    let mut fresh = mock_pipeline(config, engine);
    assert_eq!(fresh.run(&mut state).unwrap(), RunOutcome::Completed);
    assert_eq!(log.lock().unwrap()[0][0], 0.0);
    assert_eq!(state.stats().inferences, 1);
}

#[test]
fn test_host_fed_run_uses_host_tags() {
    let frame_samples = 4;
    let shape = InputShape::new(2, 3);
    let link = SharedChannel::new(MemoryChannel::new());
    {
        let mut host = link.lock().unwrap();
        for n in 0..shape.frames as i16 {
            let payload = vec![n; frame_samples]
                .iter()
                .flat_map(|s| s.to_le_bytes())
                .collect();
            host.queue_inbound(StreamTag::RawAudio.into(), payload);
        }
    }

    let source = HostAudioSource::new(link.clone(), frame_samples, ByteOrder::Little);
    let engine = MockInferenceEngine::new(shape, 2).with_outputs(vec![vec![0.1, 0.7]]);
    let log = engine.input_log();
    let config = PipelineConfig {
        frame_samples,
        max_inferences: Some(1),
        stream: StreamOptions {
            features: true,
            tags: TagSet::HostFed,
            ..StreamOptions::default()
        },
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::new(
        config,
        Box::new(source),
        Box::new(MockFeatureExtractor::new(shape.features)),
        Box::new(engine),
    )
    .with_encoder(StreamEncoder::new(Box::new(link.clone()), WireFormat::default()));

    assert_eq!(
        pipeline.run(&mut PipelineState::new()).unwrap(),
        RunOutcome::Completed
    );
    assert_eq!(row_markers(&log.lock().unwrap()[0], 2), vec![0.0, 1.0, 2.0]);

    let bytes = link.lock().unwrap().sent().to_vec();
    let tags: Vec<StreamTag> = decode_all(WireFormat::default(), &bytes)
        .unwrap()
        .iter()
        .map(|f| f.tag)
        .collect();
    assert_eq!(
        tags,
        vec![
            StreamTag::Ready,
            StreamTag::HostFeatureWindow,
            StreamTag::HostInferenceOutput,
            StreamTag::Ready,
        ]
    );
}

fn host_audio_bytes(frames: i16, frame_samples: usize, format: WireFormat) -> Vec<u8> {
    let host = SharedChannel::new(MemoryChannel::new());
    let mut encoder = StreamEncoder::new(Box::new(host.clone()), format);
    for n in 0..frames {
        encoder.send_raw_audio(&vec![n; frame_samples], StreamTag::RawAudio).unwrap();
    }
    host.lock().unwrap().sent().to_vec()
}

fn serve_over_link(inbound: Vec<u8>, format: WireFormat) -> (kwspot::Result<RunOutcome>, Vec<u8>) {
    let frame_samples = 4;
    let link = SharedChannel::new(
        IoChannel::new(Vec::new(), format).with_reader(Box::new(Cursor::new(inbound))),
    );
    let source = HostAudioSource::new(link.clone(), frame_samples, format.byte_order);
    let config = PipelineConfig {
        frame_samples,
        max_inferences: Some(1),
        stream: StreamOptions {
            tags: TagSet::HostFed,
            ..StreamOptions::default()
        },
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::new(
        config,
        Box::new(source),
        Box::new(MockFeatureExtractor::new(2)),
        Box::new(MockInferenceEngine::new(InputShape::new(2, 3), 2)),
    )
    .with_encoder(StreamEncoder::new(Box::new(link.clone()), format));

    let outcome = pipeline.run(&mut PipelineState::new());
    let sent = link.lock().unwrap().get_ref().clone();
    (outcome, sent)
}

#[test]
fn test_host_link_round_trip_with_checksum() {
    let format = WireFormat {
        checksum: true,
        ..WireFormat::default()
    };

    let (outcome, sent) = serve_over_link(host_audio_bytes(3, 4, format), format);

    assert_eq!(outcome.unwrap(), RunOutcome::Completed);
    let tags: Vec<StreamTag> = decode_all(format, &sent)
        .unwrap()
        .iter()
        .map(|f| f.tag)
        .collect();
    assert_eq!(
        tags,
        vec![
            StreamTag::Ready,
            StreamTag::HostInferenceOutput,
            StreamTag::Ready,
        ]
    );
}

#[test]
fn test_corrupt_host_frame_fails_capture() {
    let format = WireFormat {
        checksum: true,
        ..WireFormat::default()
    };
    let mut inbound = host_audio_bytes(3, 4, format);
    let last = inbound.len() - 1;
    inbound[last] ^= 0xFF;

    let (outcome, sent) = serve_over_link(inbound, format);

    assert!(matches!(outcome, Err(KwsError::CaptureFailed { .. })));
    assert!(sent.is_empty(), "no window was completed");
}

#[test]
fn test_wav_replay_with_reference_capabilities() {
    let dir = tempfile::tempdir().unwrap();
    let wav_path = dir.path().join("clip.wav");
    let frame_samples = 256;
    let samples: Vec<i16> = (0..frame_samples * 6)
        .map(|i| ((i % 64) as i16 - 32) * 500)
        .collect();
    write_wav(&wav_path, &samples).unwrap();

    let features = 4;
    let frames = 3;
    let model = serde_json::json!({
        "features": features,
        "frames": frames,
        "weights": [vec![0.0f32; features * frames]],
        "bias": [0.0],
        "activation": "sigmoid",
    });
    let engine = LinearEngine::from_json(&model.to_string()).unwrap();

    let source = WavAudioSource::open(&wav_path, frame_samples).unwrap();
    assert_eq!(source.frame_count(), 6);

    let config = PipelineConfig {
        frame_samples,
        refresh: RefreshPolicy::Block,
        max_inferences: Some(2),
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::new(
        config,
        Box::new(source),
        Box::new(LogEnergyExtractor::new(features)),
        Box::new(engine),
    );
    let mut state = PipelineState::new();

    assert_eq!(pipeline.run(&mut state).unwrap(), RunOutcome::Completed);
    assert_eq!(state.stats().frames_captured, 6);
    // zero weights: sigmoid(0) sits exactly on the default threshold
    assert_eq!(state.result().values, vec![0.5]);
    assert_eq!(state.stats().spotted, 0);
}

#[test]
fn test_diagnostic_ring_standalone_most_recent() {
    let mut ring = DiagnosticRing::new(defaults::DIAGNOSTIC_FRAMES, RingRetention::MostRecent);
    for n in 0..20i16 {
        ring.push(&[n]);
    }
    assert_eq!(ring.frames().next(), Some(&[4i16][..]));
}
