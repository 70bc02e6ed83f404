use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use kwspot::audio::HostAudioSource;
use kwspot::audio::wav::{WavAudioSource, write_wav};
use kwspot::cli::{Cli, Commands, RunArgs};
use kwspot::config::{AudioInput, Config};
use kwspot::defaults;
use kwspot::features::LogEnergyExtractor;
use kwspot::inference::{InferenceEngine, InferenceResult, LinearEngine};
use kwspot::pipeline::{AbortFlag, Pipeline, PipelineState, RefreshPolicy, RunOutcome};
use kwspot::stream::{
    FrameDecoder, IoChannel, NullChannel, SharedChannel, StreamEncoder, StreamFrame, StreamTag,
    TagSet, WireFormat,
};
use owo_colors::OwoColorize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{Level, debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    debug!("kwspot {}", kwspot::version_string());

    match cli.command {
        #[cfg(feature = "cpal-audio")]
        Commands::Run {
            args,
            device,
            duration,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run_live(config, args, device, duration).await?;
        }
        Commands::Replay { wav, args } => {
            let config = load_config(cli.config.as_deref())?;
            run_replay(config, wav, args).await?;
        }
        Commands::Serve { port, args } => {
            let config = load_config(cli.config.as_deref())?;
            run_serve(config, port, args).await?;
        }
        Commands::Decode {
            capture,
            wav,
            checksum,
        } => {
            decode_capture(&capture, wav.as_deref(), checksum)?;
        }
        #[cfg(feature = "cpal-audio")]
        Commands::Devices => {
            list_audio_devices()?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "kwspot", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8, quiet: bool) {
    let log_level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (false, 0) => Level::INFO,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/kwspot/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides())
}

/// Fold command-line overrides into the loaded configuration.
fn apply_run_args(mut config: Config, args: &RunArgs, input: AudioInput) -> Result<Config> {
    if let Some(threshold) = args.threshold {
        config.pipeline.threshold = threshold;
    }
    if let Some(refresh) = args.refresh {
        config.pipeline.refresh = refresh;
    }
    if let Some(limit) = args.max_inferences {
        config.pipeline.max_inferences = Some(limit);
    }
    if let Some(model) = &args.model {
        config.pipeline.model = Some(model.clone());
    }
    if args.diagnostics {
        config.stream.raw_audio = true;
        config.stream.features = true;
    }
    if input == AudioInput::Host {
        if args.out.is_some() {
            bail!("serve streams over the host link; --out is not supported");
        }
        config.stream.tags = TagSet::HostFed;
    }
    config.validate_for(input)?;
    Ok(config)
}

fn load_engine(config: &Config) -> Result<LinearEngine> {
    let Some(path) = &config.pipeline.model else {
        bail!("no model given; pass --model or set pipeline.model in the config file");
    };
    LinearEngine::load(path).with_context(|| format!("loading model {}", path.display()))
}

fn build_encoder(config: &Config, out: Option<&Path>) -> Result<StreamEncoder> {
    let format = config.wire_format();
    let encoder = match out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating stream file {}", path.display()))?;
            info!(path = %path.display(), "streaming host link to file");
            StreamEncoder::new(Box::new(IoChannel::new(BufWriter::new(file), format)), format)
        }
        None => StreamEncoder::new(Box::new(NullChannel), format),
    };
    Ok(encoder)
}

/// Run the pipeline on a blocking thread and report how it ended.
async fn run_to_completion(mut pipeline: Pipeline) -> Result<()> {
    let (outcome, state) = tokio::task::spawn_blocking(move || {
        let mut state = PipelineState::new();
        let outcome = pipeline.run(&mut state);
        (outcome, state)
    })
    .await
    .context("pipeline thread panicked")?;

    let stats = state.stats();
    match outcome {
        Ok(RunOutcome::Aborted) => eprintln!("{} {}", "Stopped:".yellow(), stats.summary()),
        Ok(RunOutcome::Completed) => eprintln!("{} {}", "Done:".green(), stats.summary()),
        Err(e) => bail!("pipeline failed with code {}: {e}", e.result_code()),
    }
    Ok(())
}

#[cfg(feature = "cpal-audio")]
async fn run_live(
    config: Config,
    args: RunArgs,
    device: Option<String>,
    duration: Option<std::time::Duration>,
) -> Result<()> {
    use kwspot::audio::capture::CpalAudioSource;

    let config = apply_run_args(config, &args, AudioInput::Microphone)?;
    let engine = load_engine(&config)?;
    let features = engine.input_shape().features;

    let device = device.or_else(|| config.audio.device.clone());
    let source = CpalAudioSource::new(device.as_deref(), config.pipeline.frame_samples)?;

    let abort = abort_on_ctrl_c();
    let pipeline = Pipeline::new(
        config.pipeline_config(),
        Box::new(source),
        Box::new(LogEnergyExtractor::new(features)),
        Box::new(engine),
    )
    .with_encoder(build_encoder(&config, args.out.as_deref())?)
    .with_abort_signal(Box::new(abort.clone()));

    if let Some(duration) = duration {
        let timer = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            timer.raise();
        });
    }

    eprintln!("Listening... press Ctrl-C to stop");
    run_to_completion(pipeline).await
}

async fn run_replay(config: Config, wav: PathBuf, args: RunArgs) -> Result<()> {
    let mut config = apply_run_args(config, &args, AudioInput::Wav)?;
    let engine = load_engine(&config)?;
    let shape = engine.input_shape();

    let source = WavAudioSource::open(&wav, config.pipeline.frame_samples)
        .with_context(|| format!("opening {}", wav.display()))?;
    let available = replay_inferences(
        source.frame_count(),
        shape.frames as u64,
        config.pipeline.refresh,
    );
    if available == 0 {
        bail!(
            "{} holds {} frames, fewer than one {}-frame window",
            wav.display(),
            source.frame_count(),
            shape.frames
        );
    }
    config.pipeline.max_inferences = Some(
        config
            .pipeline
            .max_inferences
            .map_or(available, |limit| limit.min(available)),
    );

    let abort = abort_on_ctrl_c();
    let pipeline = Pipeline::new(
        config.pipeline_config(),
        Box::new(source),
        Box::new(LogEnergyExtractor::new(shape.features)),
        Box::new(engine),
    )
    .with_encoder(build_encoder(&config, args.out.as_deref())?)
    .with_abort_signal(Box::new(abort));

    run_to_completion(pipeline).await
}

async fn run_serve(config: Config, port: Option<PathBuf>, args: RunArgs) -> Result<()> {
    let config = apply_run_args(config, &args, AudioInput::Host)?;
    let engine = load_engine(&config)?;
    let features = engine.input_shape().features;
    let format = config.wire_format();

    let link = SharedChannel::new(open_host_link(port.as_deref(), format)?);
    let source = HostAudioSource::new(
        link.clone(),
        config.pipeline.frame_samples,
        format.byte_order,
    );

    let pipeline = Pipeline::new(
        config.pipeline_config(),
        Box::new(source),
        Box::new(LogEnergyExtractor::new(features)),
        Box::new(engine),
    )
    .with_encoder(StreamEncoder::new(Box::new(link), format))
    .with_abort_signal(Box::new(abort_on_ctrl_c()));

    let port_name = port.map_or_else(|| "stdio".to_string(), |p| p.display().to_string());
    info!(port = %port_name, checksum = format.checksum, "serving host-fed pipeline");
    run_to_completion(pipeline).await
}

type HostLink = IoChannel<Box<dyn Write + Send>>;

/// Open the bidirectional host link: a device node, or stdin/stdout.
fn open_host_link(port: Option<&Path>, format: WireFormat) -> Result<HostLink> {
    let link = match port {
        Some(path) => {
            let device = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .with_context(|| format!("opening host link {}", path.display()))?;
            let reader = device.try_clone().context("duplicating host link handle")?;
            let writer: Box<dyn Write + Send> = Box::new(device);
            IoChannel::new(writer, format).with_reader(Box::new(reader))
        }
        None => {
            let writer: Box<dyn Write + Send> = Box::new(std::io::stdout());
            IoChannel::new(writer, format).with_reader(Box::new(std::io::stdin()))
        }
    };
    Ok(link.with_flush_each_frame())
}

fn abort_on_ctrl_c() -> AbortFlag {
    let abort = AbortFlag::new();
    let ctrl_c = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.raise();
        }
    });
    abort
}

/// Inferences a file of `frames` frames supports without reading past its end.
fn replay_inferences(frames: u64, window: u64, refresh: RefreshPolicy) -> u64 {
    if window == 0 || frames < window {
        return 0;
    }
    match refresh {
        RefreshPolicy::Shift => frames - window + 1,
        RefreshPolicy::Block => frames / window,
    }
}

/// Decode a recorded link stream, optionally exporting raw audio as WAV.
fn decode_capture(capture: &Path, wav: Option<&Path>, checksum: bool) -> Result<()> {
    let bytes = std::fs::read(capture)
        .with_context(|| format!("reading capture {}", capture.display()))?;
    let format = WireFormat {
        byte_order: defaults::WIRE_BYTE_ORDER,
        checksum,
    };

    let mut decoder = FrameDecoder::new(format);
    decoder.push(&bytes);

    let mut audio: Vec<i16> = Vec::new();
    let mut index = 0usize;
    while let Some(frame) = decoder.next_frame()? {
        println!("{:>6}  {}", index, describe_frame(&frame, format)?);
        if frame.tag == StreamTag::RawAudio {
            audio.extend(frame.as_i16(format.byte_order)?);
        }
        index += 1;
    }

    if decoder.buffered() > 0 {
        eprintln!(
            "{} {} trailing bytes do not form a complete frame",
            "Warning:".yellow(),
            decoder.buffered()
        );
    }

    if let Some(path) = wav {
        if audio.is_empty() {
            eprintln!("No raw audio frames in capture; {} not written", path.display());
        } else {
            write_wav(path, &audio)?;
            eprintln!(
                "Wrote {} samples ({:.1}s) to {}",
                audio.len(),
                audio.len() as f64 / defaults::SAMPLE_RATE as f64,
                path.display()
            );
        }
    }

    Ok(())
}

fn describe_frame(frame: &StreamFrame, format: WireFormat) -> Result<String> {
    let name = format!("{:?}", frame.tag);
    let line = match frame.tag {
        StreamTag::Ready => format!("{}", name.dimmed()),
        StreamTag::RawAudio => format!("{}  {} samples", name.cyan(), frame.element_count),
        StreamTag::FeatureWindow | StreamTag::HostFeatureWindow => {
            format!("{}  {} values", name.blue(), frame.element_count)
        }
        StreamTag::InferenceOutput | StreamTag::HostInferenceOutput => {
            let result = InferenceResult::from_values(frame.as_f32(format.byte_order)?);
            format!(
                "{}  {} values, max {:.3} at {}",
                name.green(),
                frame.element_count,
                result.max_value,
                result.max_index
            )
        }
    };
    Ok(line)
}

#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    let devices = kwspot::audio::capture::list_devices()?;

    if devices.is_empty() {
        eprintln!("No audio input devices found");
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}
