use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use chrono::Local;
use clap::{Parser, Subcommand};
use log::info;
use vmcore::attachment::UrlFileMetaService;
use vmcore::render::WaveformRenderer;
use vmcore::waveform::generate_waveform_data;
use voicemsg::cache::AttachmentCache;
use voicemsg::compress::{calculate_compression_ratio, compress_audio_to_mp3, get_audio_info};
use voicemsg::config::VoiceConfig;
use voicemsg_ureq_http_client::UreqHttpClient;

#[derive(Parser)]
#[command(name = "voicemsg")]
#[command(about = "Voice message toolkit: compression, waveforms and the attachment cache")]
struct Cli {
    /// JSON config file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress an audio file to MP3 for upload.
    Compress {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        bit_rate: Option<u32>,
        #[arg(long)]
        sample_rate: Option<u32>,
        #[arg(long)]
        channels: Option<u16>,
    },
    /// Print duration, sample rate, channels and size.
    Info { input: PathBuf },
    /// Print waveform intensities as JSON, optionally rendering a PNG.
    Waveform {
        input: PathBuf,
        #[arg(long)]
        png: Option<PathBuf>,
    },
    /// Download a voice attachment into the per-user cache.
    Fetch { url: String },
    /// Play a voice attachment URL or a local audio file.
    #[cfg(feature = "audio-output")]
    Play { input: String },
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => VoiceConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => VoiceConfig::default(),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(async {
        match cli.command {
            Commands::Compress {
                input,
                output,
                bit_rate,
                sample_rate,
                channels,
            } => {
                let mut compression = config.compression;
                compression.bit_rate = bit_rate.unwrap_or(compression.bit_rate);
                compression.sample_rate = sample_rate.unwrap_or(compression.sample_rate);
                compression.channels = channels.unwrap_or(compression.channels);
                compress(&input, &output, compression).await
            }
            Commands::Info { input } => {
                let info = get_audio_info(read(&input).await?).await?;
                println!("{}", serde_json::to_string_pretty(&info)?);
                Ok(())
            }
            Commands::Waveform { input, png } => waveform(&input, png.as_deref(), &config).await,
            Commands::Fetch { url } => fetch(&url, &config).await,
            #[cfg(feature = "audio-output")]
            Commands::Play { input } => play(&input, &config).await,
        }
    })
}

async fn read(path: &Path) -> Result<Bytes, anyhow::Error> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(Bytes::from(bytes))
}

async fn compress(
    input: &Path,
    output: &Path,
    compression: vmcore::compress::CompressionConfig,
) -> Result<(), anyhow::Error> {
    let original = read(input).await?;
    let original_len = original.len() as u64;
    let mp3 = compress_audio_to_mp3(original, compression).await?;
    tokio::fs::write(output, &mp3)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    info!(
        "Wrote {} ({} -> {} bytes, {}% smaller)",
        output.display(),
        original_len,
        mp3.len(),
        calculate_compression_ratio(original_len, mp3.len() as u64)
    );
    Ok(())
}

async fn waveform(
    input: &Path,
    png: Option<&Path>,
    config: &VoiceConfig,
) -> Result<(), anyhow::Error> {
    let bytes = read(input).await?;
    let duration = get_audio_info(bytes.clone()).await?.duration;
    let seed = input.to_string_lossy().into_owned();
    let data = generate_waveform_data(&bytes, duration, &seed);
    println!("{}", serde_json::to_string(&data)?);

    if let Some(png) = png {
        let mut renderer =
            WaveformRenderer::new(duration, config.waveform.height, config.waveform.colors()?);
        renderer.set_waveform_data(data);
        renderer
            .frame()
            .save(png)
            .with_context(|| format!("writing {}", png.display()))?;
        info!("Rendered waveform to {}", png.display());
    }
    Ok(())
}

async fn fetch(url: &str, config: &VoiceConfig) -> Result<(), anyhow::Error> {
    let cache = AttachmentCache::new(
        config.cache_layout(),
        Arc::new(UreqHttpClient::new()),
        Arc::new(UrlFileMetaService),
    );
    let bytes = cache.load_audio_bytes(url).await?;
    let status = cache.exists_audio_file(url).await?;
    println!("{} ({} bytes)", status.full_path.display(), bytes.len());
    Ok(())
}

#[cfg(feature = "audio-output")]
async fn play(input: &str, config: &VoiceConfig) -> Result<(), anyhow::Error> {
    use vmcore::playback::{PlaybackArbiter, PlaybackController, PlaybackSource};
    use voicemsg::player::CpalBackend;

    let source = if Path::new(input).is_file() {
        PlaybackSource::Local {
            bytes: read(Path::new(input)).await?,
            mime_type: String::new(),
        }
    } else {
        let cache = AttachmentCache::new(
            config.cache_layout(),
            Arc::new(UreqHttpClient::new()),
            Arc::new(UrlFileMetaService),
        );
        cache.load_audio_bytes(input).await?;
        cache.get_audio_url(input).await?
    };

    let arbiter = PlaybackArbiter::new();
    let mut controller = PlaybackController::new(arbiter.clone());
    controller
        .create_audio_element(&source, input, 0.0, &CpalBackend)
        .with_context(|| format!("opening audio for {input}"))?;
    controller.toggle_playback()?;
    info!("Playing {input} ({:.1}s)", controller.duration());

    while controller.is_playing() {
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    }
    info!("Playback finished: {:?}", controller.state());

    controller.cleanup();
    arbiter.shutdown();
    Ok(())
}
