//! Application entry point: studio-live.
//!
//! # Startup sequence
//!
//! 1. Parse the command line ([`Cli`]); `--help` and usage errors exit here.
//! 2. Initialise logging.
//! 3. Load [`AppConfig`] from disk (defaults on first run, API key from the
//!    environment when not stored).
//! 4. Run the command.  `live` acquires the microphone and speakers, opens a
//!    session and runs until Ctrl-C or until the session ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use studio_live::{
    audio::AudioCapture,
    codec::decode_pcm16,
    config::{AppConfig, AppPaths},
    pipeline::{LivePipeline, PipelineCommand, PipelineState},
    playback::{CpalSink, PlaybackScheduler},
    service::{
        AspectRatio, GeminiClient, GenerationSettings, ImageInput, ImageSize, ModelService,
    },
    session::GeminiLiveChannel,
};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "studio-live")]
#[command(about = "Live voice sessions and model tools for Nexus Studio")]
struct Cli {
    /// Defaults to `live` when omitted.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
enum Command {
    /// Talk to the model through the microphone until Ctrl-C.
    Live,

    /// Speak a line of text through the speakers.
    Say { text: String },

    /// Send one chat message and print the reply.
    Chat {
        message: String,

        /// Ground the answer with web search.
        #[arg(long)]
        search: bool,

        /// Ground the answer with maps data.
        #[arg(long)]
        maps: bool,

        /// Let the model think before answering.
        #[arg(long)]
        think: bool,
    },

    /// Generate an image and save it.
    Image {
        prompt: String,
        out: String,

        #[arg(long, default_value = "16:9")]
        aspect: AspectRatio,

        /// 1K, 2K or 4K.
        #[arg(long, default_value = "1K")]
        size: ImageSize,
    },

    /// Generate a video (optionally from a reference image) and save it.
    Video {
        prompt: String,
        out: String,

        /// 16:9 or 9:16.
        #[arg(long, default_value = "16:9", value_parser = video_aspect)]
        aspect: AspectRatio,

        /// Reference image to animate.
        #[arg(long)]
        image: Option<PathBuf>,
    },

    /// Transcribe an audio file.
    Transcribe {
        path: PathBuf,

        /// MIME type, when the extension does not tell.
        #[arg(long)]
        mime: Option<String>,
    },
}

fn video_aspect(s: &str) -> Result<AspectRatio, String> {
    let ratio: AspectRatio = s.parse()?;
    if ratio.is_video_supported() {
        Ok(ratio)
    } else {
        Err("video supports 16:9 or 9:16".into())
    }
}

/// Guess a MIME type from a file extension.
fn mime_from_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "wav" => "audio/wav",
        "mp3" => "audio/mp3",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "webm" => "audio/webm",
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Sender that fires [`PipelineCommand::Stop`] on the first Ctrl-C.
fn stop_on_ctrl_c() -> mpsc::UnboundedReceiver<PipelineCommand> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl-C received, stopping");
            let _ = tx.send(PipelineCommand::Stop);
        }
    });
    rx
}

async fn run_live(config: &AppConfig) -> Result<()> {
    let capture = AudioCapture::new(config.audio.input_device.as_deref())?;
    let sink = CpalSink::new(config.audio.output_device.as_deref())?;
    let channel = Arc::new(GeminiLiveChannel::from_config(&config.service, &config.live));

    let mut pipeline = LivePipeline::new(config, capture, sink, channel);
    let mut commands = stop_on_ctrl_c();

    pipeline.start()?;
    println!("Listening. Press Ctrl-C to stop.");
    let stats = pipeline.run(&mut commands).await;
    println!("Session ended: {stats}");

    if pipeline.state() == PipelineState::Error {
        bail!(
            "live session failed: {}",
            pipeline.last_error().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn run_say(config: &AppConfig, service: &GeminiClient, text: &str) -> Result<()> {
    let pcm = service.generate_speech(text).await?;
    let rate = config.audio.playback_sample_rate;
    let buffer = decode_pcm16(&pcm, rate, 1)?;

    let sink = CpalSink::new(config.audio.output_device.as_deref())?;
    let mut scheduler = PlaybackScheduler::new(sink, rate);
    let handle = scheduler.schedule(buffer);
    log::info!("say: playing {:.1}s of speech", handle.duration);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    while scheduler.remaining() > 0.0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = &mut ctrl_c => {
                scheduler.interrupt();
                break;
            }
        }
    }
    Ok(())
}

async fn write_output(paths: &AppPaths, out: &str, bytes: &[u8]) -> Result<PathBuf> {
    let path = paths.resolve_output(out);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

async fn run(command: Command, config: AppConfig) -> Result<()> {
    let paths = AppPaths::new();
    let service = GeminiClient::from_config(&config.service);

    match command {
        Command::Live => run_live(&config).await?,
        Command::Say { text } => run_say(&config, &service, &text).await?,
        Command::Chat {
            message,
            search,
            maps,
            think,
        } => {
            let settings = GenerationSettings {
                use_search: search,
                use_maps: maps,
                thinking_mode: think,
                ..GenerationSettings::default()
            };
            let reply = service.chat(&[], &message, &settings).await?;
            if let Some(thinking) = &reply.thinking {
                println!("[thinking]\n{thinking}\n");
            }
            println!("{}", reply.text);
            for source in &reply.sources {
                println!("  - {} <{}>", source.title, source.uri);
            }
        }
        Command::Image {
            prompt,
            out,
            aspect,
            size,
        } => {
            let settings = GenerationSettings {
                aspect_ratio: aspect,
                image_size: size,
                ..GenerationSettings::default()
            };
            let image = service.generate_image(&prompt, &settings).await?;
            let path = write_output(&paths, &out, &image.bytes).await?;
            println!("Saved {} ({}) to {}", image.mime_type, image.bytes.len(), path.display());
        }
        Command::Video {
            prompt,
            out,
            aspect,
            image,
        } => {
            let reference = match image {
                Some(path) => Some(ImageInput {
                    mime_type: mime_from_path(&path).unwrap_or("image/png").into(),
                    bytes: tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?,
                }),
                None => None,
            };
            println!("Generating video, this can take a few minutes...");
            let bytes = service
                .generate_video(&prompt, reference.as_ref(), aspect)
                .await?;
            let path = write_output(&paths, &out, &bytes).await?;
            println!("Saved video to {}", path.display());
        }
        Command::Transcribe { path, mime } => {
            let mime = mime
                .or_else(|| mime_from_path(&path).map(str::to_string))
                .ok_or_else(|| anyhow!("cannot tell the audio type of {}, pass --mime", path.display()))?;
            let audio = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            println!("{}", service.transcribe_audio(&audio, &mime).await?);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Command line
    let cli = Cli::parse();

    // 2. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 3. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 4. Run
    run(cli.command.unwrap_or(Command::Live), config).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<Command>, clap::Error> {
        let argv = std::iter::once("studio-live").chain(args.iter().copied());
        Cli::try_parse_from(argv).map(|cli| cli.command)
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn no_arguments_means_live() {
        assert_eq!(parse(&[]).unwrap(), None);
        assert_eq!(parse(&["live"]).unwrap(), Some(Command::Live));
    }

    #[test]
    fn chat_flags() {
        let cmd = parse(&["chat", "hi", "--search", "--think"]).unwrap();
        assert_eq!(
            cmd,
            Some(Command::Chat {
                message: "hi".into(),
                search: true,
                maps: false,
                think: true,
            })
        );
    }

    #[test]
    fn image_options() {
        let cmd = parse(&["image", "castle", "c.png", "--aspect", "3:4", "--size", "2k"]).unwrap();
        let Some(Command::Image {
            out, aspect, size, ..
        }) = cmd
        else {
            panic!("expected image");
        };
        assert_eq!(out, "c.png");
        assert_eq!(aspect, AspectRatio::Portrait3x4);
        assert_eq!(size, ImageSize::TwoK);
    }

    #[test]
    fn image_defaults() {
        let Some(Command::Image { aspect, size, .. }) = parse(&["image", "a", "b"]).unwrap() else {
            panic!("expected image");
        };
        assert_eq!(aspect, AspectRatio::Landscape16x9);
        assert_eq!(size, ImageSize::OneK);
    }

    #[test]
    fn video_rejects_square() {
        assert!(parse(&["video", "waves", "w.mp4", "--aspect", "1:1"]).is_err());
        let cmd = parse(&["video", "waves", "w.mp4", "--image", "ref.jpg"]).unwrap();
        assert_eq!(
            cmd,
            Some(Command::Video {
                prompt: "waves".into(),
                out: "w.mp4".into(),
                aspect: AspectRatio::Landscape16x9,
                image: Some(PathBuf::from("ref.jpg")),
            })
        );
    }

    #[test]
    fn transcribe_mime_override() {
        let cmd = parse(&["transcribe", "memo.bin", "--mime", "audio/ogg"]).unwrap();
        assert_eq!(
            cmd,
            Some(Command::Transcribe {
                path: PathBuf::from("memo.bin"),
                mime: Some("audio/ogg".into()),
            })
        );
    }

    #[test]
    fn errors() {
        assert!(parse(&["say"]).is_err());
        assert!(parse(&["chat", "a", "--bogus"]).is_err());
        assert!(parse(&["image", "a", "b", "--aspect"]).is_err());
        assert!(parse(&["image", "a", "b", "--size", "8K"]).is_err());
        assert!(parse(&["dance"]).is_err());
    }

    #[test]
    fn mime_guessing() {
        assert_eq!(mime_from_path(Path::new("a.JPG")), Some("image/jpeg"));
        assert_eq!(mime_from_path(Path::new("clip.wav")), Some("audio/wav"));
        assert_eq!(mime_from_path(Path::new("noext")), None);
    }
}
