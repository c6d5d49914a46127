//! Command-line and environment configuration.
//!
//! Flags are parsed into [`AssistantCliArgs`] and validated once into an
//! [`AssistantConfig`] that the rest of the binary reads without re-checking.

use std::{net::IpAddr, path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::Parser;

use crate::stream::CaptureSettings;

const DEFAULT_PROMPT: &str = "Eres un asistente de visión. A partir del mensaje del usuario decide \
si hay que detectar objetos en la cámara y qué clases buscar.";

/// Live camera stream with a chat relay to an analysis service.
#[derive(Debug, Parser)]
#[command(name = "vision-assistant", version)]
pub(crate) struct AssistantCliArgs {
    /// Camera index, `/dev/videoN`, file or stream URI, or `testsrc`.
    #[arg(long, env = "ASSISTANT_SOURCE", default_value = "0", value_name = "URI")]
    pub(crate) source: String,
    /// Capture width in pixels.
    #[arg(long, env = "ASSISTANT_WIDTH", default_value_t = 640, value_name = "PX")]
    pub(crate) width: i32,
    /// Capture height in pixels.
    #[arg(long, env = "ASSISTANT_HEIGHT", default_value_t = 480, value_name = "PX")]
    pub(crate) height: i32,
    /// Target capture rate.
    #[arg(long, env = "ASSISTANT_FPS", default_value_t = 30)]
    pub(crate) fps: u32,
    /// JPEG quality used by the encoder (1-100).
    #[arg(long = "jpeg-quality", env = "ASSISTANT_JPEG_QUALITY", default_value_t = 85, value_name = "QUALITY")]
    pub(crate) jpeg_quality: i32,
    /// Consecutive failed reads tolerated before the camera is dropped.
    #[arg(long = "read-retries", env = "ASSISTANT_READ_RETRIES", default_value_t = 3, value_name = "N")]
    pub(crate) read_retries: u32,
    /// Back-off unit between read retries.
    #[arg(long = "retry-backoff-ms", env = "ASSISTANT_RETRY_BACKOFF_MS", default_value_t = 50, value_name = "MS")]
    pub(crate) retry_backoff_ms: u64,
    /// Address the HTTP server binds to.
    #[arg(long, env = "ASSISTANT_BIND", default_value = "0.0.0.0")]
    pub(crate) bind: IpAddr,
    #[arg(long, env = "ASSISTANT_PORT", default_value_t = 5000)]
    pub(crate) port: u16,
    /// Analysis service endpoint. Without it, messages are acknowledged locally.
    #[arg(long = "analysis-url", env = "ASSISTANT_ANALYSIS_URL", value_name = "URL")]
    pub(crate) analysis_url: Option<String>,
    #[arg(long = "analysis-timeout-secs", env = "ASSISTANT_ANALYSIS_TIMEOUT_SECS", default_value_t = 10, value_name = "SECS")]
    pub(crate) analysis_timeout_secs: u64,
    /// File the detector polls for the classes to look for.
    #[arg(long = "label-file", env = "ASSISTANT_LABEL_FILE", default_value = "label.txt", value_name = "PATH")]
    pub(crate) label_file: PathBuf,
    /// Analysis prompt used until the service replaces it.
    #[arg(long, env = "ASSISTANT_PROMPT", default_value = DEFAULT_PROMPT)]
    pub(crate) prompt: String,
}

#[derive(Clone, Debug)]
pub(crate) struct AssistantConfig {
    pub(crate) source: String,
    pub(crate) width: i32,
    pub(crate) height: i32,
    pub(crate) frame_interval: Duration,
    pub(crate) jpeg_quality: u8,
    pub(crate) read_retries: u32,
    pub(crate) retry_backoff: Duration,
    pub(crate) bind: IpAddr,
    pub(crate) port: u16,
    pub(crate) analysis_url: Option<String>,
    pub(crate) analysis_timeout: Duration,
    pub(crate) label_file: PathBuf,
    pub(crate) prompt: String,
}

impl TryFrom<AssistantCliArgs> for AssistantConfig {
    type Error = anyhow::Error;

    fn try_from(args: AssistantCliArgs) -> Result<Self> {
        let source = args.source.trim().to_string();
        if source.is_empty() {
            bail!("--source must not be empty");
        }
        if args.width <= 0 || args.height <= 0 {
            bail!("Capture width and height must be positive integers");
        }
        if args.fps == 0 || args.fps > 240 {
            bail!("--fps must be between 1 and 240");
        }
        let jpeg_quality = match u8::try_from(args.jpeg_quality) {
            Ok(quality) if (1..=100).contains(&quality) => quality,
            _ => bail!("--jpeg-quality must be an integer between 1 and 100"),
        };
        if args.analysis_timeout_secs == 0 {
            bail!("--analysis-timeout-secs must be at least 1");
        }

        let analysis_url = args
            .analysis_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        if let Some(url) = &analysis_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("--analysis-url must be an http(s) URL, got {url}");
            }
        }

        Ok(Self {
            source,
            width: args.width,
            height: args.height,
            frame_interval: Duration::from_secs(1) / args.fps,
            jpeg_quality,
            read_retries: args.read_retries,
            retry_backoff: Duration::from_millis(args.retry_backoff_ms),
            bind: args.bind,
            port: args.port,
            analysis_url,
            analysis_timeout: Duration::from_secs(args.analysis_timeout_secs),
            label_file: args.label_file,
            prompt: args.prompt,
        })
    }
}

impl AssistantConfig {
    pub(crate) fn from_env() -> Result<Self> {
        AssistantCliArgs::parse().try_into()
    }

    pub(crate) fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            frame_interval: self.frame_interval,
            max_read_retries: self.read_retries,
            retry_backoff: self.retry_backoff,
            jpeg_quality: self.jpeg_quality,
        }
    }

    pub(crate) fn target_fps(&self) -> f64 {
        1.0 / self.frame_interval.as_secs_f64()
    }
}
