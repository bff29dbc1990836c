use std::env;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::anyhow;
use futures::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use minimax_tts::{AudioEvent, ClientConfig, MinimaxTTS};

const USAGE: &str = "Usage: minimax-tts [--config FILE] [--output FILE] [TEXT...]\n\
                     Reads TEXT from stdin when none is given; writes raw 16-bit PCM.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Parse arguments
    let mut config_path: Option<PathBuf> = None;
    let mut output: Option<PathBuf> = None;
    let mut words: Vec<String> = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a file path"))?;
                config_path = Some(PathBuf::from(path));
            }
            "-o" | "--output" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow!("--output requires a file path"))?;
                output = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                return Ok(());
            }
            other if other.starts_with('-') => {
                anyhow::bail!("Unknown option '{other}'\n{USAGE}");
            }
            _ => words.push(arg),
        }
    }

    // Load configuration
    let config = match &config_path {
        Some(path) => ClientConfig::from_file(path),
        None => ClientConfig::from_env(),
    }
    .map_err(|e| anyhow!(e.to_string()))?;

    let text = if words.is_empty() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        words.join(" ")
    };
    if text.trim().is_empty() {
        anyhow::bail!("No text to synthesize\n{USAGE}");
    }

    let tts = MinimaxTTS::from_config(&config)?;
    info!(
        "Synthesizing {} characters at {} Hz, {} channel(s)",
        text.chars().count(),
        tts.sample_rate(),
        tts.num_channels()
    );

    let mut stream = tts.stream()?;
    stream.push_text(&text)?;
    stream.end_input();

    let mut sink: Box<dyn Write> = match &output {
        Some(path) => Box::new(io::BufWriter::new(fs::File::create(path).map_err(|e| {
            anyhow!("Failed to create {}: {e}", path.display())
        })?)),
        None => Box::new(io::BufWriter::new(io::stdout().lock())),
    };

    let mut failure = None;
    while let Some(event) = stream.next().await {
        match event {
            Ok(AudioEvent::Frame(frame)) => sink.write_all(&frame.data)?,
            Ok(AudioEvent::TokenError { token_index, error }) => {
                warn!("Token {token_index:?} failed: {error}");
            }
            Ok(AudioEvent::SegmentEnd { .. }) => {}
            Err(e) => failure = Some(e),
        }
    }
    sink.flush()?;

    info!("{}", stream.metrics().summary());
    tts.aclose().await;

    if let Some(e) = failure {
        return Err(e.into());
    }
    if let Some(path) = output {
        info!("Audio written to {}", path.display());
    }
    Ok(())
}
