//! cane-scan - one-shot object scan through the cloud vision model.
//!
//! Reads a JPEG (or grabs one frame from the configured source), asks the
//! model what it shows and speaks the answer through the log voice.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use smart_cane::cloud::GeminiClient;
use smart_cane::{open_source, CaneConfig, LogVoice, ObjectScanner, Speaker};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Describe a photo with the cloud vision model and speak the answer"
)]
struct Args {
    /// JPEG to analyze. Without it, one frame is taken from the configured source.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Override the configured prompt.
    #[arg(long, env = "CANE_GEMINI_PROMPT")]
    prompt: Option<String>,

    /// Print the answer as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = CaneConfig::load().context("load configuration")?;
    let mut settings = cfg.cloud()?;
    if let Some(prompt) = args.prompt {
        settings.prompt = prompt;
    }

    let scanner = ObjectScanner::new(GeminiClient::new(settings), Speaker::new(LogVoice::new()))
        .with_jpeg_quality(cfg.jpeg_quality);

    let answer = match &args.image {
        Some(path) => scanner.scan_file(path)?,
        None => {
            let mut source = open_source(&cfg.source)?;
            source.connect()?;
            let frame = source
                .next_frame()?
                .ok_or_else(|| anyhow!("source {} produced no frame", cfg.source.url))?;
            source.disconnect();
            scanner.scan_frame(&frame)?
        }
    };

    if args.json {
        println!("{}", serde_json::json!({ "answer": answer }));
    } else {
        println!("{}", answer);
    }
    Ok(())
}
