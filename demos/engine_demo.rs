//! groupmind-rs demo CLI: feeds stdin lines through an [`Engine`], printing
//! metrics as JSON lines.
//!
//! Illustrative plumbing only: whitespace tokens are hashed into identity
//! ids as a stand-in for a real external tokenizer. Not part of the core's
//! test surface.

use std::io::{self, BufRead};

use clap::Parser;
use groupmind_rs::core::config::EngineConfig;
use groupmind_rs::engine::{Engine, StepOptions};
use groupmind_rs::Bitset;
use xxhash_rust::xxh3::xxh3_64;

#[derive(Parser, Debug)]
#[command(name = "engine-demo", about = "Feed stdin lines through a groupmind-rs engine")]
struct Args {
    /// Path to a YAML config file; defaults to `EngineConfig::default()`.
    #[arg(long)]
    config: Option<String>,

    /// Disable learning; just observe predictions and surprise.
    #[arg(long)]
    no_learn: bool,

    /// Reward applied to every step.
    #[arg(long, default_value_t = 1.0)]
    reward: f64,
}

fn tokenize(line: &str, universe_size: u32) -> Bitset {
    let mut bitset = Bitset::new(universe_size);
    for token in line.split_whitespace() {
        let id = (xxh3_64(token.as_bytes()) % universe_size as u64) as u32;
        let _ = bitset.add(id);
    }
    bitset
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::from_yaml_file(path)?,
        None => EngineConfig::default(),
    };
    config.validate()?;

    let mut engine = Engine::new(config);
    let universe_size = engine.universe_size();
    let options = StepOptions { learn: !args.no_learn, reward: args.reward };

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let input = tokenize(&line, universe_size);
        let metrics = engine.process(&input, options);
        println!("{}", serde_json::to_string(&metrics)?);
    }

    Ok(())
}
