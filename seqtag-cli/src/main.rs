//! Command-line driver for the sequence tagger: `train` and `tag`.

mod io;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use seqtag_core::decode::beam_search;
use seqtag_core::train::{token_error_rate, TrainConfig, Trainer};
use seqtag_core::{Hash64, WeightVector};
use tracing::info;

/// Beam width the external tagger runs with (spec §4.3: "the tagger
/// runs with B fixed at a small constant, typically 4-8").
const DEFAULT_BEAM_WIDTH: usize = 4;

#[derive(Parser)]
#[command(name = "seqtag", about = "Hashed-feature averaged perceptron sequence tagger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a model from a training set and a tuning set.
    Train {
        train: PathBuf,
        tune: PathBuf,
        model: PathBuf,
        #[arg(long, default_value_t = 20)]
        max_epochs: usize,
        #[arg(long, default_value_t = 5)]
        max_patience: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 0.0)]
        dropout_rate: f64,
    },
    /// Tag an input file (or `-` for stdin) with a trained model.
    Tag {
        input: PathBuf,
        model: PathBuf,
        /// Input carries a gold-tag column; report the token error rate.
        #[arg(long)]
        evaluate: bool,
        /// Beam width for decoding. 1 degenerates to greedy search.
        #[arg(long, default_value_t = DEFAULT_BEAM_WIDTH)]
        beam_width: usize,
    },
}

fn open_input(path: &std::path::Path) -> Result<Box<dyn std::io::BufRead>> {
    if path == std::path::Path::new("-") {
        Ok(Box::new(BufReader::new(std::io::stdin())))
    } else {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Train { train, tune, model, max_epochs, max_patience, seed, dropout_rate } => {
            let train_file = File::open(&train).with_context(|| format!("opening {}", train.display()))?;
            let tune_file = File::open(&tune).with_context(|| format!("opening {}", tune.display()))?;
            let train_sentences = io::read_sentences(BufReader::new(train_file), true)?;
            let tune_sentences = io::read_sentences(BufReader::new(tune_file), true)?;
            info!(
                train_sentences = train_sentences.len(),
                tune_sentences = tune_sentences.len(),
                "loaded training data"
            );

            let config = TrainConfig { max_epochs, max_patience, seed, dropout_rate, ..TrainConfig::default() };
            let trainer: Trainer<Hash64> = Trainer::new(config);
            let (weights, weights_len) =
                trainer.train_with_sweep(&train_sentences, &tune_sentences, Some(&model));
            info!(weights_len, "training complete");

            weights.write(&model).with_context(|| format!("writing {}", model.display()))?;
            Ok(())
        }
        Command::Tag { input, model, evaluate, beam_width } => {
            let weights = WeightVector::read(&model).with_context(|| format!("reading {}", model.display()))?;
            let reader = open_input(&input)?;
            let sentences = io::read_sentences(reader, evaluate)?;

            let stdout = std::io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            for sentence in &sentences {
                let labels = beam_search::<Hash64>(weights.as_slice(), sentence, beam_width.max(1), None);
                io::write_tagged(&mut writer, sentence, &labels)?;
            }

            if evaluate {
                let error = token_error_rate::<Hash64>(&weights, &sentences, beam_width.max(1));
                eprintln!("token error rate: {:.4}", error);
            }
            Ok(())
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
