//! Encrypted inference CLI: encrypt → evaluate → decrypt over a file of
//! amino-acid sequences.

use std::path::PathBuf;

use clap::Parser;
use eyre::{eyre, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cryptein::bootstrap::PooledBootstrapper;
use cryptein::matrix::Dense;
use cryptein::model::{argmax, precision, tokenize, Client, ModelWeights, PipelineConfig, Server};
use cryptein::rlwe::KeyGenerator;

#[derive(Parser, Debug)]
#[command(name = "infer", about = "Encrypted amino-acid sequence classification")]
struct Args {
    /// Input file: one amino-acid sequence per line.
    #[arg(short, long, default_value = "./data/example_AA_sequences.list")]
    input: PathBuf,

    /// Directory holding the model weight CSV files.
    #[arg(short, long, default_value = "./weights")]
    weights: PathBuf,

    /// Output CSV of per-class logits, one row per sample.
    #[arg(short, long, default_value = "./result/pred_enc.csv")]
    output: PathBuf,

    /// Verbose per-stage logging.
    #[arg(long)]
    debug: bool,

    /// Use the secret-key (dummy) bootstrapper instead of a production
    /// refresh circuit.
    #[arg(long)]
    dummy_bootstrapping: bool,

    /// Also run the plaintext model and report accuracy/noise.
    #[arg(long)]
    verify: bool,
}

fn main() -> eyre::Result<()> {
    let args = Args::parse();

    let filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    let mut config = PipelineConfig::full();
    let start = std::time::Instant::now();

    let text = std::fs::read_to_string(&args.input)
        .wrap_err_with(|| format!("reading {}", args.input.display()))?;
    let sequences: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if sequences.is_empty() {
        return Err(eyre!("no sequences in {}", args.input.display()));
    }
    config.nb_samples = sequences.len().min(config.nb_samples);

    let weights = ModelWeights::load(&args.weights, config.rows, config.cols, config.classes)
        .wrap_err("loading weights")?;

    let mut kgen = KeyGenerator::new(cryptein::Params::from_literal(config.params.clone())?);
    let sk = kgen.gen_secret_key();

    let mut client = Client::new(config.clone(), &sk)?;
    info!(
        log_n = config.params.log_n,
        levels = config.params.log_q.len(),
        slots = client.params().max_slots(),
        "parameters ready"
    );

    let tokens: Vec<Dense> = sequences[..config.nb_samples]
        .iter()
        .map(|s| tokenize(s, config.rows, config.cols))
        .collect::<cryptein::Result<_>>()?;

    let km = client.key_manager(&sk);
    let mut server = Server::new(config.clone(), weights, km)?;

    if !args.dummy_bootstrapping {
        return Err(eyre!(
            "no production bootstrapping circuit is wired in this build; run with --dummy-bootstrapping"
        ));
    }
    let mut btp = PooledBootstrapper::dummy(
        config.num_cpu,
        client.params(),
        &sk,
        config.level_bootstrapping,
    );

    let cts = client.encrypt_new(&tokens)?;
    info!(ciphertexts = cts.len(), "encrypted input");

    let out = server.run_encrypted(cts, &mut btp)?;
    let results = client.decrypt_results(&out)?;

    if let Some(parent) = args.output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut csv = String::new();
    for r in &results {
        let row: Vec<String> = r.data().iter().map(|v| format!("{v:.16}")).collect();
        csv.push_str(&row.join(","));
        csv.push('\n');
    }
    std::fs::write(&args.output, csv)?;
    info!(elapsed = ?start.elapsed(), output = %args.output.display(), "done");

    if args.verify {
        let plain = server.run_exact(&tokens);
        let (accuracy, noise) = precision(&results, &plain);
        info!(accuracy, noise, "plaintext verification");
        for (i, (enc, pt)) in results.iter().zip(plain.iter()).enumerate() {
            if argmax(enc.data()) != argmax(pt.data()) {
                info!(sample = i, "argmax mismatch");
            }
        }
    }

    Ok(())
}
