//! basalt-bench — tiny benchmarking and poking tool for a basalt database.
//!
//! ```text
//! basalt-bench gen   --dir /tmp/basalt --count 1000000 --key-size 10 --val-size 100
//! basalt-bench read  --dir /tmp/basalt --key hello
//! basalt-bench write --dir /tmp/basalt --key hello --value world
//! ```

use std::path::PathBuf;
use std::process;
use std::time::Instant;

use clap::{Parser, Subcommand};
use rand::RngCore;
use tracing::info;

use basalt::{BasaltError, Engine, Result};

#[derive(Parser)]
#[command(name = "basalt-bench", version, about = "basalt benchmarking tool")]
struct Cli {
    /// Database directory
    #[arg(long, global = true, default_value = "/tmp/basalt")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate random key/value pairs in batched transactions
    Gen {
        /// Number of pairs to write
        #[arg(long, default_value_t = 10_000)]
        count: u64,

        /// Key size in bytes
        #[arg(long, default_value_t = 10)]
        key_size: usize,

        /// Value size in bytes
        #[arg(long, default_value_t = 100)]
        val_size: usize,
    },

    /// Read a single key and print its value
    Read {
        #[arg(long)]
        key: String,
    },

    /// Write a single key/value pair
    Write {
        #[arg(long)]
        key: String,

        #[arg(long)]
        value: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "basalt=warn".into()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let engine = Engine::open_path(&cli.dir)?;

    match cli.command {
        Command::Gen {
            count,
            key_size,
            val_size,
        } => gen(&engine, count, key_size, val_size)?,
        Command::Read { key } => {
            match engine.get(key.as_bytes())? {
                Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                None => {
                    eprintln!("key not found");
                    process::exit(1);
                }
            };
        }
        Command::Write { key, value } => {
            let mut txn = engine.begin_txn(false);
            txn.put(key.into_bytes(), value.into_bytes())?;
            txn.commit()?;
        }
    }

    engine.close()
}

/// Write `count` random pairs, starting a new transaction whenever the
/// write-set capacity runs out
fn gen(engine: &Engine, count: u64, key_size: usize, val_size: usize) -> Result<()> {
    let start = Instant::now();
    let mut rng = rand::thread_rng();

    let mut txn = engine.begin_txn(false);
    for _ in 0..count {
        let key = rand_bytes(&mut rng, key_size);
        let value = rand_bytes(&mut rng, val_size);

        match txn.put(key.clone(), value.clone()) {
            Ok(()) => {}
            Err(BasaltError::Capacity { .. }) => {
                txn.commit()?;
                txn = engine.begin_txn(false);
                txn.put(key, value)?;
            }
            Err(e) => return Err(e),
        }
    }
    txn.commit()?;

    info!(
        count,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "generation finished"
    );
    Ok(())
}

fn rand_bytes(rng: &mut impl RngCore, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rng.fill_bytes(&mut buf);
    buf
}
