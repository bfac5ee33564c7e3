//! StreamSeal CLI - Command line interface for stream encryption.
//!
//! This tool generates keys and encrypts or decrypts files and pipes in the
//! StreamSeal AES-256-GCM stream format. Logs go to stderr so that stdout can
//! carry ciphertext or plaintext.

mod counter;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use streamseal_common::DeviceId;
use streamseal_crypto::{
    encoding, generate_key, inspect, stdout_sink, ByteSink, Decryptor, Encryptor, FileSink,
    IvBuilder, MonotonicCounter, Source, StreamConfig, SymmetricKey, KEY_BITS,
};

use crate::counter::FileCounter;

#[derive(Parser)]
#[command(name = "streamseal")]
#[command(about = "StreamSeal - Streaming AES-256-GCM encryption")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a random key, base64 encoded.
    Keygen {
        /// Key length in bits.
        #[arg(short, long, default_value_t = KEY_BITS)]
        bits: usize,

        /// Write the key to this file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Encrypt a file or stdin.
    Encrypt {
        /// File holding the base64 key.
        #[arg(short, long)]
        key_file: PathBuf,

        /// Device identifier embedded in the IV.
        #[arg(short, long)]
        device_id: Option<String>,

        /// Counter value for this message. Must never repeat for a device.
        #[arg(
            short,
            long,
            conflicts_with = "counter_file",
            required_unless_present = "counter_file"
        )]
        counter: Option<u64>,

        /// JSON counter file, advanced on every use.
        #[arg(long)]
        counter_file: Option<PathBuf>,

        /// Additional authenticated data; decryption needs the same value.
        #[arg(long)]
        aad: Option<String>,

        /// JSON stream parameters (iv_len_bits, tag_len, chunk_size).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Input file (default: stdin).
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decrypt a file or stdin.
    Decrypt {
        /// File holding the base64 key.
        #[arg(short, long)]
        key_file: PathBuf,

        /// Additional authenticated data given at encryption.
        #[arg(long)]
        aad: Option<String>,

        /// Input file (default: stdin).
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the parameters of an encrypted stream.
    Inspect {
        /// Input file (default: stdin).
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Keygen { bits, out } => cmd_keygen(bits, out.as_deref()),

        Commands::Encrypt {
            key_file,
            device_id,
            counter,
            counter_file,
            aad,
            config,
            input,
            output,
        } => cmd_encrypt(EncryptArgs {
            key_file,
            device_id,
            counter,
            counter_file,
            aad,
            config,
            input,
            output,
        }),

        Commands::Decrypt {
            key_file,
            aad,
            input,
            output,
        } => cmd_decrypt(&key_file, aad.as_deref(), input, output.as_deref()),

        Commands::Inspect { input } => cmd_inspect(input),
    }
}

struct EncryptArgs {
    key_file: PathBuf,
    device_id: Option<String>,
    counter: Option<u64>,
    counter_file: Option<PathBuf>,
    aad: Option<String>,
    config: Option<PathBuf>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
}

/// Read a base64 key file.
fn load_key(path: &Path) -> Result<SymmetricKey> {
    let text = Zeroizing::new(
        fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file {}", path.display()))?,
    );
    SymmetricKey::from_base64(&text).context("Invalid key file")
}

/// Read stream parameters from a JSON file.
fn load_config(path: &Path) -> Result<StreamConfig> {
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: StreamConfig = serde_json::from_slice(&bytes).context("Invalid config file")?;
    config.validate().context("Invalid stream parameters")?;
    Ok(config)
}

fn source_for(input: Option<PathBuf>) -> Source {
    match input {
        Some(path) => Source::File(path),
        None => Source::Stdin,
    }
}

fn sink_for(output: Option<&Path>) -> Result<Box<dyn ByteSink>> {
    Ok(match output {
        Some(path) => Box::new(
            FileSink::create(path)
                .with_context(|| format!("Failed to create output next to {}", path.display()))?,
        ),
        None => Box::new(stdout_sink()),
    })
}

/// Build the IV source from either a fixed counter or a counter file.
fn iv_builder(args: &EncryptArgs) -> Result<IvBuilder> {
    match (&args.counter_file, args.counter) {
        (Some(path), _) => {
            let counter = FileCounter::open(path, args.device_id.as_deref())?;
            info!(
                counter = counter.peek()?,
                file = %path.display(),
                "Using counter file"
            );
            let device_id = counter.device_id()?;
            Ok(IvBuilder::new(device_id, counter))
        }
        (None, Some(value)) => {
            let device_id: DeviceId = args
                .device_id
                .as_deref()
                .context("--device-id is required with --counter")?
                .parse()
                .context("Invalid device id")?;
            Ok(IvBuilder::new(device_id, MonotonicCounter::starting_at(value)))
        }
        (None, None) => anyhow::bail!("Either --counter or --counter-file is required"),
    }
}

/// Generate a key.
fn cmd_keygen(bits: usize, out: Option<&Path>) -> Result<()> {
    let key = Zeroizing::new(generate_key(bits).context("Failed to generate key")?);
    let text = Zeroizing::new(encoding::encode(&key));

    match out {
        Some(path) => {
            let mut sink = FileSink::create(path)?;
            sink.write_all(text.as_bytes())?;
            sink.write_all(b"\n")?;
            sink.commit()
                .with_context(|| format!("Failed to write key to {}", path.display()))?;
            info!("Wrote {}-bit key to {}", bits, path.display());
        }
        None => println!("{}", text.as_str()),
    }

    Ok(())
}

/// Encrypt a file or stdin.
fn cmd_encrypt(args: EncryptArgs) -> Result<()> {
    let key = load_key(&args.key_file)?;
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => StreamConfig::default(),
    };
    let ivs = iv_builder(&args)?;
    ivs.check_fits(config.iv_len_bits)
        .context("Device id does not fit the IV")?;

    let encryptor = Encryptor::new(&key).with_config(config)?;
    let mut sink = sink_for(args.output.as_deref())?;

    let written = encryptor
        .encrypt_source(
            &ivs,
            args.aad.as_deref().map(str::as_bytes),
            source_for(args.input),
            sink.as_mut(),
        )
        .context("Encryption failed")?;

    let params = encryptor.config();
    info!(
        bytes = written,
        device = %ivs.device_id(),
        iv_bits = params.iv_len_bits,
        tag_len = params.tag_len,
        "Encryption complete"
    );
    Ok(())
}

/// Decrypt a file or stdin.
fn cmd_decrypt(
    key_file: &Path,
    aad: Option<&str>,
    input: Option<PathBuf>,
    output: Option<&Path>,
) -> Result<()> {
    let key = load_key(key_file)?;
    let mut sink = sink_for(output)?;

    let size = Decryptor::new(&key)
        .decrypt_source(aad.map(str::as_bytes), source_for(input), sink.as_mut())
        .map_err(|e| {
            if e.is_integrity_failure() {
                warn!("Stream failed integrity checks, no plaintext was written");
            }
            e
        })
        .context("Decryption failed")?;

    info!(bytes = size, "Decryption complete");
    Ok(())
}

/// Print the stream header.
fn cmd_inspect(input: Option<PathBuf>) -> Result<()> {
    let (mut reader, size) = source_for(input).open()?;
    let header = inspect(&mut reader).context("Not a StreamSeal stream")?;

    println!("Stream parameters:");
    println!("  IV: {} bits", header.iv_len_bits);
    println!("  Tag: {} bytes", header.tag_len);
    if let Some(size) = size {
        println!("  Stream size: {} bytes", size);
    }

    Ok(())
}
