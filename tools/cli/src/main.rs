//! PublicPillar CLI - encrypt and decrypt secret documents.
//!
//! Values are encrypted against an RSA public key and decrypted with the
//! matching private key. Short values are wrapped directly with RSA-OAEP,
//! longer ones in an AES envelope.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use publicpillar_crypto::{Ciphertext, DigestAlgorithm, HybridEngine, KeyMaterial};
use publicpillar_secrets::{DocumentFormat, PillarConfig, PillarOperations, SecureWriter};

#[derive(Parser)]
#[command(name = "ppillar")]
#[command(about = "PublicPillar - Secrets that are safe to commit")]
#[command(version)]
struct Cli {
    /// Key to use: a public key to encrypt, a private key to decrypt.
    #[arg(short, long, global = true, value_name = "KEY")]
    key: Option<PathBuf>,

    /// Passphrase for an encrypted private key.
    #[arg(short, long, global = true, value_name = "PASSPHRASE")]
    passphrase: Option<String>,

    /// OAEP hash: sha256, sha384 or sha512.
    #[arg(long, global = true)]
    digest: Option<DigestAlgorithm>,

    /// Configuration file (default: ./.ppillar.json if present).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a single value.
    Encrypt {
        /// Value to encrypt, or @FILE to read it from a file. Default: stdin.
        value: Option<String>,
    },

    /// Encrypt every value of a plaintext document.
    EncryptFile {
        /// Plaintext document.
        source: PathBuf,

        /// Where to write the encrypted document (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decrypt a document, or every document below a directory.
    Decrypt {
        /// Encrypted document or directory.
        source: PathBuf,

        /// Output file, or output directory when decrypting a directory.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

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

    let config = PillarConfig::discover(cli.config.as_deref()).context("Failed to read config")?;
    let digest = cli.digest.unwrap_or(config.digest);

    let key_path = require_key(cli.key.as_deref())?;
    let passphrase = cli.passphrase.map(Zeroizing::new);
    let engine = load_engine(key_path, passphrase, digest, prompt_passphrase)?;

    match cli.command {
        Commands::Encrypt { value } => cmd_encrypt(&engine, value.as_deref()),

        Commands::EncryptFile { source, output } => {
            cmd_encrypt_file(&engine, &config, &source, output.as_deref())
        }

        Commands::Decrypt { source, output } => {
            cmd_decrypt(&engine, &config, &source, output.as_deref())
        }
    }
}

fn require_key(key: Option<&Path>) -> Result<&Path> {
    key.ok_or_else(|| {
        anyhow!(
            "A key is necessary to do anything! Point -k/--key at a public key to encrypt \
             or a private key to decrypt."
        )
    })
}

/// Load the key, calling `prompt` once for a passphrase if the key needs one.
fn load_engine(
    path: &Path,
    passphrase: Option<Zeroizing<String>>,
    digest: DigestAlgorithm,
    prompt: impl FnOnce() -> Result<Zeroizing<String>>,
) -> Result<HybridEngine> {
    let key = match KeyMaterial::load(path, passphrase.as_deref().map(String::as_str)) {
        Ok(key) => key,
        Err(e) if e.needs_passphrase() => {
            let retry = prompt()?;
            KeyMaterial::load(path, Some(retry.as_str())).map_err(|e| {
                if e.needs_passphrase() {
                    anyhow!("Couldn't load key, probably wrong passphrase.")
                } else {
                    anyhow::Error::new(e)
                }
            })?
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to load key {}", path.display()));
        }
    };

    debug!(bits = key.modulus_bits(), digest = %digest, "Key loaded");
    Ok(HybridEngine::with_digest(key, digest))
}

/// Prompt for passphrase securely.
fn prompt_passphrase() -> Result<Zeroizing<String>> {
    rpassword::prompt_password("Enter passphrase for private key: ")
        .map(Zeroizing::new)
        .context("Failed to read passphrase")
}

/// Resolve the value argument: literal, `@file`, or stdin.
fn read_value(value: Option<&str>) -> Result<String> {
    match value {
        Some(arg) => match arg.strip_prefix('@') {
            Some(file) => {
                std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file))
            }
            None => Ok(arg.to_string()),
        },
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

/// Text to print for one encrypted value.
fn render_ciphertext(ciphertext: &Ciphertext) -> Result<String> {
    match ciphertext {
        Ciphertext::Direct(text) => Ok(text.clone()),
        Ciphertext::Enveloped { .. } => {
            let value = serde_json::to_value(ciphertext)?;
            let yaml = DocumentFormat::Yaml.render(&value)?;
            Ok(yaml.trim_end().to_string())
        }
    }
}

/// Encrypt a single value.
fn cmd_encrypt(engine: &HybridEngine, value: Option<&str>) -> Result<()> {
    let plaintext = Zeroizing::new(read_value(value)?);
    let ciphertext = engine.encrypt(&plaintext).context("Failed to encrypt value")?;
    println!("{}", render_ciphertext(&ciphertext)?);
    Ok(())
}

/// Encrypt a plaintext document.
fn cmd_encrypt_file(
    engine: &HybridEngine,
    config: &PillarConfig,
    source: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let ops = PillarOperations::new(engine).with_format(config.format);
    let format = config
        .format
        .unwrap_or_else(|| DocumentFormat::from_path(output.unwrap_or(source)));

    let encrypted = ops
        .encrypt_file(source, format)
        .with_context(|| format!("Failed to encrypt {}", source.display()))?;

    match output {
        Some(path) => {
            std::fs::write(path, encrypted)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Wrote encrypted document");
        }
        None => print!("{}", encrypted),
    }
    Ok(())
}

/// Decrypt a document or a directory of documents.
fn cmd_decrypt(
    engine: &HybridEngine,
    config: &PillarConfig,
    source: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let ops = PillarOperations::new(engine).with_format(config.format);

    if source.is_dir() {
        let target = output
            .map(Path::to_path_buf)
            .or_else(|| config.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."));
        let report = ops
            .decrypt_directory(source, &target)
            .with_context(|| format!("Failed to decrypt {}", source.display()))?;
        info!(files = report.written.len(), "Decryption complete");
        return Ok(());
    }

    let plaintext = Zeroizing::new(
        ops.decrypt_file(source)
            .with_context(|| format!("Failed to decrypt {}", source.display()))?,
    );

    match output {
        Some(path) => {
            info!(path = %path.display(), "Writing file");
            SecureWriter::write(path, plaintext.as_bytes())
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        None => print!("{}", plaintext.as_str()),
    }
    Ok(())
}
