//! pkisupply: Command-line front end for key generation and chain verification.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use pkisupply_lib::verify::parse_pem_crl;
use pkisupply_lib::{
    EncodingFormat, KeyGenerationInfo, KeyType, RevocationData, TokenSlot, TrustStore,
    VerificationReport, VerifyOptions, X509Handle,
};
use rayon::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "pkisupply",
    version,
    about = "Key generation and certificate chain verification for software and PKCS#11 keys",
    long_about = "pkisupply generates key pairs in software or on a PKCS#11 token, loads\n\
                  certificates, checks private keys against certificates, and verifies\n\
                  certificate chains against a single, explicitly named trust anchor.\n\n\
                  The hardware backend is configured through PKISUPPLY_PKCS11_MODULE\n\
                  and PKISUPPLY_PKCS11_PIN.",
    after_help = "EXAMPLES:\n\
                  \n  pkisupply generate --key-type prime256v1 --public-out cp.pub --private-out cp.key\
                  \n  pkisupply generate --key-type secp384r1 --hardware --slot-uri 'pkcs11:object=cp'\
                  \n  pkisupply load cert.pem\
                  \n  pkisupply check-key cert.pem cp.key\
                  \n  pkisupply verify --anchor root.pem --untrusted sub-ca.pem leaf.pem\
                  \n  pkisupply probe"
)]
struct Cli {
    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a key pair (exit code 0 = generated)
    #[command(after_help = "KEY TYPES:\n\
                      \n  prime256v1   ECDSA P-256\
                      \n  secp384r1    ECDSA P-384\
                      \n  rsa2048      RSA 2048 (TPM 2.0 profile)\
                      \n  rsa3072      RSA 3072\
                      \n  rsa7680      RSA 7680 (software only)")]
    Generate {
        /// Key type
        #[arg(long, default_value = "prime256v1")]
        key_type: KeyType,
        /// Generate on the PKCS#11 token instead of in software
        #[arg(long)]
        hardware: bool,
        /// Token slot as a PKCS#11 URI (hardware only)
        #[arg(long, requires = "hardware")]
        slot_uri: Option<String>,
        /// Write the public key (SPKI PEM) to this file
        #[arg(long)]
        public_out: Option<PathBuf>,
        /// Write the private key (PKCS#8 PEM) to this file (software only)
        #[arg(long, conflicts_with = "hardware")]
        private_out: Option<PathBuf>,
        /// Environment variable holding a passphrase for the private key file
        #[arg(long, requires = "private_out")]
        passphrase_env: Option<String>,
    },
    /// Display the certificates in a PEM bundle or DER file
    Load {
        /// Certificate file. Reads from stdin if omitted.
        file: Option<PathBuf>,
        /// Force DER input parsing (default: auto-detect)
        #[arg(long)]
        der: bool,
        /// Force PEM input parsing (default: auto-detect)
        #[arg(long)]
        pem: bool,
    },
    /// Check that a private key belongs to a certificate (exit code 0 = match)
    CheckKey {
        /// Certificate file (the first certificate is used)
        cert: PathBuf,
        /// Private key file (PKCS#8, encrypted PKCS#8, SEC1 or PKCS#1; PEM or DER)
        key: PathBuf,
        /// Environment variable holding the key passphrase
        #[arg(long)]
        passphrase_env: Option<String>,
    },
    /// Verify certificate chains against a trust anchor (exit code 0 = all valid)
    #[command(after_help = "Each LEAF file holds the leaf certificate first; further\n\
                      certificates in the same file are used as untrusted intermediates,\n\
                      ahead of those from --untrusted.\n\
                      \nEXAMPLES:\n\
                      \n  pkisupply verify --anchor root.pem leaf.pem\
                      \n  pkisupply verify --anchor sub-ca.pem --partial-chain leaf.pem\
                      \n  pkisupply verify --anchor root.pem --crl sub-ca.crl --json leaf1.pem leaf2.pem")]
    Verify {
        /// Trust anchor certificate file (PEM or DER)
        #[arg(long)]
        anchor: PathBuf,
        /// Untrusted intermediates (PEM bundle or DER)
        #[arg(long)]
        untrusted: Option<PathBuf>,
        /// CRL file (PEM or DER); may be repeated
        #[arg(long)]
        crl: Vec<PathBuf>,
        /// Accept chains that end at a supplied intermediate or at an
        /// anchor that is not self-issued
        #[arg(long)]
        partial_chain: bool,
        /// Verify at this Unix timestamp instead of now
        #[arg(long)]
        at_time: Option<i64>,
        /// Maximum number of issuers above the leaf
        #[arg(long)]
        max_depth: Option<usize>,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Leaf certificate files
        #[arg(required = true)]
        leaves: Vec<PathBuf>,
    },
    /// Report whether the hardware-token backend is usable (exit code 0 = available)
    Probe,
}

/// Maximum input size (10 MiB) to prevent unbounded memory use.
const MAX_INPUT_BYTES: u64 = 10 * 1024 * 1024;

fn read_input(file: Option<&Path>) -> Result<Vec<u8>> {
    match file {
        Some(path) => {
            let meta = std::fs::metadata(path)
                .with_context(|| format!("Failed to stat file: {}", path.display()))?;
            if meta.len() > MAX_INPUT_BYTES {
                anyhow::bail!(
                    "File too large ({} bytes, max {} bytes): {}",
                    meta.len(),
                    MAX_INPUT_BYTES,
                    path.display()
                );
            }
            std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .take(MAX_INPUT_BYTES)
                .read_to_end(&mut buf)
                .context("Failed to read from stdin")?;
            Ok(buf)
        }
    }
}

fn input_format(input: &[u8], der: bool, pem: bool) -> EncodingFormat {
    if der {
        EncodingFormat::Der
    } else if pem {
        EncodingFormat::Pem
    } else {
        EncodingFormat::detect(input)
    }
}

fn load_file(path: &Path) -> Result<Vec<X509Handle>> {
    let input = read_input(Some(path))?;
    pkisupply_lib::load_certificates(&input, EncodingFormat::detect(&input))
        .with_context(|| format!("Failed to load certificates: {}", path.display()))
}

fn passphrase_from_env(var: Option<&str>) -> Result<Option<String>> {
    var.map(|name| {
        std::env::var(name).with_context(|| format!("Passphrase variable {} is not set", name))
    })
    .transpose()
}

fn load_crls(paths: &[PathBuf]) -> Result<Option<RevocationData>> {
    if paths.is_empty() {
        return Ok(None);
    }
    let mut crls = RevocationData::new();
    for path in paths {
        let data = read_input(Some(path))?;
        if EncodingFormat::detect(&data) == EncodingFormat::Pem {
            for der in parse_pem_crl(&data)
                .with_context(|| format!("Failed to parse CRL: {}", path.display()))?
            {
                crls.add_der(der);
            }
        } else {
            crls.add_der(data);
        }
    }
    debug!(count = crls.len(), "loaded CRLs");
    Ok(Some(crls))
}

/// A single verification outcome.
struct LeafResult {
    label: String,
    report: Result<VerificationReport>,
}

fn verify_leaf(
    path: &Path,
    untrusted: &[X509Handle],
    trust_store: &TrustStore,
    options: &VerifyOptions,
) -> Result<VerificationReport> {
    let certs = load_file(path)?;
    let (leaf, bundled) = certs
        .split_first()
        .with_context(|| format!("No certificate found: {}", path.display()))?;
    let candidates: Vec<&X509Handle> = bundled.iter().chain(untrusted.iter()).collect();
    Ok(pkisupply_lib::verify_chain_with_options(
        leaf,
        &candidates,
        trust_store,
        options,
    ))
}

fn print_results(results: &[LeafResult], json: bool) -> Result<usize> {
    let mut failures = 0;
    if json {
        let mut values = Vec::with_capacity(results.len());
        for r in results {
            let value = match &r.report {
                Ok(report) => {
                    if !report.is_valid() {
                        failures += 1;
                    }
                    serde_json::json!({ "file": r.label, "report": report })
                }
                Err(e) => {
                    failures += 1;
                    serde_json::json!({ "file": r.label, "error": format!("{:#}", e) })
                }
            };
            values.push(value);
        }
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(failures);
    }

    for r in results {
        match &r.report {
            Ok(report) if report.is_valid() => println!("{}: {}", r.label, report),
            Ok(report) => {
                failures += 1;
                eprintln!("{}: {}", r.label, report);
            }
            Err(e) => {
                failures += 1;
                eprintln!("{}: FAIL ({:#})", r.label, e);
            }
        }
    }
    Ok(failures)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Generate {
            key_type,
            hardware,
            slot_uri,
            public_out,
            private_out,
            passphrase_env,
        } => {
            let mut info = if hardware {
                let slot = match slot_uri.as_deref() {
                    Some(uri) => TokenSlot::parse_uri(uri)?,
                    None => TokenSlot::default(),
                };
                KeyGenerationInfo::hardware(key_type, slot)
            } else {
                KeyGenerationInfo::software(key_type)
            };
            if let Some(path) = public_out {
                info = info.with_public_key_file(path);
            }
            if let Some(path) = private_out {
                info = info.with_private_key_file(path);
            }
            if let Some(pass) = passphrase_from_env(passphrase_env.as_deref())? {
                info = info.with_passphrase(pass);
            }

            let key = pkisupply_lib::generate_key(info)?;
            match key.token_ref() {
                Some(token_ref) => println!("{} key on {}: {}", key_type, key.backend(), token_ref),
                None => println!("{} key ({})", key_type, key.backend()),
            }
            print!("{}", key.public_key_pem());
            key.release();
        }

        Commands::Load { file, der, pem } => {
            let input = read_input(file.as_deref())?;
            let certs = pkisupply_lib::load_certificates(&input, input_format(&input, der, pem))?;
            if certs.is_empty() {
                anyhow::bail!("No certificates found");
            }
            for cert in &certs {
                print!("{}", pkisupply_lib::display_text(cert));
            }
        }

        Commands::CheckKey {
            cert,
            key,
            passphrase_env,
        } => {
            let certs = load_file(&cert)?;
            let cert_handle = certs
                .first()
                .with_context(|| format!("No certificate found: {}", cert.display()))?;
            let key_bytes = zeroize::Zeroizing::new(read_input(Some(&key))?);
            let passphrase = passphrase_from_env(passphrase_env.as_deref())?.map(zeroize::Zeroizing::new);
            let result = pkisupply_lib::check_private_key(
                cert_handle,
                &key_bytes,
                passphrase.as_deref().map(String::as_str),
            );
            if result.is_valid() {
                println!("{}: {}", key.display(), result);
            } else {
                eprintln!("{}: {}", key.display(), result);
                std::process::exit(1);
            }
        }

        Commands::Verify {
            anchor,
            untrusted,
            crl,
            partial_chain,
            at_time,
            max_depth,
            json,
            leaves,
        } => {
            let trust_store = match TrustStore::from_anchor_file(&anchor) {
                Ok(store) => store,
                Err(e) if partial_chain => {
                    tracing::warn!(
                        anchor = %anchor.display(),
                        error = %e,
                        "trust anchor not loaded, accepting partial chains only"
                    );
                    TrustStore::empty()
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to load trust anchor: {}", anchor.display())
                    })
                }
            };
            let untrusted = match untrusted.as_deref() {
                Some(path) => load_file(path)?,
                None => Vec::new(),
            };
            let mut options = VerifyOptions {
                allow_partial_chain: partial_chain,
                revocation: load_crls(&crl)?,
                at_time,
                ..VerifyOptions::default()
            };
            if let Some(depth) = max_depth {
                options.max_depth = depth;
            }

            let results: Vec<LeafResult> = leaves
                .par_iter()
                .map(|path| LeafResult {
                    label: path.display().to_string(),
                    report: verify_leaf(path, &untrusted, &trust_store, &options),
                })
                .collect();

            if print_results(&results, json)? > 0 {
                std::process::exit(2);
            }
        }

        Commands::Probe => {
            if pkisupply_lib::backend::supports_hardware_backend() {
                println!("hardware backend: available");
            } else {
                println!("hardware backend: unavailable");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
