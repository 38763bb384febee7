//! Authenticode signing command line.
//!
//! Subcommands mirror the classic signcode workflow: `sign`,
//! `extract-signature`, `remove-signature` and `verify`. Exit code 0 means
//! success, 1 a verification mismatch, -1 a hard failure.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};

use authsign::error::{SignError, SignResult};
use authsign::sign::{extract_signature, remove_signature, sign_file};
use authsign::{
    keys, verify, DigestAlgorithm, FileKind, JavaPermissionLevel, KeyMaterial, SignOptions,
    TimestampMode,
};

#[derive(Parser)]
#[command(name = "authsign")]
#[command(about = "Authenticode code signing for PE, CAB and MSI files")]
#[command(long_about = "
Authenticode code signing for PE, CAB and MSI files.

EXAMPLES:
    # Sign with a PKCS#12 container and SHA-256
    authsign sign --pkcs12 cert.p12 --pass secret --hash sha2 app.exe signed.exe

    # Sign with an SPC/key pair and an RFC 3161 timestamp
    authsign sign --spc cert.spc --key cert.key --ts http://timestamp.example app.exe signed.exe

    # Inspect an existing signature
    authsign verify signed.exe
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign a PE, CAB or MSI file
    Sign(SignArgs),

    /// Copy the raw signature block out of a signed PE file
    ExtractSignature {
        #[arg(value_name = "INFILE")]
        infile: PathBuf,
        #[arg(value_name = "OUTFILE")]
        outfile: PathBuf,
    },

    /// Regenerate a PE file without its signature
    RemoveSignature {
        #[arg(value_name = "INFILE")]
        infile: PathBuf,
        #[arg(value_name = "OUTFILE")]
        outfile: PathBuf,
    },

    /// Verify the signature of a PE file
    Verify {
        #[arg(value_name = "INFILE")]
        infile: PathBuf,
    },

    /// Print version information for the tool and its crypto backend
    Version,
}

#[derive(Args)]
struct SignArgs {
    /// DER SPC file holding the certificate chain
    #[arg(long, value_name = "FILE")]
    spc: Option<PathBuf>,

    /// DER or PEM private key matching the SPC chain
    #[arg(long, value_name = "FILE")]
    key: Option<PathBuf>,

    /// PKCS#12 container with certificate and key
    #[arg(long, value_name = "FILE")]
    pkcs12: Option<PathBuf>,

    /// PVK private key matching the SPC chain
    #[arg(long, value_name = "FILE")]
    pvk: Option<PathBuf>,

    /// Password for the key container
    #[arg(long, value_name = "PASS", default_value = "")]
    pass: String,

    /// Digest algorithm
    #[arg(long = "hash", value_enum, default_value = "sha1")]
    hash: HashArg,

    /// Program description embedded in the signature
    #[arg(short = 'n', long = "desc", value_name = "DESC")]
    desc: Option<String>,

    /// More-information URL embedded in the signature
    #[arg(short = 'i', long = "url", value_name = "URL")]
    url: Option<String>,

    /// Java permission level (CAB files)
    #[arg(long, value_enum, value_name = "LEVEL")]
    jp: Option<JpArg>,

    /// Commercial rather than individual code signing
    #[arg(long)]
    comm: bool,

    /// Authenticode timestamp authority URL
    #[arg(short = 't', value_name = "TSURL", conflicts_with = "ts")]
    timestamp_url: Option<String>,

    /// RFC 3161 timestamp authority URL
    #[arg(long = "ts", value_name = "TSURL")]
    ts: Option<String>,

    /// HTTP proxy for timestamp requests
    #[arg(short = 'p', long = "proxy", value_name = "PROXY")]
    proxy: Option<String>,

    #[arg(value_name = "INFILE")]
    infile: PathBuf,

    #[arg(value_name = "OUTFILE")]
    outfile: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HashArg {
    Md5,
    Sha1,
    /// SHA-256
    Sha2,
}

impl From<HashArg> for DigestAlgorithm {
    fn from(arg: HashArg) -> Self {
        match arg {
            HashArg::Md5 => DigestAlgorithm::Md5,
            HashArg::Sha1 => DigestAlgorithm::Sha1,
            HashArg::Sha2 => DigestAlgorithm::Sha256,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum JpArg {
    Low,
    Medium,
    High,
}

impl From<JpArg> for JavaPermissionLevel {
    fn from(arg: JpArg) -> Self {
        match arg {
            JpArg::Low => JavaPermissionLevel::Low,
            JpArg::Medium => JavaPermissionLevel::Medium,
            JpArg::High => JavaPermissionLevel::High,
        }
    }
}

fn load_material(args: &SignArgs) -> SignResult<KeyMaterial> {
    match (&args.spc, &args.key, &args.pkcs12, &args.pvk) {
        (None, None, Some(p12), None) => keys::load_pkcs12(p12, &args.pass),
        (Some(spc), Some(key), None, None) => keys::load_spc_key(spc, key, &args.pass),
        (Some(spc), None, None, Some(pvk)) => keys::load_spc_pvk(spc, pvk, &args.pass),
        _ => Err(SignError::Arg(
            "specify either --spc with --key, --pkcs12, or --spc with --pvk".into(),
        )),
    }
}

fn read_input(path: &Path) -> SignResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| SignError::Io(format!("{}: {e}", path.display())))
}

/// Reject PE-only commands on other container kinds.
fn require_pe(data: &[u8]) -> SignResult<()> {
    if FileKind::detect(data)? != FileKind::Pe {
        return Err(SignError::Arg(
            "command is not supported for non-PE files".into(),
        ));
    }
    Ok(())
}

fn write_output(path: &Path, data: &[u8]) -> SignResult<()> {
    std::fs::write(path, data).map_err(|e| SignError::Io(format!("{}: {e}", path.display())))
}

/// Run one command; `Ok` carries the process exit code.
fn run(cli: &Cli) -> SignResult<i32> {
    match &cli.command {
        Commands::Sign(args) => {
            let material = load_material(args)?;
            let data = read_input(&args.infile)?;
            let opts = SignOptions {
                digest_alg: args.hash.into(),
                description: args.desc.clone(),
                url: args.url.clone(),
                java_level: args.jp.map(Into::into),
                commercial: args.comm,
                timestamp: match (&args.timestamp_url, &args.ts) {
                    (Some(url), None) => Some(TimestampMode::Authenticode(url.clone())),
                    (None, Some(url)) => Some(TimestampMode::Rfc3161(url.clone())),
                    _ => None,
                },
                proxy: args.proxy.clone(),
            };
            let signed = sign_file(&data, &material, &opts)?;
            write_output(&args.outfile, &signed)?;
            Ok(0)
        }
        Commands::ExtractSignature { infile, outfile } => {
            let data = read_input(infile)?;
            require_pe(&data)?;
            let block = extract_signature(&data)?;
            write_output(outfile, &block)?;
            Ok(0)
        }
        Commands::RemoveSignature { infile, outfile } => {
            let data = read_input(infile)?;
            require_pe(&data)?;
            let stripped = remove_signature(&data)?;
            write_output(outfile, &stripped)?;
            Ok(0)
        }
        Commands::Verify { infile } => {
            let data = read_input(infile)?;
            require_pe(&data)?;
            verify::verify_pe(&data)
        }
        Commands::Version => {
            println!(
                "{} {}, using:\n\t{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                openssl::version::version()
            );
            Ok(0)
        }
    }
}

/// Partially written outputs are removed on hard failure.
fn output_path(cli: &Cli) -> Option<&Path> {
    match &cli.command {
        Commands::Sign(args) => Some(&args.outfile),
        Commands::ExtractSignature { outfile, .. } | Commands::RemoveSignature { outfile, .. } => {
            Some(outfile)
        }
        _ => None,
    }
}

fn main() -> ExitCode {
    env_logger::init();
    openssl::init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(0) => {
            println!("Succeeded");
            ExitCode::SUCCESS
        }
        Ok(code) => {
            println!("Failed");
            ExitCode::from(code as u8)
        }
        Err(e) => {
            eprintln!("{e}");
            if let Some(path) = output_path(&cli) {
                let _ = std::fs::remove_file(path);
            }
            eprintln!("\nFailed");
            // hard failures exit with -1, as the classic tool did
            ExitCode::from(255)
        }
    }
}
