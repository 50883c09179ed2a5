//! LanShare - command line entry point
//!
//! `lanshare serve <folder>` shares a folder; `lanshare send <url> <files>`
//! uploads files to a running server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;

use lanshare::client::{UploadClient, UploadClientConfig, UploadProgress};
use lanshare::core::config::{generate_pin, validate_pin};
use lanshare::core::utils::format_file_size;
use lanshare::core::{FinalizePolicy, ShareConfig};
use lanshare::logging::{LogLevel, LoggingSystem};
use lanshare::server::ShareServer;

#[derive(Debug, Parser)]
#[command(name = "lanshare", version, about = "Share photos and videos over the local network")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "LANSHARE_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Share a folder
    Serve(ServeArgs),
    /// Upload files to a running server
    Send(SendArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Folder to share
    folder: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    bind: Option<String>,

    /// PIN required from clients (4-6 digits)
    #[arg(long, env = "LANSHARE_PIN", conflicts_with = "generate_pin")]
    pin: Option<String>,

    /// Protect the share with a random 6-digit PIN
    #[arg(long)]
    generate_pin: bool,

    /// Where finished uploads are stored
    #[arg(short, long)]
    dest: Option<PathBuf>,

    /// Maximum folder depth to walk
    #[arg(long)]
    max_depth: Option<usize>,

    /// Accept uploads that finish before every byte arrived
    #[arg(long)]
    allow_partial: bool,
}

#[derive(Debug, Args)]
struct SendArgs {
    /// Server URL, e.g. http://192.168.1.20:8080/
    server: String,

    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// PIN of the server
    #[arg(long, env = "LANSHARE_PIN")]
    pin: Option<String>,

    /// Chunk size in bytes
    #[arg(long)]
    chunk_size: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ShareConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if cli.verbose {
        config.logging.level = LogLevel::Debug;
    }

    let _logging = match LoggingSystem::init(config.logging.clone()) {
        Ok(system) => Some(system),
        Err(e) => {
            eprintln!("Failed to initialize logging system: {}. Using basic logging.", e);
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                )
                .init();
            None
        }
    };

    match cli.command {
        Command::Serve(args) => serve(config, args).await,
        Command::Send(args) => send(args).await,
    }
}

async fn serve(mut config: ShareConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(folder) = args.folder {
        config.catalog.root = Some(folder);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(dest) = args.dest {
        config.upload.destination_dir = dest;
    }
    if let Some(depth) = args.max_depth {
        config.catalog.max_depth = depth;
    }
    if args.allow_partial {
        config.upload.finalize_policy = FinalizePolicy::AllowPartial;
    }
    if args.generate_pin {
        config.auth.token = Some(SecretString::new(generate_pin()));
    } else if let Some(pin) = args.pin {
        config.auth.token = Some(SecretString::new(pin));
    }
    config.validate().context("invalid configuration")?;

    let server = ShareServer::new(&config).context("starting server")?;
    let entries = server.state().catalog.snapshot().len();

    println!("Sharing {} item(s) on http://{}/", entries, server.addr());
    if let Some(pin) = config.token() {
        println!("PIN: {}  (first visit: http://<this-host>:{}/?t={})", pin, config.server.port, pin);
    }
    println!("Uploads go to {}", config.upload.destination_dir.display());

    tokio::select! {
        result = server.start() => result.context("server stopped")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }
    Ok(())
}

async fn send(args: SendArgs) -> anyhow::Result<()> {
    if let Some(pin) = &args.pin {
        validate_pin(pin).context("invalid PIN")?;
    }
    let mut client_config = UploadClientConfig::new(&args.server)
        .context("invalid server URL")?
        .with_token(args.pin);
    if let Some(chunk_size) = args.chunk_size {
        client_config = client_config.with_chunk_size(chunk_size);
    }

    let client = UploadClient::new(client_config)?.with_progress_callback(Arc::new(
        |p: UploadProgress| {
            let pct = if p.total == 0 { 100 } else { p.sent * 100 / p.total };
            eprint!(
                "\r{}: {}% ({} / {})   ",
                p.name,
                pct,
                format_file_size(p.sent),
                format_file_size(p.total)
            );
        },
    ));

    let mut failed = 0usize;
    for path in &args.files {
        match client.upload_file(path).await {
            Ok(_) => eprintln!("\r{}: done{}", path.display(), " ".repeat(24)),
            Err(e) => {
                failed += 1;
                eprintln!("\r{}: failed: {}", path.display(), e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} upload(s) failed", failed, args.files.len());
    }
    Ok(())
}
