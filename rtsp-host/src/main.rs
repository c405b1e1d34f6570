use anyhow::Result;
use clap::{Parser, Subcommand};
use rtsp_host::core::{self, PlayOptions, PlayerConfig};
use rtsp_host::network::StreamTarget;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "RTSP-Host: real-time stream ingestion and decoding")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a stream headless, logging playback events
    Play {
        url: String,

        #[arg(long, default_value_t = 1920)]
        width: u32,

        #[arg(long, default_value_t = 1080)]
        height: u32,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Enable per-frame debug logging
        #[arg(long)]
        debug: bool,

        /// Disable audio decoding
        #[arg(long)]
        no_audio: bool,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Save the last frame as PNG into this directory on exit
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,
    },
    /// Print the connection target for a URL
    Resolve { url: String },
}

fn init_logging(verbose: bool, debug: bool) {
    let default_filter = if debug {
        "trace"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Resolve { url } => {
            init_logging(false, false);
            let target = StreamTarget::parse(&url)?;
            println!("url:    {}", target.url);
            println!("host:   {}", target.host);
            println!("port:   {}", target.port);
            println!("tls:    {}", target.secure);
            if let Some(credentials) = &target.credentials {
                println!("user:   {}", credentials.username);
            }
        }
        Commands::Play {
            url,
            width,
            height,
            verbose,
            debug,
            no_audio,
            duration,
            snapshot_dir,
        } => {
            init_logging(verbose, debug);
            core::VERBOSE.store(verbose || debug, Ordering::SeqCst);
            core::DEBUG.store(debug, Ordering::SeqCst);

            let config = PlayerConfig {
                surface_width: width,
                surface_height: height,
                ..PlayerConfig::default()
            };
            core::run(PlayOptions {
                url,
                config,
                audio: !no_audio,
                duration: duration.map(Duration::from_secs),
                snapshot_dir,
            })?;
        }
    }
    Ok(())
}
