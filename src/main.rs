//! Binary entrypoint for the TowerMUD CLI.
//!
//! Commands:
//! - `start` - run the server until Ctrl-C
//! - `init` - write a starter `config.toml` and create the data directory
//! - `status` - print what the store holds
//!
//! See the library crate docs for module-level details: `towermud::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use towermud::config::Config;
use towermud::server::TowerServer;

#[derive(Parser)]
#[command(name = "towermud")]
#[command(about = "A persistent tower-climbing MUD server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Start {
        /// Override the line transport address (e.g. 0.0.0.0:4000)
        #[arg(long)]
        line_bind: Option<String>,

        /// Override the websocket transport address; empty disables it
        #[arg(long)]
        websocket_bind: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Show stored world status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            line_bind,
            websocket_bind,
        } => {
            let mut config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            if let Some(bind) = line_bind {
                config.server.line_bind = bind;
            }
            if let Some(bind) = websocket_bind {
                config.server.websocket_bind = bind;
            }
            config.validate()?;
            info!("Starting TowerMUD v{}", env!("CARGO_PKG_VERSION"));
            let server = TowerServer::new(config).await?;
            server.run().await?;
        }
        Commands::Init => {
            init_logging(&None, cli.verbose);
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            let cfg = Config::default();
            tokio::fs::create_dir_all(cfg.seeds_dir()).await?;
            info!(
                "Created {}; drop spells.json, mobs.json or items.json there to extend content",
                cfg.seeds_dir().display()
            );
        }
        Commands::Status => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            let server = TowerServer::new(config).await?;
            server.show_status().await?;
        }
    }

    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins over the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|cfg| cfg.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let file = config.as_ref().and_then(|cfg| {
        cfg.logging.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        })
    });
    let security_path = config.as_ref().and_then(|cfg| cfg.logging.security_file.clone());

    match file {
        Some(f) => {
            let file = std::sync::Arc::new(std::sync::Mutex::new(f));
            // when stdout is not a terminal the file is the only sink
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if record.target() == "security" {
                    if let Some(ref sec_path) = security_path {
                        if let Ok(mut sf) = std::fs::OpenOptions::new()
                            .create(true)
                            .append(true)
                            .open(sec_path)
                        {
                            let _ = writeln!(sf, "{}", line);
                        }
                    }
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
