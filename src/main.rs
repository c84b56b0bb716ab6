mod address;
mod cli;
mod config;
mod endpoint;
mod error;
mod map;
mod openai_client;
mod streaming;

use std::io::{self, Read};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use eyre::{eyre, Result};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::cli::chat::ChatContext;
use crate::config::Config;
use crate::map::{search_query, Geocoder, GoogleGeocoder};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Ask a single question and exit
    #[arg(short, long)]
    input: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Don't geocode or map the addresses in replies
    #[arg(long, global = true)]
    no_map: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a chat session
    Chat {
        /// Ask a single question and exit
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Print the addresses found in a text (read from stdin when omitted)
    Extract { text: Option<String> },
    /// Resolve one address to a coordinate
    Geocode { address: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Some(Commands::Extract { text }) => extract(text),
        Some(Commands::Geocode { address }) => geocode(&address).await,
        Some(Commands::Chat { input }) => chat(input.or(cli.input), cli.no_map).await,
        // Default to chat if no subcommand is provided
        None => chat(cli.input, cli.no_map).await,
    }
}

async fn chat(input: Option<String>, no_map: bool) -> Result<ExitCode> {
    info!("Starting Amsterdam restaurant chat");
    let interactive = input.is_none();
    let mut chat_context = ChatContext::new(Box::new(io::stdout()), input, interactive, !no_map);
    chat_context.run().await
}

fn extract(text: Option<String>) -> Result<ExitCode> {
    let text = match text {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    for address in address::extract(&text) {
        println!("{}", address);
    }
    Ok(ExitCode::SUCCESS)
}

async fn geocode(address: &str) -> Result<ExitCode> {
    let config = Config::from_env()?;
    let geocoder = GoogleGeocoder::new(config.google_maps_api_key.as_deref())?;

    let query = search_query(address);
    let position = geocoder
        .geocode(&query)
        .await
        .map_err(|e| eyre!("Could not geocode {}: {}", query, e))?;
    println!("{:.6}, {:.6}", position.lat, position.lng);
    Ok(ExitCode::SUCCESS)
}
