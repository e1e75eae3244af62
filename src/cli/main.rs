use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use exif_describe::ai::OllamaClient;
use exif_describe::config::Config;
use exif_describe::exif::{self, GpsCoords, MetadataTags};
use exif_describe::pipeline::{self, Mode, Settings};

#[derive(Parser, Debug)]
#[command(
    name = "exif-describe",
    version,
    about = "Describe photos with a local vision model and store the result in their EXIF metadata"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Override the inference endpoint URL
    #[arg(long, value_name = "URL", global = true)]
    endpoint: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the model's description of each image without modifying anything
    Ask {
        /// Image file or directory
        #[arg(value_name = "PATH")]
        path: PathBuf,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Write the model's description into each image's EXIF ImageDescription
    Update {
        /// Image file or directory
        #[arg(value_name = "PATH")]
        path: PathBuf,

        #[command(flatten)]
        model: ModelArgs,

        /// Output directory (relative paths resolve against each image's directory)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Display description, artist, capture time and GPS of each image
    Show {
        /// Image file or directory
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Write GPS coordinates, capture time and/or artist without a model
    Tag {
        /// Image file or directory
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Latitude in decimal degrees (negative for south)
        #[arg(long, allow_hyphen_values = true, requires = "lon")]
        lat: Option<f64>,

        /// Longitude in decimal degrees (negative for west)
        #[arg(long, allow_hyphen_values = true, requires = "lat")]
        lon: Option<f64>,

        /// Capture time, e.g. "2024:06:01 18:30:00"
        #[arg(long, value_name = "TIME")]
        date: Option<String>,

        /// Photographer name
        #[arg(long, value_name = "NAME")]
        artist: Option<String>,

        /// Output directory (relative paths resolve against each image's directory)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct ModelArgs {
    /// Model name (default from config: gemma3:latest)
    #[arg(short, long, value_name = "NAME")]
    model: Option<String>,

    /// Per-image timeout in seconds (default from config: 180)
    #[arg(short, long, value_name = "SECONDS")]
    timeout: Option<u64>,
}

impl ModelArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(ref model) = self.model {
            config.inference.model = model.clone();
        }
        if let Some(timeout) = self.timeout {
            config.inference.timeout_secs = timeout;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version land here too
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Handle --init
    if cli.init {
        let path = Config::default().save(cli.config.as_deref())?;
        println!("Default config written to {}", path.display());
        return Ok(());
    }

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        eprintln!("{}", Cli::command().render_help());
        std::process::exit(1);
    };

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(endpoint) = cli.endpoint {
        config.inference.endpoint = endpoint;
    }

    let mut out = std::io::stdout();

    match command {
        Command::Ask { path, model } => {
            model.apply(&mut config);
            describe(&path, Mode::Ask, &config, &mut out).await?;
        }
        Command::Update {
            path,
            model,
            output,
        } => {
            model.apply(&mut config);
            describe(&path, Mode::Update { output }, &config, &mut out).await?;
        }
        Command::Show { path } => {
            pipeline::show_images(&path, &mut out)?;
        }
        Command::Tag {
            path,
            lat,
            lon,
            date,
            artist,
            output,
        } => {
            let taken_at = match date {
                Some(ref text) => Some(
                    exif::parse_timestamp(text)
                        .with_context(|| format!("Unrecognized date/time: {text}"))?,
                ),
                None => None,
            };
            let tags = MetadataTags {
                gps: lat
                    .zip(lon)
                    .map(|(latitude, longitude)| GpsCoords { latitude, longitude }),
                taken_at,
                artist,
            };
            let settings = Settings::from_config(&config);
            pipeline::tag_images(&path, &tags, output.as_deref(), &settings, &mut out)?;
        }
    }

    Ok(())
}

async fn describe(path: &Path, mode: Mode, config: &Config, out: &mut std::io::Stdout) -> Result<()> {
    let client = OllamaClient::new(&config.inference.endpoint);
    let settings = Settings::from_config(config);
    log::info!(
        "Using model {} at {} (timeout {}s)",
        settings.model,
        config.inference.endpoint,
        config.inference.timeout_secs
    );
    pipeline::describe_images(path, &mode, &client, &settings, out).await?;
    Ok(())
}
