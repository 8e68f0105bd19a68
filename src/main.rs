use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use vitals::aggregator::{daily_summaries, DailySummary};
use vitals::config::Config;
use vitals::error::ConfigError;
use vitals::export::write_csv;
use vitals::poller::Poller;
use vitals::server::{self, AppState};
use vitals::telemetry::{CouchDbSource, TelemetrySource};

/// Command-line arguments for the vitals monitoring service
#[derive(Parser)]
#[command(
    name = "vitals",
    about = "Vitals monitor - serve, summarize and export patient vitals readings",
    long_about = "Reads heart rate, SpO2 and temperature readings from a CouchDB-backed \
                  telemetry store, serves them over a REST API with threshold alerts, \
                  daily summaries and CSV export, and keeps a live window of recent readings."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Run the HTTP API and live poller (default)
    Serve,

    /// Fetch once and print per-day statistics
    Summary,

    /// Fetch once and write readings as CSV
    Export {
        /// Output file; stdout if omitted
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in load_config
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        if let Some(Command::Export {
            output: Some(ref output),
        }) = self.command
        {
            if output.is_dir() {
                return Err(format!(
                    "Export output path is a directory: {}",
                    output.display()
                ));
            }
        }

        Ok(())
    }

    /// Convert config path to string safely, handling non-UTF-8 paths
    ///
    /// # Returns
    ///
    /// `Ok(Some(path_str))` if config is provided and valid UTF-8,
    /// `Ok(None)` if no config provided,
    /// `Err(String)` if config path contains invalid UTF-8
    fn config_path_str(&self) -> Result<Option<&str>, String> {
        match &self.config {
            Some(path) => match path.to_str() {
                Some(path_str) => Ok(Some(path_str)),
                None => Err(format!(
                    "Configuration file path contains invalid UTF-8 characters: {}",
                    path.display()
                )),
            },
            None => Ok(None),
        }
    }
}

/// Wires the telemetry source, live poller and HTTP server together
pub struct VitalsService {
    config: Config,
    source: Arc<dyn TelemetrySource>,
    poller: Arc<Poller>,
}

impl VitalsService {
    /// Create a new service with the given configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the telemetry client cannot be created or the
    /// SpO2 cipher settings are invalid.
    pub fn new(config: Config) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        info!("Initializing VitalsService with configuration");

        // Initialize the telemetry client
        let mut couchdb = CouchDbSource::new(
            config.telemetry.url.clone(),
            config.telemetry.username.clone(),
            config.telemetry.password.clone(),
            config.telemetry_timeout(),
        )?;
        if let Some(cipher) = config.spo2_cipher()? {
            couchdb = couchdb.with_cipher(cipher);
        }
        info!(
            "Reading telemetry from {} (encrypted SpO2: {})",
            couchdb.url(),
            couchdb.decrypts_spo2()
        );
        let source: Arc<dyn TelemetrySource> = Arc::new(couchdb);

        // Initialize the live poller; it stays idle until serve()
        let poller = Arc::new(Poller::new(
            Arc::clone(&source),
            config.poll_interval(),
            config.polling.window_size,
        ));

        Ok(Self {
            config,
            source,
            poller,
        })
    }

    /// Load configuration from file or use defaults
    ///
    /// # Arguments
    ///
    /// * `config_path` - Optional path to configuration file
    ///
    /// # Returns
    ///
    /// Loaded configuration or default configuration if file not found or invalid
    pub fn load_config(config_path: Option<&str>) -> Result<Config, ConfigError> {
        match config_path {
            Some(path) => {
                info!("Loading configuration from: {}", path);
                match Config::from_file(std::path::Path::new(path)) {
                    Ok(config) => Ok(config),
                    Err(ConfigError::ReadError(_)) => {
                        warn!(
                            "Configuration file '{}' not found or unreadable, using defaults",
                            path
                        );
                        Ok(Config::default())
                    }
                    Err(e) => {
                        error!("Configuration error in '{}': {}", path, e);
                        warn!("Using default configuration due to invalid config file");
                        Ok(Config::default())
                    }
                }
            }
            None => {
                info!("Using default configuration");
                Ok(Config::default())
            }
        }
    }

    /// Run the poller and HTTP server until `shutdown` fires
    pub async fn serve(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Starting VitalsService components");

        // Start polling first so the live view fills while the server binds
        self.poller.start();

        // Build handler state and serve until the shutdown signal
        let state = Arc::new(AppState::new(
            Arc::clone(&self.source),
            Arc::clone(&self.poller),
            &self.config,
        ));
        let result = server::run(&self.config.bind_address(), state, shutdown).await;

        // Stop the poller whether or not the server exited cleanly
        self.poller.stop().await;

        let stats = self.poller.stats();
        info!(
            "Poller totals: {} applied, {} failed, {} discarded",
            stats.applied, stats.failed, stats.discarded
        );

        result?;
        Ok(())
    }

    /// Fetch once and print the daily summary table to stdout
    pub async fn print_summary(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Single fetch, no poller
        let readings = self.source.fetch().await?;
        let summaries = daily_summaries(&readings, self.config.report_offset());
        info!(
            "Summarized {} readings into {} days",
            readings.len(),
            summaries.len()
        );

        let mut stdout = io::stdout().lock();
        stdout.write_all(format_summary_table(&summaries).as_bytes())?;
        stdout.flush()?;
        Ok(())
    }

    /// Fetch once and write the CSV export to `output` or stdout
    pub async fn export(
        &self,
        output: Option<&PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let readings = self.source.fetch().await?;
        let offset = self.config.report_offset();

        match output {
            Some(path) => {
                let mut writer = BufWriter::new(File::create(path)?);
                write_csv(&mut writer, &readings, offset)?;
                info!("Exported {} readings to {}", readings.len(), path.display());
            }
            None => {
                let mut stdout = io::stdout().lock();
                write_csv(&mut stdout, &readings, offset)?;
            }
        }
        Ok(())
    }
}

/// Render daily summaries as a fixed-width text table
fn format_summary_table(summaries: &[DailySummary]) -> String {
    let mut table = format!(
        "{:<10}  {:>5}  {:>22}  {:>22}\n",
        "Date", "Count", "Heart rate avg/min/max", "SpO2 avg/min/max"
    );

    if summaries.is_empty() {
        table.push_str("(no readings)\n");
        return table;
    }

    for summary in summaries {
        let heart_rate = format!(
            "{:.1}/{}/{}",
            summary.heart_rate.avg, summary.heart_rate.min, summary.heart_rate.max
        );
        let spo2 = format!(
            "{:.1}/{}/{}",
            summary.spo2.avg, summary.spo2.min, summary.spo2.max
        );
        table.push_str(&format!(
            "{:<10}  {:>5}  {:>22}  {:>22}\n",
            summary.date, summary.count, heart_rate, spo2
        ));
    }
    table
}

fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting vitals monitor");

    // Validate CLI arguments
    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    // Load configuration with safe path handling
    let config_path = match cli.config_path_str() {
        Ok(path) => path,
        Err(e) => {
            error!("Invalid configuration path: {}", e);
            std::process::exit(1);
        }
    };

    let config = match VitalsService::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Create the service
    let service = match VitalsService::new(config) {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to initialize VitalsService: {}", e);
            std::process::exit(1);
        }
    };

    // Async runtime for the server, poller and one-shot fetches
    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            // Set up signal handling for graceful shutdown
            let (shutdown_sender, shutdown_receiver) = watch::channel(false);
            if let Err(e) = ctrlc::set_handler(move || {
                info!("Received interrupt signal (SIGINT), shutting down gracefully...");
                if let Err(e) = shutdown_sender.send(true) {
                    error!("Failed to send shutdown signal: {}", e);
                }
            }) {
                error!("Error setting SIGINT handler for graceful shutdown: {}", e);
                std::process::exit(1);
            }

            info!("Vitals monitor is running. Press Ctrl+C to stop.");
            runtime.block_on(service.serve(shutdown_receiver))
        }
        Command::Summary => runtime.block_on(service.print_summary()),
        Command::Export { output } => runtime.block_on(service.export(output.as_ref())),
    };

    if let Err(e) = result {
        error!("Vitals monitor failed: {}", e);
        std::process::exit(1);
    }

    info!("Vitals monitor shutdown complete");
}
