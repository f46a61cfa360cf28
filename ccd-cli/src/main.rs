use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ccd_cli::metrics::{self, PrometheusMetrics};
use ccd_cli::params::{load_from_file, set_override};
use ccd_storage::{
    CcdDriver, DriverConfig, DriverParameters, FileWriter, RequestContext, StorageDriver,
};

const UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Parser)]
#[command(version, about = "Access Cloud Content Delivery buckets through the ccd storage driver")]
struct Cli {
    #[command(flatten)]
    driver: DriverArgs,

    #[arg(
        long,
        global = true,
        default_value = "info",
        help = "Log level (error, warn, info, debug, trace). Can also be set via RUST_LOG env var"
    )]
    log_level: String,

    #[arg(long, global = true, help = "Print Prometheus metrics to stderr when done")]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct DriverArgs {
    #[arg(long, global = true, env = "CCD_APIKEY", hide_env_values = true)]
    apikey: Option<String>,

    #[arg(long, global = true, env = "CCD_ENVIRONMENT", help = "Target environment (prod, stage)")]
    environment: Option<String>,

    #[arg(long, global = true, help = "Bucket used for paths outside a repository")]
    bucket: Option<String>,

    #[arg(long, global = true, help = "Scratch directory for writer staging files")]
    root_directory: Option<PathBuf>,

    #[arg(long, global = true, help = "Entries requested per listing page")]
    page_size: Option<u32>,

    #[arg(long, global = true, help = "TOML file with driver parameters")]
    config: Option<PathBuf>,
}

impl DriverArgs {
    /// Merges the config file with command line values, the latter taking precedence
    fn parameters(&self) -> Result<DriverParameters> {
        if self.page_size == Some(0) {
            bail!("--page-size must be a positive number");
        }
        if matches!(&self.bucket, Some(bucket) if bucket.is_empty()) {
            bail!("--bucket must not be empty");
        }

        let mut params = match &self.config {
            Some(path) => load_from_file(path)?,
            None => DriverParameters::new(),
        };

        set_override(&mut params, "apikey", self.apikey.clone());
        set_override(&mut params, "environment", self.environment.clone());
        set_override(
            &mut params,
            "rootdirectory",
            self.root_directory
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        );
        set_override(&mut params, "pagesize", self.page_size);

        Ok(params)
    }

    fn context(&self) -> RequestContext {
        match &self.bucket {
            Some(bucket) => RequestContext::new().with_name(bucket.clone()),
            None => RequestContext::new(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download the content stored at a path
    Get {
        path: String,
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Upload a local file through a staged writer
    Put {
        path: String,
        file: PathBuf,
        /// Continue a previously closed, uncommitted upload
        #[arg(long)]
        append: bool,
    },

    /// Stream content starting at an offset
    Cat {
        path: String,
        #[arg(long, default_value = "0")]
        offset: u64,
    },

    /// Show size and modification time
    Stat { path: String },

    /// List entries below a path
    Ls { path: String },

    /// Move content to another path
    Mv { source: String, dest: String },

    /// Delete a path and everything below it
    Rm { path: String },
}

fn setup_tracing(log_level: &str) {
    // Try to use RUST_LOG env var first, fall back to CLI flag
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", log_level);
            EnvFilter::new("info")
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    setup_tracing(&cli.log_level);

    run(cli)
}

#[tokio::main]
async fn run(cli: Cli) -> Result<()> {
    let config = DriverConfig::from_parameters(&cli.driver.parameters()?)
        .context("Invalid driver configuration")?;
    info!(environment = %config.environment, "Using ccd storage driver");

    let mut driver = CcdDriver::new(config)?;
    if cli.print_metrics {
        driver = driver.with_metrics(PrometheusMetrics::shared());
    }
    let ctx = cli.driver.context();

    let result = execute(&driver, &ctx, cli.command).await;

    if cli.print_metrics {
        eprint!("{}", metrics::render()?);
    }
    result
}

async fn execute(driver: &CcdDriver, ctx: &RequestContext, command: Command) -> Result<()> {
    match command {
        Command::Get { path, output } => {
            let content = driver.get_content(ctx, &path).await?;
            match output {
                Some(file) => tokio::fs::write(&file, &content)
                    .await
                    .with_context(|| format!("Failed to write {}", file.display()))?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&content).await?;
                    stdout.flush().await?;
                }
            }
        }
        Command::Put { path, file, append } => {
            let mut source = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let mut writer = driver.writer(ctx, &path, append).await?;

            if let Err(e) = upload(&mut source, writer.as_mut()).await {
                if let Err(cancel_err) = writer.cancel().await {
                    warn!(error = %cancel_err, "Failed to cancel writer");
                }
                return Err(e);
            }
            info!(path = %path, size = writer.size(), "Uploaded");
        }
        Command::Cat { path, offset } => {
            let mut stream = driver.reader(ctx, &path, offset).await?;
            let mut stdout = tokio::io::stdout();
            while let Some(chunk) = stream.next().await {
                stdout.write_all(&chunk?).await?;
            }
            stdout.flush().await?;
        }
        Command::Stat { path } => {
            let info = driver.stat(ctx, &path).await?;
            println!("{}\t{}\t{}", info.size, info.mod_time.to_rfc3339(), info.path);
        }
        Command::Ls { path } => {
            for entry in driver.list(ctx, &path).await? {
                println!("{}", entry);
            }
        }
        Command::Mv { source, dest } => {
            driver.move_object(ctx, &source, &dest).await?;
        }
        Command::Rm { path } => {
            driver.delete(ctx, &path).await?;
        }
    }

    Ok(())
}

/// Copies a local file into the writer and commits it
async fn upload(source: &mut tokio::fs::File, writer: &mut dyn FileWriter) -> Result<()> {
    let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write(&buf[..n]).await?;
    }
    writer.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_parameters() {
        let cli = Cli::try_parse_from([
            "ccd",
            "--apikey",
            "secret",
            "--environment",
            "stage",
            "--page-size",
            "25",
            "ls",
            "/docker/registry/v2/repositories/foo",
        ])
        .unwrap();

        let config = DriverConfig::from_parameters(&cli.driver.parameters().unwrap()).unwrap();
        assert_eq!(config.api_key, "secret");
        assert_eq!(config.page_size, 25);
        assert!(matches!(cli.command, Command::Ls { .. }));
        assert_eq!(cli.driver.context().name(), None);
    }

    #[test]
    fn test_bucket_fills_context_name() {
        let cli = Cli::try_parse_from(["ccd", "stat", "/blobs/x", "--bucket", "library/ubuntu"])
            .unwrap();
        assert_eq!(cli.driver.context().name(), Some("library/ubuntu"));
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let cli = Cli::try_parse_from(["ccd", "--page-size", "0", "rm", "/a"]).unwrap();
        assert!(cli.driver.parameters().is_err());
    }
}
