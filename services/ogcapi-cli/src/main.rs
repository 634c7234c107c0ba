//! ogcapi
//!
//! Runs feature queries and process jobs against configured datasets and
//! prints the resulting JSON documents.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feature_query::RawQueryParams;
use ogc_common::{CrsCode, OgcError};
use processes::JobMode;
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use ogcapi_cli::app::exception;
use ogcapi_cli::{App, AppConfig};

#[derive(Parser, Debug)]
#[command(name = "ogcapi")]
#[command(about = "Query OGC API feature collections and run processes")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config/ogcapi.yaml", env = "OGCAPI_CONFIG")]
    config: PathBuf,

    /// Directory of additional dataset files
    #[arg(long, env = "OGCAPI_DATASETS_DIR")]
    datasets_dir: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "warn", env = "RUST_LOG")]
    log_level: String,

    /// Pretty-print output
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List collections
    Collections,
    /// Query a collection; parameters are key=value pairs such as bbox=0,0,1,1
    Query {
        collection: String,
        params: Vec<String>,
    },
    /// Fetch one feature
    Get {
        collection: String,
        id: String,
        #[arg(long, default_value = "CRS84")]
        crs: CrsCode,
    },
    /// Insert a GeoJSON feature read from a file, or `-` for stdin
    Create {
        collection: String,
        file: PathBuf,
        #[arg(long, default_value = "CRS84")]
        crs: CrsCode,
    },
    /// Delete a feature
    Delete { collection: String, id: String },
    /// List processes, or describe one
    Processes { id: Option<String> },
    /// Run a process
    Execute {
        process: String,
        /// Inputs as a JSON object
        #[arg(long, default_value = "{}")]
        inputs: String,
        /// Run in the background and print the job status
        #[arg(long = "async")]
        run_async: bool,
        /// With --async, wait this many seconds for the job to finish
        #[arg(long)]
        wait: Option<f64>,
    },
    /// Inspect and control jobs
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum JobsCommand {
    List,
    Status { id: String },
    Result { id: String },
    Cancel { id: String },
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let pretty = args.pretty;
    match run(args).await {
        Ok(output) => print(&output, pretty),
        Err(err) => match err.downcast_ref::<OgcError>() {
            Some(ogc) => {
                print(&exception(ogc), pretty);
                std::process::exit(2);
            }
            None => {
                error!("{:#}", err);
                eprintln!("error: {:#}", err);
                std::process::exit(1);
            }
        },
    }
}

async fn run(args: Args) -> Result<Value> {
    let config = AppConfig::load(&args.config, args.datasets_dir.as_deref())?;
    let app = App::init(&config)
        .await
        .context("Failed to initialize application")?;

    info!(command = ?args.command, "Running command");
    let output = match args.command {
        Command::Collections => app.collections()?,
        Command::Query { collection, params } => {
            let params = RawQueryParams::parse_assignments(&params)?;
            app.query(&collection, &params).await?
        }
        Command::Get { collection, id, crs } => app.get_feature(&collection, &id, crs).await?,
        Command::Create {
            collection,
            file,
            crs,
        } => {
            let body = read_json(&file)?;
            app.create_feature(&collection, body, crs).await?
        }
        Command::Delete { collection, id } => app.delete_feature(&collection, &id).await?,
        Command::Processes { id: None } => app.processes()?,
        Command::Processes { id: Some(id) } => app.describe(&id)?,
        Command::Execute {
            process,
            inputs,
            run_async,
            wait,
        } => {
            let inputs: Value =
                serde_json::from_str(&inputs).context("--inputs must be a JSON object")?;
            let mode = if run_async { JobMode::Async } else { JobMode::Sync };
            let wait = wait
                .map(Duration::try_from_secs_f64)
                .transpose()
                .context("--wait must be a non-negative number of seconds")?;
            app.execute(&process, inputs, mode, wait).await?
        }
        Command::Jobs { command } => match command {
            JobsCommand::List => app.list_jobs().await?,
            JobsCommand::Status { id } => app.job_status(&id).await?,
            JobsCommand::Result { id } => app.job_result(&id).await?,
            JobsCommand::Cancel { id } => app.cancel_job(&id).await?,
        },
    };
    Ok(output)
}

fn read_json(path: &Path) -> Result<Value> {
    let content = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")?
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read: {}", path.display()))?
    };
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn print(value: &Value, pretty: bool) {
    let text = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match text {
        Ok(text) => println!("{}", text),
        Err(err) => eprintln!("error: {}", err),
    }
}
