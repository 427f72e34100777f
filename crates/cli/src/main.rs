mod batches;
mod chain;
mod config;
mod verify;

use std::error::Error;
use std::future::Future;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use asali_backend::{HttpBackend, TokenStore};
use asali_ledger::{ChainClient, ChainError, ConnectionManager, RpcWallet};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use time::Date;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

use config::Settings;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

pub(crate) type CmdResult<T> = Result<T, Box<dyn Error>>;

/// AsaliTrace honey batch traceability: database and ledger reconciliation.
#[derive(Parser)]
#[command(
    name = "asali",
    version,
    about = "AsaliTrace batch verification and ledger tooling"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Log debug events to stderr (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    verbose: bool,

    /// Path to a TOML config file (default: ./asali.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved configuration (tokens redacted)
    Config,

    /// Direct ledger node commands
    Node {
        #[command(subcommand)]
        command: NodeCommands,
    },

    /// Compare a batch's database record with its ledger record
    Verify {
        /// Business batch id, e.g. B-2024-001
        batch_id: String,
        /// Let the backend read the ledger instead of connecting directly
        #[arg(long)]
        via_backend: bool,
    },

    /// Ask the backend to record a batch on chain
    Record {
        /// Business batch id
        batch_id: String,
        /// On-chain description (default: derived from the batch fields)
        #[arg(long)]
        description: Option<String>,
    },

    /// Backend batch records
    Batches {
        #[command(subcommand)]
        command: BatchCommands,
    },

    /// Read from or write to the contract directly
    Chain {
        #[command(subcommand)]
        command: ChainCommands,
    },
}

#[derive(Subcommand)]
enum NodeCommands {
    /// Connect to the node and report chain id, account and block number
    Status,
}

#[derive(Subcommand)]
enum BatchCommands {
    /// List batches stored in the database
    List,
    /// Create a batch; the backend also writes it on chain
    Create {
        /// Business batch id
        batch_id: String,
        #[arg(long)]
        producer: String,
        #[arg(long)]
        honey_type: String,
        /// Quantity in kilograms
        #[arg(long)]
        quantity: Decimal,
        /// Production date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        production_date: Date,
    },
}

#[derive(Subcommand)]
enum ChainCommands {
    /// Read a batch from the contract
    GetBatch { batch_id: String },
    /// Read a lab test from the contract
    GetLabTest { test_id: String },
    /// Read a certificate from the contract
    GetCertificate { cert_id: String },
    /// Write a batch with the node's first account
    CreateBatch {
        batch_id: String,
        #[arg(long)]
        description: String,
    },
    /// Write a lab test with the node's first account
    AddLabTest {
        test_id: String,
        #[arg(long)]
        batch_id: String,
        #[arg(long)]
        result: String,
    },
    /// Write a certificate with the node's first account
    IssueCertificate {
        cert_id: String,
        #[arg(long)]
        batch_id: String,
        #[arg(long)]
        issuer: String,
    },
}

fn parse_date(s: &str) -> Result<Date, String> {
    asali_backend::model::date_format::parse(s).map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            report_error(&e.to_string(), cli.output, cli.quiet);
            process::exit(1);
        }
    };
    let runtime = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(
                &format!("failed to start async runtime: {}", e),
                cli.output,
                cli.quiet,
            );
            process::exit(1);
        }
    };
    let ctx = Context {
        settings,
        output: cli.output,
        quiet: cli.quiet,
        runtime,
    };

    match cli.command {
        Commands::Config => cmd_config(&ctx),
        Commands::Node {
            command: NodeCommands::Status,
        } => chain::cmd_node_status(&ctx),
        Commands::Verify {
            batch_id,
            via_backend,
        } => verify::cmd_verify(&ctx, &batch_id, via_backend),
        Commands::Record {
            batch_id,
            description,
        } => verify::cmd_record(&ctx, &batch_id, description.as_deref()),
        Commands::Batches { command } => match command {
            BatchCommands::List => batches::cmd_list(&ctx),
            BatchCommands::Create {
                batch_id,
                producer,
                honey_type,
                quantity,
                production_date,
            } => batches::cmd_create(
                &ctx,
                batches::CreateArgs {
                    batch_id,
                    producer_name: producer,
                    honey_type,
                    quantity,
                    production_date,
                },
            ),
        },
        Commands::Chain { command } => match command {
            ChainCommands::GetBatch { batch_id } => chain::cmd_get_batch(&ctx, &batch_id),
            ChainCommands::GetLabTest { test_id } => chain::cmd_get_lab_test(&ctx, &test_id),
            ChainCommands::GetCertificate { cert_id } => {
                chain::cmd_get_certificate(&ctx, &cert_id)
            }
            ChainCommands::CreateBatch {
                batch_id,
                description,
            } => chain::cmd_create_batch(&ctx, &batch_id, &description),
            ChainCommands::AddLabTest {
                test_id,
                batch_id,
                result,
            } => chain::cmd_add_lab_test(&ctx, &test_id, &batch_id, &result),
            ChainCommands::IssueCertificate {
                cert_id,
                batch_id,
                issuer,
            } => chain::cmd_issue_certificate(&ctx, &cert_id, &batch_id, &issuer),
        },
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_config(ctx: &Context) {
    let shown = ctx.settings.redacted();
    ctx.finish(Ok(shown), |s| {
        toml::to_string_pretty(s).unwrap_or_else(|e| format!("serialization error: {}", e))
    });
}

// ──────────────────────────────────────────────
// Shared command context
// ──────────────────────────────────────────────

pub(crate) struct Context {
    pub(crate) settings: Settings,
    pub(crate) output: OutputFormat,
    pub(crate) quiet: bool,
    runtime: Runtime,
}

impl Context {
    pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub(crate) fn chain_client(&self) -> Result<ChainClient, ChainError> {
        Ok(ChainClient::new(self.settings.contract_config()?))
    }

    /// Connection manager for the configured node, plus the wallet bridge if set.
    pub(crate) fn connection(&self) -> ConnectionManager {
        let chain = &self.settings.chain;
        let manager = ConnectionManager::for_endpoint(&chain.rpc_url, chain.chain_id);
        match &chain.wallet_url {
            Some(url) => manager.with_wallet(Arc::new(RpcWallet::new(url))),
            None => manager,
        }
    }

    pub(crate) fn backend(&self) -> HttpBackend {
        let tokens = TokenStore::new(
            self.settings.backend.access_token.clone(),
            self.settings.backend.refresh_token.clone(),
        );
        HttpBackend::new(&self.settings.backend.api_url, Arc::new(tokens))
    }

    /// Print `result` and exit 1 on error.
    pub(crate) fn finish<T, F>(&self, result: CmdResult<T>, render: F)
    where
        T: Serialize,
        F: FnOnce(&T) -> String,
    {
        match result {
            Ok(value) => match self.output {
                OutputFormat::Json => match serde_json::to_string_pretty(&value) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        report_error(&format!("serialization error: {}", e), self.output, false);
                        process::exit(1);
                    }
                },
                OutputFormat::Text => {
                    let text = render(&value);
                    println!("{}", text.trim_end());
                }
            },
            Err(e) => {
                report_error(&e.to_string(), self.output, self.quiet);
                process::exit(1);
            }
        }
    }

    /// A non-fatal notice on stderr, suppressed by `--quiet`.
    pub(crate) fn warn(&self, msg: &str) {
        if !self.quiet && self.output == OutputFormat::Text {
            eprintln!("warning: {}", msg);
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    match output {
        OutputFormat::Text => {
            if !quiet {
                eprintln!("error: {}", msg);
            }
        }
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
