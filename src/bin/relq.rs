//! relq: query compiler CLI
//!
//! Compile method-chain queries against a metadata model, inspect the
//! generated SQL, or run them against a database.
//!
//! # Usage
//!
//! ```bash
//! # Show the SQL, parameters and shaper
//! relq --model model.toml explain "Product.where(p => p.Price >= 10).take(5)"
//!
//! # Same query for SQL Server 2008
//! relq --model model.toml --dialect sqlserver2008 explain "Product.skip(10).take(5)"
//!
//! # Execute with parameters
//! relq --model model.toml run "Product.where(p => p.Price >= $min)" \
//!     --database-url sqlite://shop.db --bind min=10
//! ```

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use relq::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relq")]
#[command(version)]
#[command(about = "Relational query compiler", long_about = None)]
#[command(after_help = "EXAMPLES:
    relq parse 'Product.where(p => p.Price > 10)'
    relq --model model.toml explain 'Product.order_by(p => p.Name).take(5)'
    relq --model model.toml run 'Product.first()' --database-url sqlite://shop.db")]
struct Cli {
    /// Config file (default: <config dir>/relq/config.toml)
    #[arg(short, long, env = "RELQ_CONFIG")]
    config: Option<PathBuf>,

    /// Metadata model file
    #[arg(short, long, env = "RELQ_MODEL")]
    model: Option<PathBuf>,

    /// SQL dialect (sqlite, postgres, sqlserver, sqlserver2008)
    #[arg(short, long)]
    dialect: Option<Dialect>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a query and print its query model
    Parse {
        query: String,
    },
    /// Compile a query and show the SQL, parameters and shaper
    Explain {
        query: String,
    },
    /// Compile and execute a query
    Run {
        query: String,

        /// Database connection URL
        #[arg(long, env = "RELQ_DATABASE_URL")]
        database_url: Option<String>,

        /// Parameter bindings (name=value)
        #[arg(short, long, value_delimiter = ',')]
        bind: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// List the built-in dialects
    Dialects,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "relq=debug" } else { "relq=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Parse { query } => parse_query(query),
        Commands::Explain { query } => {
            let config = load_config(cli)?;
            explain_query(&compiler(&config)?, query)
        }
        Commands::Run {
            query,
            database_url,
            bind,
            format,
        } => {
            let config = load_config(cli)?;
            let url = database_url
                .clone()
                .or_else(|| config.database_url.clone())
                .ok_or_else(|| {
                    anyhow!("No database URL. Use --database-url or set RELQ_DATABASE_URL")
                })?;
            execute_query(compiler(&config)?, &url, query, bind, format, cli.verbose).await
        }
        Commands::Dialects => {
            show_dialects();
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<RelqConfig> {
    let mut config = match &cli.config {
        Some(path) => RelqConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RelqConfig::load_default()?,
    };
    if let Some(model) = &cli.model {
        config.model_path = Some(model.clone());
    }
    if let Some(dialect) = cli.dialect {
        config.dialect = dialect;
        config.custom_dialect = None;
    }
    Ok(config)
}

fn compiler(config: &RelqConfig) -> Result<QueryCompiler> {
    if config.model_path.is_none() {
        return Err(anyhow!("No model. Use --model or set model_path in the config"));
    }
    let model = config.load_model().context("Failed to load model")?;
    Ok(config.compiler(Arc::new(model)))
}

fn parse_query(query: &str) -> Result<()> {
    let model = relq::parse(query)?;
    println!("{}", "Query model:".green().bold());
    println!("{}", model.to_string().white());
    Ok(())
}

fn explain_query(compiler: &QueryCompiler, query: &str) -> Result<()> {
    let prepared = compiler.compile_text(query)?;
    let compiled = prepared.compiled();

    println!(
        "{} {}",
        "Dialect:".dimmed(),
        compiled.dialect.to_string().cyan()
    );
    println!();

    for (split, command) in compiled
        .translation
        .splits
        .iter()
        .zip(&compiled.split_commands)
    {
        println!(
            "{} {}",
            "Split query:".green().bold(),
            split.path.cyan()
        );
        println!("{}", command.text.white());
        println!();
    }

    println!("{}", "Generated SQL:".green().bold());
    println!("{}", compiled.command.text.white());

    if !compiled.command.parameters.is_empty() {
        println!();
        println!("{}", "Parameters:".cyan());
        for (i, name) in compiled.command.parameters.iter().enumerate() {
            let literal = prepared
                .literals()
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| format!(" = {}", v))
                .unwrap_or_default();
            println!("  {:>2}. {}{}", i + 1, name.yellow(), literal);
        }
    }

    println!();
    println!("{} {:?}", "Shaper:".cyan(), compiled.shaper());
    println!("{} {:?}", "Result:".cyan(), compiled.terminal());

    if !compiled.diagnostics().is_empty() {
        println!();
        for diagnostic in compiled.diagnostics() {
            println!("{} {}", "⚠".yellow(), diagnostic.to_string().yellow());
        }
    }
    Ok(())
}

async fn execute_query(
    compiler: QueryCompiler,
    url: &str,
    query: &str,
    bindings: &[String],
    format: &OutputFormat,
    verbose: bool,
) -> Result<()> {
    if verbose {
        println!("{} {}", "Connecting to:".dimmed(), url);
    }
    let db = Database::connect(url, compiler).await?;

    let mut qry = db.query(query);
    for binding in bindings {
        let (name, raw) = binding
            .split_once('=')
            .ok_or_else(|| anyhow!("Binding '{}' is not name=value", binding))?;
        qry = qry.bind(name.trim_start_matches('$'), parse_binding(raw));
    }

    if verbose {
        println!("{} {}", "SQL:".dimmed(), qry.sql()?.yellow());
    }

    let (results, uow) = qry.fetch_all().await?;
    let rows: Vec<serde_json::Value> = results.iter().map(|r| r.to_json(&uow)).collect();
    format_output(&rows, format);
    Ok(())
}

/// Numbers, booleans and `null` are typed; anything else is text.
fn parse_binding(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        Value::Int(n)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Float(f)
    } else {
        match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            "null" => Value::Null,
            _ => Value::Text(raw.to_string()),
        }
    }
}

fn format_output(results: &[serde_json::Value], format: &OutputFormat) {
    if results.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(results).unwrap_or_default());
        }
        OutputFormat::Table => {
            let Some(first) = results[0].as_object() else {
                for value in results {
                    println!("{}", val_to_string(value));
                }
                return;
            };

            // Get column names from first row
            let columns: Vec<&String> = first.keys().collect();

            // Calculate column widths
            let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
            for row in results {
                for (i, col) in columns.iter().enumerate() {
                    let len = row.get(col.as_str()).map(val_to_string).unwrap_or_default().len();
                    widths[i] = widths[i].max(len);
                }
            }

            let header: Vec<String> = columns
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:width$}", c, width = w))
                .collect();
            println!("{}", header.join(" │ ").white().bold());

            let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
            println!("{}", sep.join("─┼─").dimmed());

            for row in results {
                let cells: Vec<String> = columns
                    .iter()
                    .zip(&widths)
                    .map(|(c, w)| {
                        let val = row.get(c.as_str()).map(val_to_string).unwrap_or_default();
                        format!("{:width$}", val, width = w)
                    })
                    .collect();
                println!("{}", cells.join(" │ "));
            }

            println!();
            println!("{} row(s) returned", results.len().to_string().cyan());
        }
    }
}

fn val_to_string(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn show_dialects() {
    println!("{}", "Built-in dialects".cyan().bold());
    println!();
    for dialect in Dialect::ALL {
        let generator = dialect.generator();
        let caps = generator.capabilities();
        println!(
            "  {:<14} paging: {:<13} placeholders: {:?}",
            dialect.name().green(),
            format!("{:?}", caps.paging),
            caps.placeholder
        );
    }
    println!();
    println!(
        "{}",
        "Other backends can be described under [custom_dialect] in the config file.".dimmed()
    );
}
