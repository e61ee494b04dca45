//! datashell CLI - Command-line interface for the datashell orchestrator
//!
//! One subcommand per service tool; results print as text or raw JSON.

use std::fs;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// datashell CLI - Run and inspect data analysis sessions
#[derive(Parser)]
#[command(name = "datashell")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CLI for the datashell orchestrator", long_about = None)]
struct Cli {
    /// Orchestrator URL
    #[arg(short, long, default_value = "http://127.0.0.1:8765")]
    api_url: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a session
    CreateSession {
        /// Session ID (generated when omitted)
        session_id: Option<String>,

        /// Skip binding the default modules
        #[arg(long)]
        no_auto_import: bool,
    },

    /// List live sessions
    ListSessions,

    /// Show detailed session state
    Status { session_id: String },

    /// Delete a session
    DeleteSession { session_id: String },

    /// Execute code in a session
    Execute {
        session_id: String,

        /// Code to execute (or path to file with @ prefix)
        code: String,

        /// Maximum execution time in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Discard stdout/stderr
        #[arg(long)]
        no_capture: bool,
    },

    /// Show execution history
    History {
        session_id: String,

        /// Most recent entries to show (0 for all)
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Include stdout, stderr and results
        #[arg(long)]
        include_output: bool,
    },

    /// Load a CSV, Excel or JSON file into a table variable
    Load {
        session_id: String,
        file_path: String,

        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Variable name (derived from the file name when omitted)
        #[arg(short, long)]
        name: Option<String>,

        #[arg(long)]
        encoding: Option<String>,

        #[arg(long)]
        delimiter: Option<char>,

        /// First row is data, not a header
        #[arg(long)]
        no_header: bool,

        /// Worksheet name or zero-based index
        #[arg(long)]
        sheet: Option<String>,
    },

    /// List table variables
    Tables { session_id: String },

    /// Describe a table
    DescribeTable { session_id: String, name: String },

    /// Show rows of a table
    Preview {
        session_id: String,
        name: String,

        /// head, tail or sample
        #[arg(short, long, default_value = "head")]
        method: String,

        #[arg(short = 'n', long, default_value = "5")]
        rows: usize,
    },

    /// Descriptive statistics of a table
    Summarize {
        session_id: String,
        name: String,

        #[arg(long)]
        no_categorical: bool,
    },

    /// Sample values of one column
    Sample {
        session_id: String,
        table: String,
        column: String,

        /// head, tail, unique, random or mixed
        #[arg(short, long, default_value = "mixed")]
        method: String,

        #[arg(short = 'n', long, default_value = "20")]
        size: usize,

        #[arg(long)]
        max_text_length: Option<usize>,

        #[arg(long)]
        no_stats: bool,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Memory used by a session
    Memory { session_id: String },

    /// Describe one variable
    Describe {
        session_id: String,
        name: String,

        #[arg(long)]
        no_preview: bool,
    },

    /// Remove variables
    Clear {
        session_id: String,

        /// Variables to remove
        names: Vec<String>,

        /// Remove every variable
        #[arg(long)]
        all: bool,

        /// With --all, also remove imported modules
        #[arg(long)]
        drop_imports: bool,
    },

    /// List the available tools
    Tools,

    /// Get server health status
    Health,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    active_sessions: u64,
}

impl Commands {
    /// Tool name and JSON arguments for tool-backed commands
    fn tool_call(&self) -> Result<Option<(&'static str, Value)>> {
        let call = match self {
            Commands::CreateSession {
                session_id,
                no_auto_import,
            } => (
                "create_session",
                json!({ "session_id": session_id, "auto_import": !no_auto_import }),
            ),
            Commands::ListSessions => ("list_sessions", json!({})),
            Commands::Status { session_id } => {
                ("get_session_status", json!({ "session_id": session_id }))
            }
            Commands::DeleteSession { session_id } => {
                ("delete_session", json!({ "session_id": session_id }))
            }
            Commands::Execute {
                session_id,
                code,
                timeout,
                no_capture,
            } => {
                // Read code from file if starts with @
                let code = match code.strip_prefix('@') {
                    Some(path) => fs::read_to_string(path)
                        .with_context(|| format!("Failed to read code file: {}", path))?,
                    None => code.clone(),
                };
                let mut args = json!({
                    "session_id": session_id,
                    "code": code,
                    "capture_output": !no_capture,
                });
                if let Some(timeout) = timeout {
                    args["timeout"] = json!(timeout);
                }
                ("execute", args)
            }
            Commands::History {
                session_id,
                limit,
                include_output,
            } => (
                "get_history",
                json!({ "session_id": session_id, "limit": limit, "include_output": include_output }),
            ),
            Commands::Load {
                session_id,
                file_path,
                format,
                name,
                encoding,
                delimiter,
                no_header,
                sheet,
            } => {
                let mut options = Map::new();
                if let Some(encoding) = encoding {
                    options.insert("encoding".into(), json!(encoding));
                }
                if let Some(delimiter) = delimiter {
                    options.insert("delimiter".into(), json!(delimiter.to_string()));
                }
                if *no_header {
                    options.insert("has_header".into(), json!(false));
                }
                if let Some(sheet) = sheet {
                    let selector = match sheet.parse::<usize>() {
                        Ok(index) => json!(index),
                        Err(_) => json!(sheet),
                    };
                    options.insert("sheet".into(), selector);
                }
                let mut args = json!({
                    "session_id": session_id,
                    "file_path": file_path,
                    "format": format,
                    "options": options,
                });
                if let Some(name) = name {
                    args["variable_name"] = json!(name);
                }
                ("load_file", args)
            }
            Commands::Tables { session_id } => ("list_tables", json!({ "session_id": session_id })),
            Commands::DescribeTable { session_id, name } => (
                "describe_table",
                json!({ "session_id": session_id, "variable_name": name }),
            ),
            Commands::Preview {
                session_id,
                name,
                method,
                rows,
            } => (
                "preview_table",
                json!({ "session_id": session_id, "variable_name": name, "method": method, "n_rows": rows }),
            ),
            Commands::Summarize {
                session_id,
                name,
                no_categorical,
            } => (
                "summarize_table",
                json!({ "session_id": session_id, "variable_name": name, "include_categorical": !no_categorical }),
            ),
            Commands::Sample {
                session_id,
                table,
                column,
                method,
                size,
                max_text_length,
                no_stats,
                seed,
            } => {
                let mut args = json!({
                    "session_id": session_id,
                    "variable_name": table,
                    "column_name": column,
                    "method": method,
                    "sample_size": size,
                    "include_stats": !no_stats,
                });
                if let Some(max) = max_text_length {
                    args["max_text_length"] = json!(max);
                }
                if let Some(seed) = seed {
                    args["seed"] = json!(seed);
                }
                ("sample_column", args)
            }
            Commands::Memory { session_id } => ("check_memory", json!({ "session_id": session_id })),
            Commands::Describe {
                session_id,
                name,
                no_preview,
            } => (
                "describe_variable",
                json!({ "session_id": session_id, "variable_name": name, "include_preview": !no_preview }),
            ),
            Commands::Clear {
                session_id,
                names,
                all,
                drop_imports,
            } => {
                let mut args = json!({
                    "session_id": session_id,
                    "clear_all": all,
                    "keep_imports": !drop_imports,
                });
                if !names.is_empty() {
                    args["variable_names"] = json!(names);
                }
                ("clear_variables", args)
            }
            Commands::Tools | Commands::Health => return Ok(None),
        };
        Ok(Some(call))
    }
}

/// POST a tool call and unwrap the response envelope
fn call_tool(client: &Client, api_url: &str, tool: &str, args: &Value) -> Result<Value> {
    let response = client
        .post(format!("{}/api/v1/tools/{}", api_url, tool))
        .json(args)
        .send()
        .context("Failed to send request")?;

    let body: Value = response.json().context("Failed to parse response")?;
    if body["success"].as_bool() == Some(true) {
        return Ok(body);
    }

    let error = &body["error"];
    anyhow::bail!(
        "{}: {}",
        error["kind"].as_str().unwrap_or("Error"),
        error["message"].as_str().unwrap_or("unknown error")
    )
}

fn print_execution(record: &Value) {
    println!("{}", "=".repeat(60).bright_blue());
    println!("{} {}", "Execution:".bright_cyan(), record["execution_count"]);
    let success = record["success"].as_bool().unwrap_or(false);
    println!(
        "{} {}",
        "Status:".bright_cyan(),
        if success { "success".green() } else { "failed".red() }
    );
    println!("{} {}ms", "Duration:".bright_cyan(), record["duration_ms"]);

    for (label, key) in [("STDOUT:", "stdout"), ("STDERR:", "stderr")] {
        if let Some(text) = record[key].as_str().filter(|t| !t.is_empty()) {
            let heading = if key == "stdout" {
                label.bright_green().bold()
            } else {
                label.bright_red().bold()
            };
            println!("\n{}", heading);
            print!("{}", text);
            if !text.ends_with('\n') {
                println!();
            }
        }
    }
    if let Some(result) = record["result"].as_str() {
        println!("\n{} {}", "Out:".bright_green().bold(), result);
    }
    if let Some(error) = record["error"].as_str() {
        println!("\n{} {}", "Error:".bright_red().bold(), error);
    }
    println!("{}", "=".repeat(60).bright_blue());
}

fn print_fields(body: &Value) {
    let Some(fields) = body.as_object() else {
        println!("{}", body);
        return;
    };
    for (key, value) in fields.iter().filter(|(k, _)| k.as_str() != "success") {
        match value {
            Value::String(s) => println!("{} {}", format!("{}:", key).cyan(), s),
            Value::Number(_) | Value::Bool(_) | Value::Null => {
                println!("{} {}", format!("{}:", key).cyan(), value)
            }
            other => {
                let pretty = serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string());
                println!("{}\n{}", format!("{}:", key).cyan(), pretty);
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();

    match &cli.command {
        Commands::Health => {
            let response = client
                .get(format!("{}/health", cli.api_url))
                .send()
                .context("Failed to get health")?;

            if !response.status().is_success() {
                anyhow::bail!("Health check failed: {}", response.status());
            }

            let health: HealthResponse = response.json().context("Failed to parse response")?;

            if cli.output == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "status": health.status,
                        "version": health.version,
                        "uptime_seconds": health.uptime_seconds,
                        "active_sessions": health.active_sessions,
                    }))?
                );
                return Ok(());
            }

            println!("{}", "datashell Orchestrator Status".bright_cyan().bold());
            println!("{}", "=".repeat(40).bright_blue());
            println!(
                "{} {}",
                "Status:".cyan(),
                if health.status == "healthy" {
                    health.status.green()
                } else {
                    health.status.yellow()
                }
            );
            println!("{} {}", "Version:".cyan(), health.version);
            println!("{} {}s", "Uptime:".cyan(), health.uptime_seconds);
            println!("{} {}", "Active Sessions:".cyan(), health.active_sessions);
        }

        Commands::Tools => {
            let tools: Value = client
                .get(format!("{}/api/v1/tools", cli.api_url))
                .send()
                .context("Failed to list tools")?
                .json()
                .context("Failed to parse response")?;

            if cli.output == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&tools)?);
                return Ok(());
            }
            for tool in tools["tools"].as_array().context("Invalid response")? {
                println!(
                    "  {} {}",
                    tool["name"].as_str().unwrap_or("?").bright_green(),
                    tool["description"].as_str().unwrap_or("")
                );
            }
        }

        command => {
            let (tool, args) = command
                .tool_call()?
                .context("Command does not map to a tool")?;
            let body = call_tool(&client, &cli.api_url, tool, &args)?;

            match cli.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&body)?),
                OutputFormat::Text if tool == "execute" => print_execution(&body),
                OutputFormat::Text => print_fields(&body),
            }
        }
    }

    Ok(())
}
