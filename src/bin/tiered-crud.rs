//! Tiered CRUD CLI
//!
//! Inspect, validate and lint resource documents.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tiered_crud::{
    describe_route, lint, resolve, AccessTier, CapabilityTable, FileStatus, LintResult, LoadError,
    Operation, ResourceDocument, Severity, ValidateOptions,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tiered-crud")]
#[command(about = "Inspect and validate tiered CRUD resource documents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Tier {
    Client,
    Server,
    Admin,
}

impl From<Tier> for AccessTier {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Client => AccessTier::Client,
            Tier::Server => AccessTier::Server,
            Tier::Admin => AccessTier::Admin,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Op {
    Create,
    Read,
    List,
    Update,
    Delete,
}

impl From<Op> for Operation {
    fn from(op: Op) -> Self {
        match op {
            Op::Create => Operation::Create,
            Op::Read => Operation::Read,
            Op::List => Operation::List,
            Op::Update => Operation::Update,
            Op::Delete => Operation::Delete,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the input and output shapes of one operation at one tier
    Resolve {
        /// Resource document: file path or URL (http:// or https://)
        document: String,

        /// Access tier of the caller
        #[arg(long, short)]
        tier: Tier,

        /// Operation to resolve
        #[arg(long, short)]
        op: Op,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Print the synthesized route table
    Routes {
        /// Resource document: file path or URL
        document: String,

        /// Output the table as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a payload through the validation cascade
    Validate {
        /// Resource document: file path or URL
        document: String,

        /// Payload file to validate
        payload: PathBuf,

        /// Access tier of the caller
        #[arg(long, short)]
        tier: Tier,

        /// Operation the payload belongs to
        #[arg(long, short)]
        op: Op,

        /// Treat the payload as a callback result instead of request data
        #[arg(long)]
        output_shape: bool,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },

    /// Lint resource documents (syntax, broken refs, invalid annotations, structure)
    Lint {
        /// File or directory to lint
        path: PathBuf,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Suppress progress output, only show errors
        #[arg(long, short)]
        quiet: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Resolve {
            document,
            tier,
            op,
            output,
            pretty,
        } => run_resolve(&document, tier.into(), op.into(), output, pretty),

        Commands::Routes { document, json } => run_routes(&document, json),

        Commands::Validate {
            document,
            payload,
            tier,
            op,
            output_shape,
            json,
        } => {
            run_validate(ValidateArgs {
                document,
                payload,
                tier: tier.into(),
                operation: op.into(),
                output_shape,
                json_output: json,
            })
        }

        Commands::Lint {
            path,
            format,
            strict,
            quiet,
        } => run_lint(&path, &format, strict, quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn load_document(source: &str, json_output: bool) -> Result<ResourceDocument, u8> {
    debug!(source, "loading resource document");
    ResourceDocument::load(source).map_err(|e| {
        report_error(json_output, &e.to_string());
        exit_code(&e)
    })
}

fn exit_code(error: &LoadError) -> u8 {
    error.exit_code() as u8
}

fn run_resolve(
    source: &str,
    tier: AccessTier,
    operation: Operation,
    output: Option<PathBuf>,
    pretty: bool,
) -> Result<(), u8> {
    let document = load_document(source, false)?;
    let crud = document.crud_schema().map_err(|e| {
        eprintln!("Error: {}", e);
        exit_code(&e)
    })?;

    let resolved = match resolve(&crud, operation, tier) {
        Some(schemas) => json!({
            "available": true,
            "input": schemas.input.describe(),
            "output": schemas.output.describe(),
        }),
        None => json!({ "available": false, "input": null, "output": null }),
    };

    let rendered = if pretty {
        serde_json::to_string_pretty(&resolved)
    } else {
        serde_json::to_string(&resolved)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(&path, &rendered).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => println!("{}", rendered),
    }

    Ok(())
}

fn run_routes(source: &str, json_output: bool) -> Result<(), u8> {
    let document = load_document(source, json_output)?;
    let (crud, params, query) = document
        .crud_schema()
        .and_then(|crud| Ok((crud, document.params_schema()?, document.query_schema()?)))
        .map_err(|e| {
            report_error(json_output, &e.to_string());
            exit_code(&e)
        })?;
    let table = CapabilityTable::build(&crud, Operation::ALL).map_err(|e| {
        report_error(json_output, &e.to_string());
        2u8
    })?;

    let routes: Vec<Value> = table
        .iter()
        .map(|capability| {
            let (request, response) = describe_route(capability, &params, &query);
            json!({
                "operation": capability.operation,
                "handler": capability.operation.handler_name(),
                "direct": tiered_crud::direct_name(capability.tier, capability.operation),
                "request": request,
                "response": response,
            })
        })
        .collect();

    if json_output {
        println!("{}", Value::Array(routes));
        return Ok(());
    }

    println!("{}", document.display_name());
    for route in &routes {
        println!(
            "  {:<7} {:<14} {:<7} {} {:<5} {}",
            route["request"]["method"].as_str().unwrap_or_default(),
            route["handler"].as_str().unwrap_or_default(),
            route["request"]["auth_tier"].as_str().unwrap_or_default(),
            route["response"]["status"],
            route["response"]["body_type"].as_str().unwrap_or_default(),
            route["direct"].as_str().unwrap_or_default(),
        );
    }
    Ok(())
}

struct ValidateArgs {
    document: String,
    payload: PathBuf,
    tier: AccessTier,
    operation: Operation,
    output_shape: bool,
    json_output: bool,
}

fn run_validate(args: ValidateArgs) -> Result<(), u8> {
    let ValidateArgs {
        document,
        payload: payload_path,
        tier,
        operation,
        output_shape,
        json_output,
    } = args;

    let document = load_document(&document, json_output)?;
    let payload = tiered_crud::load_json(&payload_path).map_err(|e| {
        report_error(json_output, &format!("loading payload: {}", e));
        exit_code(&e)
    })?;
    let crud = document.crud_schema().map_err(|e| {
        report_error(json_output, &e.to_string());
        exit_code(&e)
    })?;

    let (Some(access), Some(admin)) = (
        resolve(&crud, operation, tier),
        resolve(&crud, operation, AccessTier::Admin),
    ) else {
        report_error(
            json_output,
            &format!("operation {} is not available at tier {}", operation, tier),
        );
        return Err(2);
    };

    // Documents are fetched with a blocking client, so the runtime only wraps validation
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|e| {
            report_error(json_output, &format!("starting runtime: {}", e));
            2u8
        })?;

    let result = runtime.block_on(async {
        if output_shape {
            // Callback results cascade through the admin shape, then narrow to the tier
            let value = admin
                .output
                .validate(Some(payload), ValidateOptions::default())
                .await?;
            access.output.validate(value, ValidateOptions::default()).await
        } else {
            let options = ValidateOptions {
                reject_unknown: document.config.reject_unknown_request,
            };
            access.input.validate(Some(payload.clone()), options).await?;
            admin
                .input
                .validate(Some(payload), ValidateOptions::default())
                .await
        }
    });

    match result {
        Ok(value) => {
            if json_output {
                println!("{}", json!({ "valid": true, "value": value }));
            } else {
                println!("Valid");
                if let Some(value) = value {
                    println!("{}", value);
                }
            }
            Ok(())
        }
        Err(errors) => {
            if json_output {
                println!("{}", json!({ "valid": false, "errors": errors }));
            } else {
                eprintln!("Validation failed:");
                for error in errors {
                    eprintln!("  {}", error);
                }
            }
            Err(1)
        }
    }
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

fn paint(color: &str, text: impl std::fmt::Display) -> String {
    format!("{}{}{}", color, text, RESET)
}

fn run_lint(path: &Path, format: &str, strict: bool, quiet: bool) -> Result<(), u8> {
    if !path.exists() {
        eprintln!("Error: path not found: {}", path.display());
        return Err(2);
    }

    let result = lint(path, strict);

    if format == "json" {
        let rendered = serde_json::to_string_pretty(&result).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;
        println!("{}", rendered);
    } else {
        print_lint_report(&result, strict, quiet);
    }

    if result.all_passed() {
        Ok(())
    } else {
        Err(1)
    }
}

fn print_lint_report(result: &LintResult, strict: bool, quiet: bool) {
    if !quiet {
        println!("Linting {} ...\n", result.path.display());
    }

    for file in &result.results {
        if quiet && file.status == FileStatus::Ok {
            continue;
        }
        let icon = match file.status {
            FileStatus::Ok => paint(GREEN, "✓"),
            FileStatus::Warning if !strict => paint(YELLOW, "⚠"),
            _ => paint(RED, "✗"),
        };
        println!("  {} {}", icon, file.file.display());

        for diagnostic in &file.diagnostics {
            match diagnostic.severity {
                Severity::Error => println!("    {}", paint(RED, diagnostic)),
                Severity::Warning if !quiet => println!("    {}", paint(YELLOW, diagnostic)),
                Severity::Warning => {}
            }
        }
    }

    println!();
    let summary = if result.all_passed() {
        paint(
            GREEN,
            format!("✓ {} files checked, all passed", result.files_checked),
        )
    } else {
        paint(
            RED,
            format!(
                "✗ {} files checked: {} passed, {} failed ({} errors, {} warnings)",
                result.files_checked,
                result.passed,
                result.failed,
                result.errors,
                result.warnings
            ),
        )
    };
    println!("{}", summary);
}
