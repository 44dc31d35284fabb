use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use portal_sheets::app::{self, App, SubmitOptions};
use portal_sheets::client::PortalHttpClient;
use portal_sheets::config::{ConfigLoader, ResolvedConfig};
use portal_sheets::error::SheetError;
use portal_sheets::output::{JsonOutput, LogOutput};
use portal_sheets::sheet::Sheet;

#[derive(Parser)]
#[command(name = "psheets")]
#[command(about = "Convert annotated spreadsheets to and from metadata portal objects")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Build a submission template from a type's schema")]
    Template(TemplateArgs),
    #[command(about = "Convert sheet rows into JSON records")]
    Convert(ConvertArgs),
    #[command(about = "Submit sheet rows to the portal")]
    Submit(SubmitArgs),
}

#[derive(Args)]
struct TemplateArgs {
    item_type: String,

    #[arg(long)]
    out: Option<String>,

    #[arg(long)]
    admin: bool,

    #[arg(long)]
    delimiter: Option<char>,
}

#[derive(Args)]
struct ConvertArgs {
    sheet: String,

    #[arg(long)]
    delimiter: Option<char>,
}

#[derive(Args)]
struct SubmitArgs {
    sheet: String,

    #[arg(long = "type")]
    item_type: String,

    #[arg(long)]
    patch: bool,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    fail_fast: bool,

    #[arg(long)]
    delimiter: Option<char>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<SheetError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SheetError) -> u8 {
    match error {
        SheetError::MissingConfig | SheetError::ObjectNotFound(_) => 2,
        SheetError::PortalHttp(_) | SheetError::PortalStatus { .. } => 3,
        SheetError::RowsFailed { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Template(args) => run_template(args, cli.config.as_deref()),
        Commands::Convert(args) => run_convert(args, cli.config.as_deref()),
        Commands::Submit(args) => run_submit(args, cli.config.as_deref()),
    }
}

fn run_template(args: TemplateArgs, config: Option<&str>) -> miette::Result<()> {
    let mut resolved = ConfigLoader::resolve(config)?;
    if args.admin {
        resolved.admin = true;
    }
    let delimiter = pick_delimiter(args.delimiter, &resolved)?;
    let client = PortalHttpClient::new(&resolved)?;
    let app = App::new(client, resolved.enumerate_options());

    let out = args.out.map(Utf8PathBuf::from);
    let result = app.template(&args.item_type, out.as_deref(), delimiter, &LogOutput)?;
    JsonOutput::print_template(&result).into_diagnostic()?;
    Ok(())
}

fn run_convert(args: ConvertArgs, config: Option<&str>) -> miette::Result<()> {
    // Converting is offline; a config file only contributes the delimiter.
    let resolved = match config {
        Some(path) => Some(ConfigLoader::resolve(Some(path))?),
        None => ConfigLoader::resolve(None).ok(),
    };
    let delimiter = match &resolved {
        Some(resolved) => pick_delimiter(args.delimiter, resolved)?,
        None => args.delimiter.map(delimiter_byte).transpose()?,
    };

    let sheet = Sheet::read_path(&Utf8PathBuf::from(args.sheet), delimiter)?;
    let result = app::convert(&sheet, &LogOutput);
    JsonOutput::print_convert(&result).into_diagnostic()?;
    if result.failed > 0 {
        return Err(SheetError::RowsFailed {
            failed: result.failed,
            total: result.rows.len(),
        }
        .into());
    }
    Ok(())
}

fn run_submit(args: SubmitArgs, config: Option<&str>) -> miette::Result<()> {
    let resolved = ConfigLoader::resolve(config)?;
    let delimiter = pick_delimiter(args.delimiter, &resolved)?;
    let sheet = Sheet::read_path(&Utf8PathBuf::from(args.sheet), delimiter)?;
    let client = PortalHttpClient::new(&resolved)?;
    let app = App::new(client, resolved.enumerate_options());

    let options = SubmitOptions {
        patch: args.patch,
        dry_run: args.dry_run,
        fail_fast: args.fail_fast,
    };
    let result = app.submit(&args.item_type, &sheet, options, &LogOutput)?;
    JsonOutput::print_submit(&result).into_diagnostic()?;
    if result.failed > 0 {
        return Err(SheetError::RowsFailed {
            failed: result.failed,
            total: result.items.len(),
        }
        .into());
    }
    Ok(())
}

fn pick_delimiter(arg: Option<char>, config: &ResolvedConfig) -> Result<Option<u8>, SheetError> {
    match arg {
        Some(value) => delimiter_byte(value).map(Some),
        None => Ok(config.delimiter),
    }
}

fn delimiter_byte(value: char) -> Result<u8, SheetError> {
    u8::try_from(value)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| SheetError::ConfigParse(format!("delimiter must be ASCII: {value}")))
}
