use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing_subscriber::EnvFilter;

use magval::app::{self, BatchSummary};
use magval::config::ConfigLoader;
use magval::error::MagvalError;
use magval::hapi::HapiHttpClient;
use magval::ows::{DataSource, FileSource, OwsHttpClient};
use magval::registry::ModelRegistry;
use magval::report::ReportWriter;
use magval::sources::SourceStore;

#[derive(Parser)]
#[command(name = "magval")]
#[command(about = "Geomagnetic data service testing, benchmarking and model validation")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    /// Seed for the window sampler; random when omitted.
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Enumerate datasets and issue sample data requests")]
    HapiTest(ServerArgs),
    #[command(about = "Time the configured request variants over one random window")]
    Benchmark(ServerArgs),
    #[command(about = "Compare model values between two servers")]
    Validate(ValidateArgs),
    #[command(about = "Compare server model values against local evaluation")]
    ValidateLocal(ValidateLocalArgs),
}

#[derive(Args)]
struct ServerArgs {
    /// Server base URL; overrides the configured one.
    #[arg(long)]
    url: Option<String>,
}

#[derive(Args)]
struct ValidateArgs {
    #[arg(long)]
    url: Option<String>,

    /// Reference server base URL; overrides the configured one.
    #[arg(long)]
    reference_url: Option<String>,
}

#[derive(Args)]
struct ValidateLocalArgs {
    #[arg(long)]
    url: Option<String>,

    /// Persist each raw data payload here and re-read it as a second input.
    #[arg(long)]
    data_file: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<MagvalError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MagvalError) -> u8 {
    match error {
        MagvalError::MissingConfig
        | MagvalError::ConfigRead(_)
        | MagvalError::ConfigParse(_)
        | MagvalError::InvalidModelId(_)
        | MagvalError::InvalidModelExpression(_)
        | MagvalError::UnsupportedModelExpression(_)
        | MagvalError::ArchiveMemberNotFound { .. } => 2,
        MagvalError::HapiHttp(_)
        | MagvalError::HapiStatus { .. }
        | MagvalError::OwsHttp(_)
        | MagvalError::OwsStatus { .. }
        | MagvalError::SourceDownload(_) => 3,
        MagvalError::Validation { .. } => 4,
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
    let config = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;
    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let summary = match cli.command {
        Commands::HapiTest(args) => {
            let url = args.url.unwrap_or_else(|| config.server_url.clone());
            let client = HapiHttpClient::new().into_diagnostic()?;
            app::run_hapi_test(&client, &url, &mut rng).into_diagnostic()?
        }
        Commands::Benchmark(args) => {
            let plan = config
                .benchmark
                .as_ref()
                .ok_or_else(|| miette::Report::msg("no benchmark section in config"))?;
            let url = args.url.unwrap_or_else(|| config.server_url.clone());
            let hapi = HapiHttpClient::new().into_diagnostic()?;
            let source = OwsHttpClient::new(&url).into_diagnostic()?;
            let mut writer = ReportWriter::append(&config.report_file).into_diagnostic()?;
            app::run_benchmark(&source, &hapi, &url, plan, &mut rng, &mut writer)
                .into_diagnostic()?
        }
        Commands::Validate(args) => {
            let url = args.url.unwrap_or_else(|| config.server_url.clone());
            let reference_url = args
                .reference_url
                .or_else(|| config.reference_url.clone())
                .ok_or_else(|| miette::Report::msg("no reference server configured"))?;
            let hapi = HapiHttpClient::new().into_diagnostic()?;
            let tested = OwsHttpClient::new(&url).into_diagnostic()?;
            let reference = OwsHttpClient::new(&reference_url).into_diagnostic()?;
            let mut writer = ReportWriter::append(&config.report_file).into_diagnostic()?;
            app::run_validation(
                &tested,
                &reference,
                &hapi,
                &url,
                &config.validation,
                &mut rng,
                &mut writer,
            )
            .into_diagnostic()?
        }
        Commands::ValidateLocal(args) => {
            let url = args.url.unwrap_or_else(|| config.server_url.clone());
            let hapi = HapiHttpClient::new().into_diagnostic()?;
            let mut server = OwsHttpClient::new(&url).into_diagnostic()?;
            let data_file = args.data_file.map(camino::Utf8PathBuf::from);
            let reread = match &data_file {
                Some(path) => {
                    server = server.with_data_file(path);
                    Some(FileSource::new(path))
                }
                None => None,
            };
            let store = SourceStore::new(&config.data_dir).into_diagnostic()?;
            let registry = ModelRegistry::new(store, config.registry.clone());
            let mut writer = ReportWriter::append(&config.report_file).into_diagnostic()?;
            app::run_local_validation(
                &server,
                reread.as_ref().map(|source| source as &dyn DataSource),
                &registry,
                &hapi,
                &url,
                &config.validation,
                &mut rng,
                &mut writer,
            )
            .into_diagnostic()?
        }
    };

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    println!(
        "attempted: {}, succeeded: {}, failed: {}",
        summary.attempted, summary.succeeded, summary.failed
    );
}
