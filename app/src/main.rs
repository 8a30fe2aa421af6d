//! railsweep - sweep a region of the train-tracking map into one JSON document.

use anyhow::{Context, Result};
use clap::Parser;
use railsweep_core::{AppConfig, Credential, LoginStrategy, OutputConfig, SweepMode};
use railsweep_scanner::{
    publish, AuthError, BrowserLoginProvider, CachingProvider, CookieFileProvider,
    CredentialProvider, FormLoginProvider, HttpTileFetcher, StaticCredentialProvider,
    SweepOrchestrator, SweepReport, SweepSettings,
};
use railsweep_scheduler::run_loop;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// File name of the cached cookie inside the cache directory.
const COOKIE_FILE_NAME: &str = "cookie.txt";

#[derive(Parser, Debug)]
#[command(name = "railsweep")]
#[command(version)]
#[command(about = "Sweep the train map tile by tile into one deduplicated JSON document", long_about = None)]
struct Args {
    /// Config file (default: platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sweep continuously with a randomized pause between sweeps
    #[arg(long = "loop", conflicts_with = "once")]
    run_loop: bool,

    /// Run a single sweep even if the config selects loop mode
    #[arg(long)]
    once: bool,

    /// Output file (overrides config and RAILSWEEP_OUTPUT)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,railsweep=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    info!("Starting railsweep v{}", env!("CARGO_PKG_VERSION"));

    match run(Args::parse()).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = load_config(&args)?;

    let fetcher = Arc::new(
        HttpTileFetcher::new(&config.remote, config.sweep.empty_payload_policy)
            .context("building HTTP client")?,
    );
    let cookie_file = cookie_file_path(&config);
    let provider = build_provider(&config, cookie_file.as_deref())?;
    let initial = initial_credential(&config, cookie_file.as_deref()).await;

    let orchestrator =
        SweepOrchestrator::new(fetcher, provider, SweepSettings::from_config(&config.sweep));

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing with the tiles fetched so far");
            token.cancel();
        }
    });

    match config.sweep.mode {
        SweepMode::Single => {
            let report = sweep_and_publish(&orchestrator, initial, &config.output, &cancel).await?;
            if report.tiles_total > 0 && report.tiles_merged == 0 {
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        SweepMode::Loop => {
            let slot = &Mutex::new(initial);
            let orchestrator = &orchestrator;
            let output = &config.output;
            let sweep_cancel = &cancel;

            run_loop(config.sweep.loop_delay, cancel.clone(), move |run| async move {
                let credential = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                let next = match sweep_and_publish(orchestrator, credential, output, sweep_cancel)
                    .await
                {
                    Ok(report) => Some(report.credential),
                    Err(e) => {
                        // Next sweep starts from a fresh login
                        error!("Sweep {} failed: {:#}", run + 1, e);
                        None
                    }
                };
                *slot.lock().unwrap_or_else(PoisonError::into_inner) = next;
            })
            .await;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Load the config file and environment, then apply command-line overrides.
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config =
        AppConfig::load_with_env(args.config.as_deref()).context("loading configuration")?;

    if let Some(output) = &args.output {
        config.output.path.clone_from(output);
    }
    if args.run_loop {
        config.sweep.mode = SweepMode::Loop;
    } else if args.once {
        config.sweep.mode = SweepMode::Single;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Run one sweep and publish it. Fatal sweeps publish nothing.
async fn sweep_and_publish(
    orchestrator: &SweepOrchestrator,
    credential: Option<Credential>,
    output: &OutputConfig,
    cancel: &CancellationToken,
) -> Result<SweepReport> {
    let report = orchestrator
        .run(credential, cancel)
        .await
        .context("sweep aborted, previous output left in place")?;
    publish(&report, output).context("writing output")?;
    Ok(report)
}

/// Where obtained cookies are cached: the configured file, else the cache directory.
fn cookie_file_path(config: &AppConfig) -> Option<PathBuf> {
    config.auth.cookie_file.clone().or_else(|| {
        AppConfig::cache_dir()
            .ok()
            .map(|dir| dir.join(COOKIE_FILE_NAME))
    })
}

/// Build the credential provider for the configured strategy.
///
/// Without login details, a cookie from `RAILSWEEP_COOKIE` is used as a
/// provider that cannot really refresh.
fn build_provider(
    config: &AppConfig,
    cookie_file: Option<&Path>,
) -> Result<Arc<dyn CredentialProvider>> {
    let cookie_name = &config.remote.auth_cookie_name;

    let login: std::result::Result<Arc<dyn CredentialProvider>, AuthError> =
        match config.auth.strategy {
            LoginStrategy::Form => FormLoginProvider::new(&config.remote, &config.auth)
                .map(|p| Arc::new(p) as Arc<dyn CredentialProvider>),
            LoginStrategy::Browser => {
                BrowserLoginProvider::new(&config.remote, &config.auth, &config.browser)
                    .map(|p| Arc::new(p) as Arc<dyn CredentialProvider>)
            }
            LoginStrategy::CookieFile => {
                let path = config
                    .auth
                    .cookie_file
                    .clone()
                    .context("auth.cookie_file is required for the cookie_file strategy")?;
                return Ok(Arc::new(CookieFileProvider::new(path, cookie_name)));
            }
        };

    let provider = match login {
        Ok(provider) => provider,
        Err(AuthError::MissingLoginDetails(reason)) => {
            let cookie = config
                .auth
                .cookie
                .as_deref()
                .with_context(|| format!("cannot log in: {reason}"))?;
            warn!("{}; the session cannot be renewed once RAILSWEEP_COOKIE expires", reason);
            let credential = Credential::new(cookie_name, cookie)?;
            return Ok(Arc::new(StaticCredentialProvider::new(credential)));
        }
        Err(e) => return Err(e).context("setting up login"),
    };

    let provider: Arc<dyn CredentialProvider> = match cookie_file {
        Some(path) => Arc::new(CachingProvider::new(provider, path)),
        None => provider,
    };
    Ok(provider)
}

/// Credential to start with, so a sweep can skip the login when a cookie is
/// already at hand.
async fn initial_credential(config: &AppConfig, cookie_file: Option<&Path>) -> Option<Credential> {
    let cookie_name = &config.remote.auth_cookie_name;

    if let Some(value) = &config.auth.cookie {
        match Credential::new(cookie_name, value.as_str()) {
            Ok(credential) => {
                info!("Using cookie from RAILSWEEP_COOKIE");
                return Some(credential);
            }
            Err(e) => warn!("Ignoring RAILSWEEP_COOKIE: {}", e),
        }
    }

    let path = cookie_file.filter(|p| p.exists())?;
    match CookieFileProvider::new(path, cookie_name)
        .obtain_credential()
        .await
    {
        Ok(credential) => {
            info!("Reusing cookie from {}", path.display());
            Some(credential)
        }
        Err(e) => {
            warn!("Cached cookie unusable, logging in instead: {}", e);
            None
        }
    }
}
