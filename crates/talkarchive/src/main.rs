use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use talkarchive_core::archive::{ArchiveOptions, SystemClock, archive_talk_page};
use talkarchive_core::config::{ArchiveConfig, load_settings, settings_path};
use talkarchive_core::mediawiki::{Credentials, MediaWikiClient, MediaWikiClientConfig, WikiApi};
use talkarchive_core::review::TerminalReviewer;
use talkarchive_core::sections::SectionSplitter;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "talkarchive",
    version,
    about = "Move stale talk page sections into the monthly archive page"
)]
struct Cli {
    #[arg(short = 'c', long, help = "Show each diff and ask before saving")]
    confirm: bool,
    #[arg(short = 'd', long, help = "Verbose logging; also prints diffs and summaries")]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_logging(cli.debug);
    debug!("args: {cli:?}");

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let cwd = env::current_dir().context("failed to read current directory")?;
    let settings_file = settings_path(&cwd);
    let settings = load_settings(&settings_file)?;
    debug!("settings: {}", settings_file.display());

    let config_page = settings.config_page().ok_or_else(|| {
        anyhow::anyhow!(
            "no config page configured; set [bot].config_page in {} or TALKARCHIVE_CONFIG_PAGE",
            settings_file.display()
        )
    })?;
    let credentials = Credentials::from_env()?;

    let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_settings(&settings)?)?;
    client
        .login(&credentials.username, &credentials.password)
        .context("login failed")?;
    let config = ArchiveConfig::load(&mut client, &config_page)?;

    let mut reviewer = TerminalReviewer::stdio();
    let report = archive_talk_page(
        &mut client,
        &mut reviewer,
        &config,
        &SystemClock,
        &SectionSplitter::new(),
        &ArchiveOptions {
            confirm: cli.confirm,
            show_diff: cli.debug,
        },
    )?;
    debug!(
        "report: {}",
        serde_json::to_string_pretty(&report).context("failed to render report")?
    );
    debug!(requests = client.request_count(), "finished");
    Ok(())
}

/// `--debug` forces debug output; otherwise RUST_LOG applies, defaulting to info.
fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("info,talkarchive=debug,talkarchive_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
