use case_ledger::cases::{FanoutSink, FileCaseStore, TracingSink};
use case_ledger::discord::{ChannelNotifier, SerenityGateway};
use case_ledger::{Config, Error, ExpirySweeper, ModerationService, logging};
use serenity::all::Http;
use std::env;
use std::sync::Arc;
use tracing::info;

/// Open the case store and run the expiry sweeper until Ctrl-C
async fn async_main() -> Result<(), Error> {
    let config = Config::load(Config::path()).await?;

    logging::init(&config.log_dir)?;

    let token = env::var("DISCORD_TOKEN").map_err(|_| "DISCORD_TOKEN must be set")?;
    let http = Arc::new(Http::new(&token));

    let store = Arc::new(FileCaseStore::open(&config.store_path).await?);
    let notifier = FanoutSink::new()
        .with(Arc::new(TracingSink))
        .with(Arc::new(ChannelNotifier::new(http.clone(), config.log_channels())));

    let service = ModerationService::new(
        store,
        Arc::new(SerenityGateway::new(http)),
        Arc::new(notifier),
    );

    let sweeper = ExpirySweeper::from_service(&service, config.sweep_interval()).start()?;
    logging::log_console(format!(
        "Sweeping expired cases every {}s",
        config.sweep_interval_secs
    ));

    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    sweeper.stop().await;

    Ok(())
}

fn main() {
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::from)
        .and_then(|runtime| runtime.block_on(async_main()));

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
