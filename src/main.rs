use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tg_poembot::{archive, batch, config, handlers, lock, pipeline, telegram, transcribe};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Which bot account to run as (primary/secondary); falls back to the
    /// BOT_TYPE environment variable, then primary
    #[arg(long)]
    identity: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;
    let identity = config::Identity::resolve(args.identity.as_deref())?;
    let token = cfg.bot_token(identity)?.to_string();

    let instance_lock =
        lock::InstanceLock::acquire(cfg.lock_path(identity), &lock::SignalProbe).await?;

    let bot = Bot::new(token.clone());
    let fetcher = telegram::TelegramFetcher::new(bot.clone(), token);
    let transcriber = transcribe::TieredTranscriber::new(
        transcribe::ChatVisionClient::new(
            cfg.vision.chat.api_key.clone(),
            cfg.vision.chat.model.clone(),
        ),
        transcribe::DocumentTextClient::new(
            cfg.vision.document.access_token.clone(),
            cfg.vision.document.language_hints.clone(),
        ),
    );
    let store = archive::DriveClient::new(cfg.drive.access_token.clone());

    let processor = pipeline::Processor::new(
        Arc::new(fetcher),
        Arc::new(transcriber),
        Arc::new(store),
        pipeline::ProcessorOptions::new(cfg.drive.root_folder_id.clone(), cfg.app.language.clone()),
    );
    let state = Arc::new(handlers::AppState {
        processor,
        collector: batch::GroupCollector::new(Duration::from_millis(cfg.app.collect_window_ms)),
    });

    info!(%identity, "starting telegram bot");
    let repl = teloxide::repl(bot, move |bot: Bot, msg: Message| {
        let state = state.clone();
        async move {
            if let Err(err) = handlers::handle_update(&bot, &state, &msg).await {
                error!(?err, "failed to handle update");
            }
            respond(())
        }
    });

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = repl => {}
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
    }

    instance_lock.release().await?;
    info!("goodbye");
    Ok(())
}
