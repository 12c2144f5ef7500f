use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use dotenvy::dotenv;
use teloxide::prelude::*;
use tracing::{error, info, warn};

mod api;
mod bot;
mod config;
mod gallery;
mod migration;
mod notifier;
mod state;
mod storage;
mod uploads;
mod utils;

use api::{build_router, ApiSettings};
use bot::menu::BotContent;
use bot::{run_bot, BotState};
use config::{log_level_from_env, CONFIG};
use migration::migrate_local_images;
use notifier::OrderNotifier;
use state::AppState;
use storage::cloudinary::CloudinaryStore;
use storage::google_drive::GoogleDriveStore;
use storage::local::LocalStore;
use storage::ImageStore;
use utils::logging::init_logging;

#[derive(Debug, PartialEq, Eq)]
struct MigrateArgs {
    dir: Option<PathBuf>,
}

fn migrate_usage() -> &'static str {
    "Usage: portfolio-backend migrate-images [--dir <path>]"
}

fn parse_migrate_args(args: &[String]) -> anyhow::Result<Option<MigrateArgs>> {
    if args.get(1).map(|value| value.as_str()) != Some("migrate-images") {
        return Ok(None);
    }

    let mut dir = None;
    let mut index = 2;
    while index < args.len() {
        match args[index].as_str() {
            "--dir" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --dir"))?;
                dir = Some(PathBuf::from(value));
            }
            "--help" | "-h" => {
                return Err(anyhow!(migrate_usage()));
            }
            other => {
                return Err(anyhow!(
                    "Unknown migrate-images argument: {other}\n{}",
                    migrate_usage()
                ));
            }
        }
        index += 1;
    }

    Ok(Some(MigrateArgs { dir }))
}

async fn run_migration(
    args: MigrateArgs,
    cloudinary: Option<Arc<CloudinaryStore>>,
) -> anyhow::Result<()> {
    let store = cloudinary
        .ok_or_else(|| anyhow!("Cloudinary credentials are required to migrate images"))?;
    let dir = args.dir.unwrap_or_else(|| CONFIG.static_images_dir.clone());
    let local = LocalStore::new(dir, &CONFIG.public_images_path);

    let summary = migrate_local_images(&local, store.as_ref()).await?;
    info!(
        "Migration summary: uploaded={} failed={} skipped={}",
        summary.uploaded, summary.failed, summary.skipped
    );
    Ok(())
}

fn init_secondary_store() -> Option<Arc<dyn ImageStore>> {
    let drive_config = CONFIG.google_drive.as_ref()?;
    match GoogleDriveStore::from_config(drive_config) {
        Ok(store) => {
            info!("Google Drive storage enabled");
            Some(Arc::new(store))
        }
        Err(err) => {
            warn!("Google Drive storage disabled: {err}");
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let _guards = init_logging(&log_level_from_env());

    let cloudinary = CONFIG
        .cloudinary
        .clone()
        .map(|config| Arc::new(CloudinaryStore::new(config)));

    let args: Vec<String> = std::env::args().collect();
    if let Some(migrate_args) = parse_migrate_args(&args)? {
        return run_migration(migrate_args, cloudinary).await;
    }

    match &cloudinary {
        Some(_) => info!("Cloudinary storage enabled"),
        None => info!("Cloudinary not configured; serving local images"),
    }
    let secondary = init_secondary_store();
    let local = Arc::new(LocalStore::new(
        CONFIG.static_images_dir.clone(),
        &CONFIG.public_images_path,
    ));

    let admin_chat_id = CONFIG.admin_chat_id.map(ChatId);
    let bot = (!CONFIG.bot_token.is_empty()).then(|| Bot::new(CONFIG.bot_token.clone()));
    let notifier = OrderNotifier::new(bot.clone(), admin_chat_id);

    let bot_task = match bot {
        Some(bot) => {
            let bot_state = BotState::new(
                BotContent::new(CONFIG.bot_content.clone()),
                admin_chat_id,
            );
            info!("Starting Telegram bot");
            Some(tokio::spawn(run_bot(bot, bot_state)))
        }
        None => {
            warn!("BOT_TOKEN not set; Telegram bot disabled");
            None
        }
    };

    let state = AppState::new(
        cloudinary,
        secondary,
        local,
        notifier,
        CONFIG.frontend_url.clone(),
    );
    let app = build_router(state, &ApiSettings::from(&*CONFIG));

    let address = CONFIG.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("Portfolio backend listening on {address}");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                error!("Server error: {err}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    if let Some(task) = bot_task {
        task.abort();
    }
    Ok(())
}
