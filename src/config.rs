use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use tracing::warn;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub folder: String,
}

#[derive(Debug, Clone)]
pub struct GoogleDriveConfig {
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BotContentConfig {
    pub designer_name: String,
    pub portfolio_url: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub instagram_url: String,
    pub behance_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub frontend_url: String,
    pub allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
    pub static_images_dir: PathBuf,
    pub public_images_path: String,
    pub bot_token: String,
    pub admin_chat_id: Option<i64>,
    pub cloudinary: Option<CloudinaryConfig>,
    pub google_drive: Option<GoogleDriveConfig>,
    pub bot_content: BotContentConfig,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn normalize_log_level(value: Option<String>) -> String {
    value
        .map(|level| level.trim().to_lowercase())
        .filter(|level| !level.is_empty())
        .unwrap_or_else(|| "info".to_string())
}

// Must not touch CONFIG: logging is set up before the config loads.
pub fn log_level_from_env() -> String {
    normalize_log_level(env::var("LOG_LEVEL").ok())
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_csv(name: &str, default: &str) -> Vec<String> {
    parse_csv(&env::var(name).unwrap_or_else(|_| default.to_string()))
}

fn parse_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim().trim_end_matches('/').to_string())
        .filter(|entry| !entry.is_empty())
        .collect()
}

fn parse_chat_id(value: &str) -> Result<Option<i64>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<i64>()
        .map(Some)
        .map_err(|_| anyhow!("Invalid ADMIN_CHAT_ID value: {trimmed}"))
}

fn load_cloudinary() -> Option<CloudinaryConfig> {
    let cloud_name = env_string("CLOUDINARY_CLOUD_NAME", "");
    let api_key = env_string("CLOUDINARY_API_KEY", "");
    let api_secret = env_string("CLOUDINARY_API_SECRET", "");

    let present = [&cloud_name, &api_key, &api_secret]
        .iter()
        .filter(|value| !value.trim().is_empty())
        .count();
    if present == 0 {
        return None;
    }
    if present < 3 {
        warn!("Cloudinary credentials are incomplete; the primary media store is disabled.");
        return None;
    }

    Some(CloudinaryConfig {
        cloud_name: cloud_name.trim().to_string(),
        api_key: api_key.trim().to_string(),
        api_secret: api_secret.trim().to_string(),
        folder: env_string("CLOUDINARY_FOLDER", "portfolio")
            .trim()
            .trim_matches('/')
            .to_string(),
    })
}

fn load_google_drive() -> Option<GoogleDriveConfig> {
    if !env_bool("ENABLE_GOOGLE_DRIVE", false) {
        return None;
    }
    Some(GoogleDriveConfig {
        credentials_path: PathBuf::from(env_string("GOOGLE_CREDENTIALS_PATH", "credentials.json")),
        token_path: PathBuf::from(env_string("GOOGLE_TOKEN_PATH", "token.json")),
    })
}

impl Config {
    pub fn load() -> Result<Self> {
        let frontend_url = env_string("FRONTEND_URL", "http://localhost:5173")
            .trim()
            .trim_end_matches('/')
            .to_string();

        let mut allowed_origins = env_csv("ALLOWED_ORIGINS", "");
        if allowed_origins.is_empty() {
            allowed_origins = vec![frontend_url.clone()];
        }

        let bot_token = env::var("BOT_TOKEN")
            .or_else(|_| env::var("TELEGRAM_BOT_TOKEN"))
            .unwrap_or_default()
            .trim()
            .to_string();

        let admin_chat_id = parse_chat_id(
            &env::var("ADMIN_CHAT_ID")
                .or_else(|_| env::var("CHAT_ID"))
                .unwrap_or_default(),
        )?;

        Ok(Config {
            host: env_string("HOST", "0.0.0.0"),
            port: env_u16("PORT", 8080),
            log_level: log_level_from_env(),
            bot_content: BotContentConfig {
                designer_name: env_string("DESIGNER_NAME", "our studio"),
                portfolio_url: env_string("PORTFOLIO_URL", &frontend_url),
                contact_email: env_string("CONTACT_EMAIL", ""),
                contact_phone: env_string("CONTACT_PHONE", ""),
                instagram_url: env_string("INSTAGRAM_URL", ""),
                behance_url: env_string("BEHANCE_URL", ""),
            },
            frontend_url,
            allowed_origins,
            max_upload_bytes: env_usize("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES).max(1),
            static_images_dir: PathBuf::from(env_string("STATIC_IMAGES_DIR", "static/images")),
            public_images_path: "/static/images".to_string(),
            bot_token,
            admin_chat_id,
            cloudinary: load_cloudinary(),
            google_drive: load_google_drive(),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
