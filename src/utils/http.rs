use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS))
        .user_agent(concat!("portfolio-backend/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("Failed to build HTTP client")
});

pub fn get_http_client() -> &'static Client {
    &HTTP_CLIENT
}
