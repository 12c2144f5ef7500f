use axum::extract::{Multipart, Path, Query, State};
use axum::response::{Html, Redirect};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::error::ApiError;
use crate::gallery::{PaginatedImages, DEFAULT_PAGE, DEFAULT_PER_PAGE};
use crate::migration::migrate_local_images;
use crate::notifier::OrderRequest;
use crate::state::AppState;
use crate::uploads::UploadError;

#[derive(Debug, Default, Deserialize)]
pub struct ImageQuery {
    page: Option<String>,
    per_page: Option<String>,
}

// Absent or unparsable values use `default`; values below 1 become 1.
fn parse_positive(value: Option<&str>, default: u32) -> u32 {
    value
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .map(|parsed| parsed.clamp(1, i64::from(u32::MAX)) as u32)
        .unwrap_or(default)
}

pub async fn list_images(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
) -> Json<PaginatedImages> {
    let page = parse_positive(query.page.as_deref(), DEFAULT_PAGE);
    let per_page = parse_positive(query.per_page.as_deref(), DEFAULT_PER_PAGE);
    Json(state.gallery.list_images(page, per_page).await)
}

pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut title = String::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?.to_vec();
                file = Some((filename, bytes));
            }
            Some("title") => title = field.text().await?,
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or(UploadError::NoFile)?;
    let uploaded = state.uploads.upload(bytes, &filename, &title).await?;
    Ok(Json(json!({ "success": true, "data": uploaded })))
}

pub async fn delete_image(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let store = state
        .cloudinary
        .as_ref()
        .ok_or(ApiError::NotConfigured("Cloudinary"))?;
    if store.delete_image(&public_id).await? {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(ApiError::NotFound)
    }
}

fn order_confirmation_page(frontend_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Request received</title>
  <style>
    body {{ font-family: sans-serif; text-align: center; padding: 60px 20px; }}
    a {{ color: #6c5ce7; }}
  </style>
</head>
<body>
  <h1>Thank you!</h1>
  <p>Your design request has been received. You will hear back soon.</p>
  <p><a href="{frontend_url}">Back to the portfolio</a></p>
</body>
</html>"#
    )
}

pub async fn submit_order(
    State(state): State<AppState>,
    Form(order): Form<OrderRequest>,
) -> Html<String> {
    info!("Order request received from {}", order.email.trim());
    state.notifier.notify(order);
    Html(order_confirmation_page(&state.frontend_url))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "message": "Portfolio backend is running",
    }))
}

pub async fn migrate_images(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let store = state
        .cloudinary
        .as_ref()
        .ok_or(ApiError::NotConfigured("Cloudinary"))?;
    let summary = migrate_local_images(&state.local, store.as_ref()).await?;
    Ok(Json(json!({
        "success": true,
        "uploaded": summary.uploaded,
        "failed": summary.failed,
        "skipped": summary.skipped,
    })))
}

pub async fn index(State(state): State<AppState>) -> Redirect {
    Redirect::temporary(&state.frontend_url)
}
