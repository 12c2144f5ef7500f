use serde::Serialize;
use tracing::{error, info};

use crate::storage::local::LocalStore;
use crate::storage::{ImageStore, StoreError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub uploaded: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub async fn migrate_local_images(
    local: &LocalStore,
    target: &dyn ImageStore,
) -> Result<MigrationSummary, StoreError> {
    info!(
        "Migrating images from {} to {}",
        local.dir().display(),
        target.name()
    );

    let scan = local.scan().await?;
    for filename in &scan.unsupported {
        info!("Skipping {filename}: unsupported file type");
    }
    let mut summary = MigrationSummary {
        skipped: scan.unsupported.len(),
        ..MigrationSummary::default()
    };

    for file in scan.images {
        let bytes = match tokio::fs::read(&file.path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                error!("Reading {} failed: {err}", file.path.display());
                summary.failed += 1;
                continue;
            }
        };

        match target.upload(bytes, &file.filename, &file.title).await {
            Ok(record) => {
                info!(
                    "Migrated {} as {} ({})",
                    file.filename, record.id, record.src
                );
                summary.uploaded += 1;
            }
            Err(err) => {
                error!("Migrating {} failed: {err}", file.filename);
                summary.failed += 1;
            }
        }
    }

    info!(
        "Migration finished: uploaded={} failed={} skipped={}",
        summary.uploaded, summary.failed, summary.skipped
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::gallery::tests::FakeStore;

    fn seeded_dir(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in files {
            fs::write(dir.path().join(name), b"bytes").unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn uploads_supported_files_in_order_with_derived_titles() {
        let dir = seeded_dir(&["b_poster.png", "a_logo-final.jpg", "notes.txt"]);
        let local = LocalStore::new(dir.path(), "/static/images");
        let target = FakeStore::with_ids("cloudinary", &[]);

        let summary = migrate_local_images(&local, &target).await.unwrap();
        assert_eq!(
            summary,
            MigrationSummary {
                uploaded: 2,
                failed: 0,
                skipped: 1
            }
        );
        assert_eq!(
            target.uploads.lock().as_slice(),
            &[
                ("a_logo-final.jpg".to_string(), "A Logo Final".to_string()),
                ("b_poster.png".to_string(), "B Poster".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn failures_are_counted_and_do_not_stop_the_run() {
        let dir = seeded_dir(&["one.png", "two.webp"]);
        let local = LocalStore::new(dir.path(), "/static/images");
        let target = FakeStore::failing("cloudinary");

        let summary = migrate_local_images(&local, &target).await.unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.uploaded, 0);
        assert_eq!(target.uploads.lock().len(), 2);
    }

    #[tokio::test]
    async fn missing_directory_is_an_empty_run() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalStore::new(dir.path().join("absent"), "/static/images");
        let target = FakeStore::with_ids("cloudinary", &[]);

        let summary = migrate_local_images(&local, &target).await.unwrap();
        assert_eq!(summary, MigrationSummary::default());
    }
}
