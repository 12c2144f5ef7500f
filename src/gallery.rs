use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::storage::{ImageRecord, ImageStore};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PER_PAGE: u32 = 6;
pub const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: usize,
    pub pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginatedImages {
    pub images: Vec<ImageRecord>,
    pub pagination: Pagination,
}

pub fn paginate(items: Vec<ImageRecord>, page: u32, per_page: u32) -> PaginatedImages {
    let page = page.max(1);
    let per_page = per_page.clamp(1, MAX_PER_PAGE);
    let total = items.len();
    let per_page_len = per_page as usize;

    let start = (page as usize - 1).saturating_mul(per_page_len);
    let end = start.saturating_add(per_page_len);
    let images = if start >= total {
        Vec::new()
    } else {
        items
            .into_iter()
            .skip(start)
            .take(per_page_len)
            .collect()
    };

    PaginatedImages {
        images,
        pagination: Pagination {
            page,
            per_page,
            total,
            pages: total.div_ceil(per_page_len),
            has_next: end < total,
            has_prev: page > 1,
        },
    }
}

/// Merges the configured image sources into one listing.
///
/// The primary store is queried first; when it is absent, fails, or has no
/// images the local store answers instead. The secondary store, when
/// configured, is always appended after that block.
#[derive(Clone)]
pub struct GalleryService {
    primary: Option<Arc<dyn ImageStore>>,
    secondary: Option<Arc<dyn ImageStore>>,
    local: Arc<dyn ImageStore>,
}

async fn query_store(store: &dyn ImageStore) -> Vec<ImageRecord> {
    match store.list_images().await {
        Ok(images) => images,
        Err(err) => {
            warn!("Listing images from {} failed: {err}", store.name());
            Vec::new()
        }
    }
}

impl GalleryService {
    pub fn new(
        primary: Option<Arc<dyn ImageStore>>,
        secondary: Option<Arc<dyn ImageStore>>,
        local: Arc<dyn ImageStore>,
    ) -> Self {
        GalleryService {
            primary,
            secondary,
            local,
        }
    }

    pub async fn all_images(&self) -> Vec<ImageRecord> {
        let mut images = match &self.primary {
            Some(primary) => query_store(primary.as_ref()).await,
            None => Vec::new(),
        };

        if images.is_empty() {
            if self.primary.is_some() {
                info!("Primary store returned no images; using local images");
            }
            images = query_store(self.local.as_ref()).await;
        }

        if let Some(secondary) = &self.secondary {
            images.extend(query_store(secondary.as_ref()).await);
        }

        images
    }

    pub async fn list_images(&self, page: u32, per_page: u32) -> PaginatedImages {
        let images = self.all_images().await;
        let result = paginate(images, page, per_page);
        info!(
            "Serving page {} ({} of {} image(s))",
            result.pagination.page,
            result.images.len(),
            result.pagination.total
        );
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::StoreError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    pub(crate) struct FakeStore {
        pub name: &'static str,
        pub images: Vec<ImageRecord>,
        pub fail: bool,
        pub list_calls: Mutex<usize>,
        pub uploads: Mutex<Vec<(String, String)>>,
    }

    impl FakeStore {
        pub fn with_ids(name: &'static str, ids: &[&str]) -> Self {
            FakeStore {
                name,
                images: ids.iter().map(|id| record(id)).collect(),
                fail: false,
                list_calls: Mutex::new(0),
                uploads: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(name: &'static str) -> Self {
            FakeStore {
                fail: true,
                ..FakeStore::with_ids(name, &[])
            }
        }
    }

    pub(crate) fn record(id: &str) -> ImageRecord {
        ImageRecord {
            id: id.to_string(),
            src: format!("https://cdn.example/{id}.jpg"),
            title: id.to_uppercase(),
            width: None,
            height: None,
        }
    }

    #[async_trait]
    impl ImageStore for FakeStore {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn list_images(&self) -> Result<Vec<ImageRecord>, StoreError> {
            *self.list_calls.lock() += 1;
            if self.fail {
                return Err(StoreError::InvalidResponse("store offline".to_string()));
            }
            Ok(self.images.clone())
        }

        async fn upload(
            &self,
            _bytes: Vec<u8>,
            filename: &str,
            title: &str,
        ) -> Result<ImageRecord, StoreError> {
            self.uploads
                .lock()
                .push((filename.to_string(), title.to_string()));
            if self.fail {
                return Err(StoreError::Api {
                    service: "fake",
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(ImageRecord {
                title: title.to_string(),
                ..record(&format!("{}/{}", self.name, filename))
            })
        }
    }

    fn ids(images: &[ImageRecord]) -> Vec<&str> {
        images.iter().map(|image| image.id.as_str()).collect()
    }

    fn records(ids: &[&str]) -> Vec<ImageRecord> {
        ids.iter().map(|id| record(id)).collect()
    }

    #[test]
    fn first_page_of_eight() {
        let result = paginate(records(&["A", "B", "C", "D", "E", "F", "G", "H"]), 1, 6);
        assert_eq!(ids(&result.images), vec!["A", "B", "C", "D", "E", "F"]);
        assert_eq!(result.pagination.pages, 2);
        assert_eq!(result.pagination.total, 8);
        assert!(result.pagination.has_next);
        assert!(!result.pagination.has_prev);
    }

    #[test]
    fn second_page_of_eight() {
        let result = paginate(records(&["A", "B", "C", "D", "E", "F", "G", "H"]), 2, 6);
        assert_eq!(ids(&result.images), vec!["G", "H"]);
        assert!(!result.pagination.has_next);
        assert!(result.pagination.has_prev);
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let result = paginate(records(&["A", "B", "C"]), 5, 2);
        assert!(result.images.is_empty());
        assert_eq!(result.pagination.pages, 2);
        assert!(!result.pagination.has_next);
        assert!(result.pagination.has_prev);
    }

    #[test]
    fn empty_listing_has_zero_pages() {
        let result = paginate(Vec::new(), 1, 6);
        assert!(result.images.is_empty());
        assert_eq!(result.pagination.pages, 0);
        assert!(!result.pagination.has_next);
        assert!(!result.pagination.has_prev);
    }

    #[test]
    fn out_of_range_parameters_are_clamped() {
        let result = paginate(records(&["A", "B"]), 0, 0);
        assert_eq!(result.pagination.page, 1);
        assert_eq!(result.pagination.per_page, 1);
        assert_eq!(ids(&result.images), vec!["A"]);

        let result = paginate(records(&["A"]), 1, 10_000);
        assert_eq!(result.pagination.per_page, MAX_PER_PAGE);
    }

    #[test]
    fn page_length_and_flags_hold_for_all_inputs() {
        for total in 0..15usize {
            let items: Vec<ImageRecord> = (0..total).map(|i| record(&i.to_string())).collect();
            for per_page in 1..7u32 {
                for page in 1..6u32 {
                    let result = paginate(items.clone(), page, per_page);
                    let start = (page as usize - 1) * per_page as usize;
                    let expected_len = total.saturating_sub(start).min(per_page as usize);
                    assert_eq!(result.images.len(), expected_len);
                    assert_eq!(
                        result.pagination.pages,
                        (total + per_page as usize - 1) / per_page as usize
                    );
                    assert_eq!(
                        result.pagination.has_next,
                        start + result.images.len() < total
                    );
                    assert_eq!(result.pagination.has_prev, page > 1);
                }
            }
        }
    }

    #[tokio::test]
    async fn primary_results_skip_local_fallback() {
        let primary = Arc::new(FakeStore::with_ids("primary", &["p1", "p2"]));
        let local = Arc::new(FakeStore::with_ids("local", &["l1"]));
        let gallery = GalleryService::new(Some(primary.clone()), None, local.clone());

        let images = gallery.all_images().await;
        assert_eq!(ids(&images), vec!["p1", "p2"]);
        assert_eq!(*local.list_calls.lock(), 0);
    }

    #[tokio::test]
    async fn empty_or_failing_primary_falls_back_to_local() {
        let local = Arc::new(FakeStore::with_ids("local", &["l1", "l2"]));

        let empty = GalleryService::new(
            Some(Arc::new(FakeStore::with_ids("primary", &[]))),
            None,
            local.clone(),
        );
        assert_eq!(ids(&empty.all_images().await), vec!["l1", "l2"]);

        let failing = GalleryService::new(
            Some(Arc::new(FakeStore::failing("primary"))),
            None,
            local.clone(),
        );
        assert_eq!(ids(&failing.all_images().await), vec!["l1", "l2"]);

        let unconfigured = GalleryService::new(None, None, local);
        assert_eq!(ids(&unconfigured.all_images().await), vec!["l1", "l2"]);
    }

    #[tokio::test]
    async fn secondary_is_appended_without_deduplication() {
        let gallery = GalleryService::new(
            Some(Arc::new(FakeStore::with_ids("primary", &["A", "B"]))),
            Some(Arc::new(FakeStore::with_ids("secondary", &["B", "C"]))),
            Arc::new(FakeStore::with_ids("local", &["L"])),
        );
        assert_eq!(ids(&gallery.all_images().await), vec!["A", "B", "B", "C"]);
    }

    #[tokio::test]
    async fn failing_sources_never_surface_errors() {
        let gallery = GalleryService::new(
            Some(Arc::new(FakeStore::failing("primary"))),
            Some(Arc::new(FakeStore::failing("secondary"))),
            Arc::new(FakeStore::failing("local")),
        );
        let result = gallery.list_images(1, 6).await;
        assert!(result.images.is_empty());
        assert_eq!(result.pagination.total, 0);
    }

    #[tokio::test]
    async fn listing_spans_sources_in_priority_order() {
        let gallery = GalleryService::new(
            Some(Arc::new(FakeStore::with_ids(
                "primary",
                &["A", "B", "C", "D", "E"],
            ))),
            Some(Arc::new(FakeStore::with_ids("secondary", &["F", "G", "H"]))),
            Arc::new(FakeStore::with_ids("local", &[])),
        );
        let first = gallery.list_images(1, 6).await;
        assert_eq!(ids(&first.images), vec!["A", "B", "C", "D", "E", "F"]);
        let second = gallery.list_images(2, 6).await;
        assert_eq!(ids(&second.images), vec!["G", "H"]);
        assert!(!second.pagination.has_next);
    }
}
