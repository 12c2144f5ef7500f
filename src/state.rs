use std::sync::Arc;

use crate::gallery::GalleryService;
use crate::notifier::OrderNotifier;
use crate::storage::cloudinary::CloudinaryStore;
use crate::storage::local::LocalStore;
use crate::storage::ImageStore;
use crate::uploads::UploadDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub gallery: GalleryService,
    pub uploads: UploadDispatcher,
    pub notifier: OrderNotifier,
    pub cloudinary: Option<Arc<CloudinaryStore>>,
    pub local: Arc<LocalStore>,
    pub frontend_url: String,
}

impl AppState {
    pub fn new(
        cloudinary: Option<Arc<CloudinaryStore>>,
        secondary: Option<Arc<dyn ImageStore>>,
        local: Arc<LocalStore>,
        notifier: OrderNotifier,
        frontend_url: String,
    ) -> Self {
        let primary = cloudinary
            .clone()
            .map(|store| store as Arc<dyn ImageStore>);
        let local_store: Arc<dyn ImageStore> = local.clone();

        AppState {
            gallery: GalleryService::new(primary.clone(), secondary.clone(), local_store.clone()),
            uploads: UploadDispatcher::new(primary, secondary, local_store),
            notifier,
            cloudinary,
            local,
            frontend_url,
        }
    }
}
