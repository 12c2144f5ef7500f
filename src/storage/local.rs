use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{
    file_extension, file_stem, image_dimensions, is_allowed_image, title_from_filename,
    ImageRecord, ImageStore, StoreError,
};

#[derive(Debug, Clone)]
pub struct LocalImageFile {
    pub path: PathBuf,
    pub filename: String,
    pub title: String,
}

#[derive(Debug, Default)]
pub struct LocalScan {
    pub images: Vec<LocalImageFile>,
    pub unsupported: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
    public_prefix: String,
}

fn join_error(err: tokio::task::JoinError) -> StoreError {
    StoreError::Io(io::Error::new(io::ErrorKind::Other, err))
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>, public_prefix: &str) -> Self {
        LocalStore {
            dir: dir.into(),
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn public_url(&self, filename: &str) -> String {
        format!("{}/{}", self.public_prefix, filename)
    }

    // Files sorted by filename. A missing directory scans as empty.
    pub async fn scan(&self) -> Result<LocalScan, StoreError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || scan_directory(&dir))
            .await
            .map_err(join_error)?
    }
}

fn scan_directory(dir: &Path) -> Result<LocalScan, StoreError> {
    let mut scan = LocalScan::default();
    if !dir.is_dir() {
        debug!("Local image directory {} does not exist", dir.display());
        return Ok(scan);
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        entries.push((filename, path));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    for (filename, path) in entries {
        if is_allowed_image(&filename) {
            scan.images.push(LocalImageFile {
                title: title_from_filename(&filename),
                path,
                filename,
            });
        } else {
            scan.unsupported.push(filename);
        }
    }
    Ok(scan)
}

fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for ch in title.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
    }
    slug.trim_end_matches('_').to_string()
}

fn candidate_name(stem: &str, ext: &str, attempt: usize) -> String {
    match attempt {
        1 => format!("{stem}.{ext}"),
        n => format!("{stem}-{n}.{ext}"),
    }
}

fn write_image(
    dir: &Path,
    bytes: &[u8],
    filename: &str,
    title: &str,
) -> Result<String, StoreError> {
    fs::create_dir_all(dir)?;
    let ext = file_extension(filename).unwrap_or_else(|| "jpg".to_string());
    let mut stem = slugify(title);
    if stem.is_empty() {
        stem = slugify(file_stem(filename));
    }
    if stem.is_empty() {
        stem = "image".to_string();
    }

    // create_new makes claiming a name atomic across concurrent uploads.
    let mut attempt = 1;
    loop {
        let candidate = candidate_name(&stem, &ext, attempt);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(&candidate))
        {
            Ok(mut file) => {
                file.write_all(bytes)?;
                return Ok(candidate);
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(err) => return Err(err.into()),
        }
    }
}

#[async_trait]
impl ImageStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn list_images(&self) -> Result<Vec<ImageRecord>, StoreError> {
        let files = self.scan().await?.images;
        let records = tokio::task::spawn_blocking({
            let prefix = self.public_prefix.clone();
            move || {
                files
                    .into_iter()
                    .map(|file| {
                        let dimensions = image::image_dimensions(&file.path).ok();
                        ImageRecord {
                            id: file.filename.clone(),
                            src: format!("{}/{}", prefix, file.filename),
                            title: file.title,
                            width: dimensions.map(|(w, _)| w),
                            height: dimensions.map(|(_, h)| h),
                        }
                    })
                    .collect::<Vec<_>>()
            }
        })
        .await
        .map_err(join_error)?;
        Ok(records)
    }

    async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        title: &str,
    ) -> Result<ImageRecord, StoreError> {
        let dimensions = image_dimensions(&bytes);
        if dimensions.is_none() {
            warn!("Could not read dimensions of {filename}");
        }

        let dir = self.dir.clone();
        let filename_owned = filename.to_string();
        let title_owned = title.to_string();
        let stored = tokio::task::spawn_blocking(move || {
            write_image(&dir, &bytes, &filename_owned, &title_owned)
        })
        .await
        .map_err(join_error)??;

        info!("Stored image locally as {}", stored);
        Ok(ImageRecord {
            src: self.public_url(&stored),
            id: stored,
            title: title.to_string(),
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
        })
    }
}
