use std::path::Path;

use bytes::Bytes;

use crate::error::{AppError, AppResult};
use crate::remote::RemoteDataService;

const DEFAULT_EXTENSION: &str = "jpeg";

/// Buckets images are stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Avatars,
    Banners,
    Posts,
}

impl Bucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Avatars => "avatars",
            Bucket::Banners => "banners",
            Bucket::Posts => "posts",
        }
    }
}

/// An image picked for upload
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub name: String,
    pub data: Bytes,
    pub content_type: Option<String>,
}

impl ImageFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            content_type: None,
        }
    }

    fn extension(&self) -> String {
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
    }

    fn mime_type(&self, extension: &str) -> String {
        self.content_type.clone().unwrap_or_else(|| {
            mime_guess::from_ext(extension)
                .first_or_octet_stream()
                .to_string()
        })
    }
}

/// Store an image under a fresh unique name and return its public URL.
pub async fn upload_image(
    remote: &dyn RemoteDataService,
    bucket: Bucket,
    file: &ImageFile,
) -> AppResult<String> {
    if file.data.is_empty() {
        return Err(AppError::BadRequest(format!("{} is empty", file.name)));
    }

    let extension = file.extension();
    let object_name = format!("{}.{}", uuid::Uuid::now_v7(), extension);
    let content_type = file.mime_type(&extension);

    let path = remote
        .upload(bucket.as_str(), &object_name, file.data.clone(), &content_type)
        .await
        .map_err(|e| {
            tracing::error!("Error uploading {}: {}", file.name, e);
            e
        })?;
    let url = remote.public_url(bucket.as_str(), &path)?;

    tracing::info!("Uploaded {} to {}", file.name, url);
    Ok(url)
}

/// Upload several images in order. Empty files are skipped. Stops at the
/// first failure and hands back what was uploaded before it.
pub async fn upload_images(
    remote: &dyn RemoteDataService,
    bucket: Bucket,
    files: &[ImageFile],
) -> (Vec<String>, Option<AppError>) {
    let mut urls = Vec::with_capacity(files.len());
    for file in files {
        if file.data.is_empty() {
            tracing::debug!("Skipping empty file {}", file.name);
            continue;
        }
        match upload_image(remote, bucket, file).await {
            Ok(url) => urls.push(url),
            Err(e) => return (urls, Some(e)),
        }
    }
    (urls, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_kept_lowercase() {
        let file = ImageFile::new("Holiday.PNG", vec![1u8]);
        assert_eq!(file.extension(), "png");
    }

    #[test]
    fn missing_extension_defaults_to_jpeg() {
        let file = ImageFile::new("camera-roll", vec![1u8]);
        assert_eq!(file.extension(), "jpeg");
        assert_eq!(file.mime_type(&file.extension()), "image/jpeg");
    }

    #[test]
    fn explicit_content_type_wins() {
        let mut file = ImageFile::new("a.png", vec![1u8]);
        file.content_type = Some("image/webp".into());
        assert_eq!(file.mime_type("png"), "image/webp");
    }

    #[test]
    fn bucket_names() {
        assert_eq!(Bucket::Avatars.as_str(), "avatars");
        assert_eq!(Bucket::Banners.as_str(), "banners");
        assert_eq!(Bucket::Posts.as_str(), "posts");
    }
}
