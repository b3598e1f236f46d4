use crate::common::error::Error;
use golem_rust::Schema;
use serde::{Deserialize, Serialize};
use wstd::http::{Client, IntoBody, Method, Request};

/// Raw image attached to a post, comment, reply, message or profile.
#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// Content-addressed object name, `<md5>-<file name>`.
    pub fn object_name(&self) -> String {
        let digest = md5::compute(&self.bytes);
        let file_name: String = self
            .file_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{digest:x}-{file_name}")
    }
}

#[derive(Deserialize)]
struct StoredImage {
    url: String,
}

/// "Store image, get URL" capability.
pub trait ImageStore {
    async fn store(&self, image: &ImageUpload) -> Result<String, Error>;
}

pub struct HttpImageStore {
    endpoint: String,
}

impl HttpImageStore {
    pub fn new(endpoint: String) -> Self {
        Self { endpoint }
    }

    pub fn from_config() -> Option<Self> {
        crate::config::get()
            .image_store_url
            .clone()
            .map(HttpImageStore::new)
    }
}

impl ImageStore for HttpImageStore {
    async fn store(&self, image: &ImageUpload) -> Result<String, Error> {
        let object_name = image.object_name();

        log::debug!(
            "store image - endpoint: {}, object: {object_name}, size: {}",
            self.endpoint,
            image.bytes.len()
        );

        let request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.as_str())
            .header("content-type", image.content_type.as_str())
            .header("x-object-name", object_name.as_str())
            .body(image.bytes.clone().into_body())
            .map_err(Error::upload)?;

        let mut response = Client::new().send(request).await.map_err(Error::upload)?;

        if !response.status().is_success() {
            return Err(Error::upload(format!(
                "image store responded with status {}",
                response.status()
            )));
        }

        let stored: StoredImage = response
            .body_mut()
            .json()
            .await
            .map_err(Error::upload)?;

        Ok(stored.url)
    }
}

/// Stores an optional image. A failed upload never aborts the parent write:
/// the image is dropped and the failure is recorded in `warnings`.
pub async fn store_optional<S: ImageStore>(
    store: Option<&S>,
    image: Option<ImageUpload>,
    warnings: &mut Vec<String>,
) -> Option<String> {
    let image = image?;

    let result = match store {
        Some(store) => store.store(&image).await,
        None => Err(Error::upload("image store is not configured")),
    };

    match result {
        Ok(url) => Some(url),
        Err(err) => {
            log::warn!("store image - file: {}, error: {err}", image.file_name);
            warnings.push(format!("image was not attached: {err}"));
            None
        }
    }
}

/// Stores an optional image with the configured HTTP image store.
pub async fn upload_image(image: Option<ImageUpload>, warnings: &mut Vec<String>) -> Option<String> {
    let store = HttpImageStore::from_config();
    store_optional(store.as_ref(), image, warnings).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    struct FakeStore {
        fail: bool,
    }

    impl ImageStore for FakeStore {
        async fn store(&self, image: &ImageUpload) -> Result<String, Error> {
            if self.fail {
                Err(Error::upload("store unavailable"))
            } else {
                Ok(format!("https://images.test/{}", image.object_name()))
            }
        }
    }

    fn image() -> ImageUpload {
        ImageUpload {
            file_name: "my photo.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            bytes: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_object_name_is_content_addressed_and_sanitized() {
        let name = image().object_name();
        assert!(name.ends_with("-my_photo.jpg"));
        assert_eq!(name, image().object_name());
    }

    #[test]
    fn test_store_optional_returns_url() {
        let mut warnings = vec![];
        let url = block_on(store_optional(
            Some(&FakeStore { fail: false }),
            Some(image()),
            &mut warnings,
        ));

        assert!(url.unwrap().starts_with("https://images.test/"));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_store_optional_failure_proceeds_with_warning() {
        let mut warnings = vec![];
        let url = block_on(store_optional(
            Some(&FakeStore { fail: true }),
            Some(image()),
            &mut warnings,
        ));

        assert!(url.is_none());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_store_optional_without_store_or_image() {
        let mut warnings = vec![];

        let url = block_on(store_optional::<FakeStore>(None, None, &mut warnings));
        assert!(url.is_none());
        assert!(warnings.is_empty());

        let url = block_on(store_optional::<FakeStore>(None, Some(image()), &mut warnings));
        assert!(url.is_none());
        assert_eq!(warnings.len(), 1);
    }
}
