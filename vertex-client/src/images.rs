//! Image endpoints

use crate::error::Result;
use crate::{ByteStream, KernelClient};
use vertex_core::dto::docker::{BuildImageRequest, ImageInfo, PullImageRequest};

impl KernelClient {
    /// Pull an image
    ///
    /// # Returns
    /// A newline-delimited JSON stream of `DockerProgress` messages
    pub async fn pull_image(&self, image: &str) -> Result<ByteStream> {
        let response = self
            .client
            .post(self.url("/image/pull"))
            .json(&PullImageRequest {
                image: image.to_string(),
            })
            .send()
            .await?;

        self.handle_stream_response(response).await
    }

    /// Build an image from a directory on the host
    ///
    /// # Returns
    /// A newline-delimited JSON stream of `DockerProgress` messages
    pub async fn build_image(&self, req: &BuildImageRequest) -> Result<ByteStream> {
        let response = self
            .client
            .post(self.url("/image/build"))
            .json(req)
            .send()
            .await?;

        self.handle_stream_response(response).await
    }

    /// Get the id and tags of a local image
    ///
    /// # Errors
    /// [`crate::ClientError::ImageNotFound`] if the image is not present locally
    pub async fn image_info(&self, image: &str) -> Result<ImageInfo> {
        let response = self
            .client
            .get(self.url("/image/info"))
            .query(&[("image", image)])
            .send()
            .await?;

        self.handle_response(response).await
    }
}
