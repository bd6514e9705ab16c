//! Container endpoints

use crate::error::Result;
use crate::{ByteStream, KernelClient};
use vertex_core::dto::docker::{
    ContainerInfo, ContainerSummary, CreateContainerRequest, CreateContainerResponse, LogPipe,
    WaitCondition,
};

impl KernelClient {
    // =============================================================================
    // Container Query
    // =============================================================================

    /// List all containers known to Docker, running or not
    pub async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let response = self.client.get(self.url("/containers")).send().await?;

        self.handle_response(response).await
    }

    /// Get details for a specific container
    ///
    /// # Errors
    /// [`crate::ClientError::ContainerNotFound`] if the id is unknown
    pub async fn container_info(&self, id: &str) -> Result<ContainerInfo> {
        let url = self.url(&format!("/container/{}/info", id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Container Lifecycle
    // =============================================================================

    /// Create a container
    ///
    /// # Returns
    /// The new container id and any warnings reported by Docker
    pub async fn create_container(
        &self,
        req: &CreateContainerRequest,
    ) -> Result<CreateContainerResponse> {
        let response = self
            .client
            .post(self.url("/container"))
            .json(req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn start_container(&self, id: &str) -> Result<()> {
        let url = self.url(&format!("/container/{}/start", id));
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }

    pub async fn stop_container(&self, id: &str) -> Result<()> {
        let url = self.url(&format!("/container/{}/stop", id));
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }

    pub async fn delete_container(&self, id: &str) -> Result<()> {
        let url = self.url(&format!("/container/{}", id));
        let response = self.client.delete(&url).send().await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Container Streams
    // =============================================================================

    /// Follow one output pipe of a container
    ///
    /// The stream ends when the container stops or the kernel closes the
    /// connection.
    pub async fn container_logs(&self, id: &str, pipe: LogPipe) -> Result<ByteStream> {
        let url = self.url(&format!("/container/{}/logs/{}", id, pipe.as_str()));
        let response = self.client.get(&url).send().await?;

        self.handle_stream_response(response).await
    }

    /// Block until the container satisfies `condition`
    pub async fn wait_container(&self, id: &str, condition: WaitCondition) -> Result<()> {
        let url = self.url(&format!("/container/{}/wait/{}", id, condition.as_str()));
        let response = self.client.get(&url).send().await?;

        self.handle_empty_response(response).await
    }
}
