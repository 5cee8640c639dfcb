//! Docker image pre-fetch.

use async_trait::async_trait;
use bollard::Docker;
use bollard::image::CreateImageOptions;
use charmforge_core::{ImagePuller, ToolError, ToolResult};
use futures::StreamExt;
use tracing::{debug, info};

const SERVICE: &str = "docker";

/// Pulls images through the local Docker daemon.
pub struct DockerImagePuller {
    docker: Docker,
}

impl DockerImagePuller {
    /// Connect to the local Docker daemon using its default socket.
    pub fn new() -> ToolResult<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| ToolError::Daemon {
            service: SERVICE.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ImagePuller for DockerImagePuller {
    async fn pull(&self, image: &str) -> ToolResult<()> {
        info!(image = %image, "Pulling image");
        let create_image_options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut pull_stream = self
            .docker
            .create_image(Some(create_image_options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!(image = %image, status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    return Err(ToolError::Daemon {
                        service: SERVICE.to_string(),
                        message: format!("pull {}: {}", image, e),
                    });
                }
            }
        }

        Ok(())
    }
}
