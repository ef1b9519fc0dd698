use super::{CommandRunner, ResourceKind, ResourceLister};
use crate::error::SamplingError;
use crate::types::InventorySnapshot;
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::image::ListImagesOptions;
use bollard::Docker;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

/// Length of the short ids printed by the docker CLI.
const SHORT_ID_LEN: usize = 12;

/// Samples resources by running the docker CLI through a [`CommandRunner`].
pub struct CliLister {
    runner: Arc<dyn CommandRunner>,
    docker_bin: String,
}

impl CliLister {
    pub fn new(runner: Arc<dyn CommandRunner>, docker_bin: impl Into<String>) -> Self {
        Self {
            runner,
            docker_bin: docker_bin.into(),
        }
    }
}

#[async_trait]
impl ResourceLister for CliLister {
    async fn list_resource_lines(&self, kind: ResourceKind) -> Result<Vec<String>, SamplingError> {
        let runner = Arc::clone(&self.runner);
        let command = kind.list_command(&self.docker_bin);
        // Process spawn blocks; keep it off the async workers.
        let output = tokio::task::spawn_blocking(move || runner.run(&command))
            .await
            .map_err(|e| SamplingError::Join(e.to_string()))??;
        Ok(InventorySnapshot::from_output(&output).lines().to_vec())
    }
}

/// Samples resources straight from the Docker engine API, rendering the
/// same line format as [`CliLister`].
pub struct EngineLister {
    docker: Docker,
}

impl EngineLister {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn connect() -> Result<Self, bollard::errors::Error> {
        // Unix socket on Linux, named pipe on Windows.
        Docker::connect_with_local_defaults().map(Self::new)
    }

    async fn container_lines(&self) -> Result<Vec<String>, SamplingError> {
        let opts = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(opts))
            .await
            .map_err(|e| SamplingError::Engine(e.to_string()))?;

        let mut lines = Vec::with_capacity(containers.len());
        for c in containers {
            let id = match c.id.as_deref() {
                Some(id) => short_id(id),
                None => continue,
            };
            let name = c
                .names
                .as_ref()
                .and_then(|n| n.first())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| id.clone());
            let image = c.image.unwrap_or_default();
            let status = c.status.unwrap_or_default();
            lines.push(format!("{} {} {} {}", id, name, image, status));
        }
        Ok(lines)
    }

    async fn image_lines(&self) -> Result<Vec<String>, SamplingError> {
        let mut filters = HashMap::new();
        filters.insert("dangling".to_string(), vec!["false".to_string()]);
        let opts = ListImagesOptions::<String> {
            all: false,
            filters,
            ..Default::default()
        };
        let images = self
            .docker
            .list_images(Some(opts))
            .await
            .map_err(|e| SamplingError::Engine(e.to_string()))?;

        let mut lines = Vec::new();
        for image in images {
            let id = short_id(&image.id);
            for repo_tag in &image.repo_tags {
                if let Some((repository, tag)) = repo_tag.rsplit_once(':') {
                    lines.push(format!("{} {} {}", id, repository, tag));
                }
            }
        }
        Ok(lines)
    }
}

#[async_trait]
impl ResourceLister for EngineLister {
    async fn list_resource_lines(&self, kind: ResourceKind) -> Result<Vec<String>, SamplingError> {
        let lines = match kind {
            ResourceKind::Containers => self.container_lines().await?,
            ResourceKind::Images => self.image_lines().await?,
        };
        debug!("Engine listed {} {}", lines.len(), kind);
        Ok(lines)
    }
}

fn short_id(id: &str) -> String {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    id.chars().take(SHORT_ID_LEN).collect()
}

/// One line of the container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    pub running: bool,
}

impl ContainerRecord {
    /// Parse `ID NAME IMAGE STATUS...`. Lines with fewer fields are rejected.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.splitn(4, ' ');
        let id = fields.next().filter(|s| !s.is_empty())?;
        let name = fields.next().filter(|s| !s.is_empty())?;
        let image = fields.next().filter(|s| !s.is_empty())?;
        let status = fields.next().unwrap_or_default().trim();
        Some(Self {
            id: id.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            status: status.to_string(),
            running: status.starts_with("Up"),
        })
    }

    /// Tree label, `name – image`.
    pub fn label(&self) -> String {
        format!("{} \u{2013} {}", self.name, self.image)
    }
}

/// One line of the image listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: String,
    pub repository: String,
    pub tag: String,
}

impl ImageRecord {
    /// Parse `ID REPOSITORY TAG`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let id = fields.next()?;
        let repository = fields.next()?;
        let tag = fields.next()?;
        Some(Self {
            id: id.to_string(),
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    /// `repository:tag`
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

pub fn parse_containers(lines: &[String]) -> Vec<ContainerRecord> {
    lines.iter().filter_map(|l| ContainerRecord::parse(l)).collect()
}

pub fn parse_images(lines: &[String]) -> Vec<ImageRecord> {
    lines.iter().filter_map(|l| ImageRecord::parse(l)).collect()
}
