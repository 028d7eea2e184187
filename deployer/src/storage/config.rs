//! Server and project configuration document

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::project::{FileMapping, ProjectSpec, Scripts, ServerTarget};

/// The `config.json` document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigStore {
    #[serde(default)]
    pub servers: BTreeMap<String, ServerTarget>,

    #[serde(default)]
    pub projects: BTreeMap<String, ProjectSpec>,
}

impl ConfigStore {
    /// The document written on first run
    pub fn demo() -> Self {
        let mut servers = BTreeMap::new();
        servers.insert(
            "local-demo".to_string(),
            ServerTarget::new("127.0.0.1", 22, "root", "123456"),
        );

        let mut projects = BTreeMap::new();
        projects.insert(
            "demo-project".to_string(),
            ProjectSpec {
                name: "Demo project".to_string(),
                server: "local-demo".to_string(),
                pre_commands: vec!["cd ./demo && mvn clean package".to_string()],
                files: vec![FileMapping::new("./demo/target/app.jar", "/opt/demo/app.jar")],
                scripts: Scripts {
                    deploy: "cd /opt/demo && ./deploy.sh".to_string(),
                    restart: "cd /opt/demo && ./restart.sh".to_string(),
                    status: "cd /opt/demo && ./status.sh".to_string(),
                },
            },
        );

        Self { servers, projects }
    }

    /// Write the demo document if `file` does not exist yet
    pub async fn ensure_exists(file: &File) -> Result<bool, DeployError> {
        if file.exists().await {
            return Ok(false);
        }
        info!("Creating default config at {}", file.path().display());
        Self::demo().save(file).await?;
        Ok(true)
    }

    pub async fn load(file: &File) -> Result<Self, DeployError> {
        if !file.exists().await {
            return Err(DeployError::ConfigError(format!(
                "config file not found: {}",
                file.path().display()
            )));
        }
        file.read_json().await
    }

    pub async fn save(&self, file: &File) -> Result<(), DeployError> {
        file.write_json(self).await
    }

    pub fn server(&self, name: &str) -> Result<&ServerTarget, DeployError> {
        self.servers
            .get(name)
            .ok_or_else(|| DeployError::NotFound(format!("server '{}'", name)))
    }

    pub fn project(&self, id: &str) -> Result<&ProjectSpec, DeployError> {
        self.projects
            .get(id)
            .ok_or_else(|| DeployError::NotFound(format!("project '{}'", id)))
    }

    /// Snapshot of a project and the server it points at
    pub fn resolve(&self, project_id: &str) -> Result<(ProjectSpec, ServerTarget), DeployError> {
        let project = self.project(project_id)?;
        let server = self.server(&project.server)?;
        Ok((project.clone(), server.clone()))
    }
}
