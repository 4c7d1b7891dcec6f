use anyhow::{Context, Result};
use clap::Parser;
use eks_model::{ClusterConfig, Configuration};
use log::debug;
use std::path::{Path, PathBuf};

/// Where the cluster configuration comes from.
#[derive(Debug, Parser)]
pub(crate) struct ConfigArgs {
    /// The logical name of the cluster; every resource name starts with it.
    #[clap(long = "name", short = 'n', default_value = "cluster")]
    pub(crate) name: String,

    /// Path to the cluster configuration, in YAML or JSON.
    #[clap(long = "config", short = 'f')]
    pub(crate) config: Option<PathBuf>,

    /// Path to the configuration the cluster was last composed with. Changes that cannot be
    /// applied to the existing cluster are reported or marked for replacement.
    #[clap(long = "previous")]
    pub(crate) previous: Option<PathBuf>,
}

impl ConfigArgs {
    /// The cluster configuration, or the default one when no file was given.
    pub(crate) async fn load(&self) -> Result<ClusterConfig> {
        match &self.config {
            Some(path) => read_config(path).await,
            None => Ok(ClusterConfig::default()),
        }
    }

    pub(crate) async fn load_previous(&self) -> Result<Option<ClusterConfig>> {
        match &self.previous {
            Some(path) => Ok(Some(read_config(path).await?)),
            None => Ok(None),
        }
    }
}

/// YAML is a superset of JSON, so one parser reads both.
async fn read_config(path: &Path) -> Result<ClusterConfig> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .context(format!("Unable to read '{}'", path.display()))?;
    debug!("Read {} bytes from '{}'", contents.len(), path.display());
    let document: serde_json::Value = serde_yaml::from_str(&contents)
        .context(format!("Unable to parse '{}' as YAML", path.display()))?;
    ClusterConfig::from_value(document).context(format!(
        "'{}' is not a cluster configuration",
        path.display()
    ))
}
