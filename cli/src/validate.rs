use crate::config::ConfigArgs;
use anyhow::{Context, Result};
use clap::Parser;
use eks_composer::resolver;

/// Validate a cluster configuration and print how it would be deployed.
#[derive(Debug, Parser)]
pub(crate) struct Validate {
    #[clap(flatten)]
    config: ConfigArgs,
}

impl Validate {
    pub(crate) async fn run(self) -> Result<()> {
        let config = self.config.load().await?;
        let previous = self.config.load_previous().await?;
        let resolved = resolver::resolve(&self.config.name, &config, previous.as_ref())
            .context(format!("'{}' is not a valid cluster", self.config.name))?;
        println!(
            "'{}' is valid: cluster '{}' in mode {} with authentication mode {}",
            resolved.name, resolved.cluster_name, resolved.mode, resolved.auth_mode
        );
        if resolved.replace_cluster {
            println!("The cluster would be replaced");
        }
        Ok(())
    }
}
