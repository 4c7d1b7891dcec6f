use crate::config::ConfigArgs;
use anyhow::{Context, Result};
use clap::Parser;
use eks_composer::{aws_config, AwsLookup, Cluster};
use log::info;

/// Compose a cluster and print what would be created.
#[derive(Debug, Parser)]
pub(crate) struct Plan {
    #[clap(flatten)]
    config: ConfigArgs,

    /// The AWS region lookups are made in. Defaults to the configuration's region.
    #[clap(long = "region")]
    region: Option<String>,

    /// The named AWS profile used for lookups.
    #[clap(long = "profile")]
    profile: Option<String>,

    /// A role to assume for lookups.
    #[clap(long = "assume-role")]
    assume_role: Option<String>,

    /// Print the cluster's outputs instead of its resources.
    #[clap(long = "outputs")]
    outputs: bool,

    /// Print resource names in the order they would be created.
    #[clap(long = "order", conflicts_with = "outputs")]
    order: bool,
}

impl Plan {
    pub(crate) async fn run(self) -> Result<()> {
        let config = self.config.load().await?;
        let previous = self.config.load_previous().await?;
        let region = self.region.as_deref().or(config.region.as_deref());
        let sdk_config =
            aws_config(region, self.profile.as_deref(), self.assume_role.as_deref()).await;
        let lookup = AwsLookup::new(&sdk_config);

        let cluster = Cluster::compose(&self.config.name, &config, previous.as_ref(), &lookup)
            .await
            .context(format!("Unable to compose cluster '{}'", self.config.name))?;
        info!(
            "'{}' is made of {} resources",
            self.config.name,
            cluster.graph.len()
        );

        if self.outputs {
            println!("{}", cluster.outputs());
        } else if self.order {
            let order = cluster
                .graph
                .creation_order()
                .context("Unable to order the cluster's resources")?;
            for name in order {
                println!("{}", name);
            }
        } else {
            println!("{}", cluster.graph);
        }
        Ok(())
    }
}
