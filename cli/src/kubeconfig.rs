use crate::config::ConfigArgs;
use anyhow::{Context, Result};
use clap::Parser;
use eks_composer::kubeconfig::{self, KubeconfigSpec};
use eks_model::constants::DEFAULT_REGION;
use eks_model::KubeconfigOptions;

/// Render the kubeconfig of a cluster that already exists.
#[derive(Debug, Parser)]
pub(crate) struct RenderKubeconfig {
    #[clap(flatten)]
    config: ConfigArgs,

    /// The API server endpoint of the cluster.
    #[clap(long = "endpoint")]
    endpoint: String,

    /// The base64 encoded certificate authority data of the cluster.
    #[clap(long = "certificate-authority")]
    certificate_authority: String,

    /// The role `aws eks get-token` assumes. Overrides the configuration's credential options.
    #[clap(long = "role-arn")]
    role_arn: Option<String>,

    /// The AWS profile `aws eks get-token` runs with. Overrides the configuration's credential
    /// options.
    #[clap(long = "profile-name")]
    profile_name: Option<String>,

    /// Print JSON instead of YAML.
    #[clap(long = "json")]
    json: bool,
}

impl RenderKubeconfig {
    pub(crate) async fn run(self) -> Result<()> {
        let config = self.config.load().await?;
        let cluster_name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-eksCluster", self.config.name));
        let region = config.region.as_deref().unwrap_or(DEFAULT_REGION);

        let options = if self.role_arn.is_some() || self.profile_name.is_some() {
            Some(KubeconfigOptions {
                role_arn: self.role_arn.clone(),
                profile_name: self.profile_name.clone(),
            })
        } else {
            config.provider_credential_opts.clone()
        };
        let rendered = KubeconfigSpec::new(cluster_name, region)
            .with_options(options.as_ref())
            .render(&self.endpoint, &self.certificate_authority)
            .context("Unable to render the kubeconfig")?;
        kubeconfig::load(&rendered).context("The rendered kubeconfig is not usable")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rendered)
                    .context("Could not create string from kubeconfig.")?
            );
        } else {
            print!(
                "{}",
                serde_yaml::to_string(&rendered)
                    .context("Could not create string from kubeconfig.")?
            );
        }
        Ok(())
    }
}
