use anyhow::{bail, Context as _};
use clap::Parser;
use kube::Client;
use log::info;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use irsa::cloud::aws::AwsConnector;
use irsa::config::{OperatorConfig, THUMBPRINT_TIMEOUT};
use irsa::controller::{self, Context, EnabledFlavors};
use irsa::metrics::NoopMetrics;
use irsa::orchestrator::Orchestrator;
use irsa::resolver::{KubeRoleLookup, Resolver};
use irsa::scope::Cache;
use irsa::state::KubeStateStore;
use irsa::thumbprint::TlsThumbprinter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  env_logger::init();
  let config = OperatorConfig::parse();

  // try load from env var which Terraform uses
  let client = match Client::try_default().await {
    Ok(c) => c,
    _ => {
      use kube::config::KubeConfigOptions;
      use std::convert::TryFrom;

      match &config.kube_context {
        Some(ctx) => Client::try_from(
          kube::Config::from_kubeconfig(&KubeConfigOptions {
            context: Some(ctx.clone()),
            ..KubeConfigOptions::default()
          })
          .await?,
        )
        .context("Failed to load KUBE_CTX context")?,

        _ => bail!("Failed to create client"),
      }
    }
  };

  let cache = Cache::new();
  let orchestrator = Orchestrator::new(
    Arc::new(AwsConnector::from_env().await),
    Arc::new(KubeStateStore::new(client.clone())),
    Arc::new(TlsThumbprinter::new(THUMBPRINT_TIMEOUT).context("Failed to set up TLS")?),
    Arc::new(NoopMetrics),
    cache.clone(),
    config.orchestrator_settings(),
  );
  let resolver = Resolver::new(
    Arc::new(KubeRoleLookup::new(client.clone())),
    config.installation.clone(),
    config.base_domain.clone(),
    cache,
  );

  // in-flight reconciles stop before their next AWS write
  let shutdown = CancellationToken::new();
  tokio::spawn({
    let shutdown = shutdown.clone();
    async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
        shutdown.cancel();
      }
    }
  });

  info!("Starting irsa-operator for installation {}", config.installation);
  controller::run(
    Arc::new(Context::new(client, resolver, orchestrator, config.requeue(), shutdown)),
    EnabledFlavors {
      legacy: config.enable_legacy,
      capa: config.enable_capa,
      eks: config.enable_eks,
    },
  )
  .await;

  Ok(())
}
