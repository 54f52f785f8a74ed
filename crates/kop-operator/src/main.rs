//! kop operator binary

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};

use kop_common::config::OperatorConfig;
use kop_common::crd::{ProtectionGroup, Recipe};
use kop_common::telemetry::{init_telemetry, TelemetryConfig};
use kop_common::FIELD_MANAGER;
use kop_operator::run_controller;

/// kop - protects and recovers the Kubernetes objects of replicated workloads
#[derive(Parser, Debug)]
#[command(name = "kop", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Operator configuration file
    #[arg(long, env = "KOP_CONFIG", default_value = "/etc/kop/config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the ProtectionGroup controller (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        for crd in [ProtectionGroup::crd(), Recipe::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())?;

    match cli.command {
        Some(Commands::Controller) | None => controller(&cli.config).await,
    }
}

async fn controller(config_path: &std::path::Path) -> anyhow::Result<()> {
    let config = OperatorConfig::load(config_path)?;
    tracing::info!(
        config = %config_path.display(),
        profiles = config.s3_store_profiles.len(),
        disabled = config.kube_object_protection.disabled,
        "loaded operator configuration"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;
    run_controller(client, config).await;
    tracing::info!("controller stopped");
    Ok(())
}

/// Install kop's CRDs with server-side apply so they always match this binary
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in [ProtectionGroup::crd(), Recipe::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", name, e))?;
    }
    Ok(())
}
