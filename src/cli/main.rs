//! # vault-unsealer
//!
//! Sidecar worker for the Vault operator.
//!
//! ```bash
//! # Unseal the local node, initializing it first if needed
//! vault-unsealer unseal --init --mode k8s --k8s-secret-namespace vault --k8s-secret-name vault-unseal-keys
//!
//! # Apply external config against the Vault service
//! vault-unsealer configure --config vault-config.yml --mode k8s
//! ```
//!
//! Exit status is 0 once Vault is unsealed (or the attempt budget ended on a
//! successful submission) and non-zero otherwise.

mod args;

use anyhow::{Context, Result};
use args::{Cli, Command, ConfigureArgs, UnsealArgs};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use vault_operator::keystore::{KeyStore, KeyStoreRegistry};
use vault_operator::observability;
use vault_operator::vault::configure::{Configurer, ExternalConfig};
use vault_operator::vault::unseal::{RunOutcome, Unsealer};
use vault_operator::vault::{VaultApi, VaultClient};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracer_provider = match init() {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("vault-unsealer: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    };

    observability::shutdown_otel(tracer_provider);
    code
}

fn init() -> Result<Option<observability::TracerProviderHandle>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;
    observability::init_tracing("vault-unsealer", "vault_operator=info,vault_unsealer=info")
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let key_store_config = cli.key_store.to_config()?;
    let keystore: Arc<dyn KeyStore> = KeyStoreRegistry::with_defaults()
        .build(&key_store_config, &cli.vault.backend_options())
        .await
        .with_context(|| format!("Failed to create {} key store", key_store_config.mode()))?;

    let vault: Arc<dyn VaultApi> = Arc::new(
        VaultClient::new(
            &cli.vault.vault_addr,
            cli.vault.vault_cacert.as_deref(),
            cli.vault.timeout.0,
        )
        .context("Failed to create Vault client")?,
    );
    info!(
        vault.addr = cli.vault.vault_addr.as_str(),
        key_store.mode = key_store_config.mode(),
        "vault-unsealer starting"
    );

    match cli.command {
        Command::Unseal(args) => unseal(vault, keystore, &args).await,
        Command::Configure(args) => configure(vault, keystore, &args).await,
    }
}

async fn unseal(
    vault: Arc<dyn VaultApi>,
    keystore: Arc<dyn KeyStore>,
    args: &UnsealArgs,
) -> Result<ExitCode> {
    let policy = args.to_policy();
    info!(?policy, "Unseal policy");

    let outcome = Unsealer::new(vault, keystore, policy).run().await?;
    match &outcome {
        RunOutcome::Unsealed { attempt } => info!("Vault is unsealed (attempt {})", attempt),
        RunOutcome::Completed { attempts } => {
            info!("Attempt budget of {} spent, last submission succeeded", attempts);
        }
        RunOutcome::Exhausted { attempts, last_error } => {
            error!("Vault still sealed after {} attempts: {}", attempts, last_error);
        }
    }
    Ok(exit_code(outcome.exit_code()))
}

async fn configure(
    vault: Arc<dyn VaultApi>,
    keystore: Arc<dyn KeyStore>,
    args: &ConfigureArgs,
) -> Result<ExitCode> {
    let config = ExternalConfig::from_file(&args.config)?;
    let summary = Configurer::new(vault, keystore).apply(&config).await?;
    info!(
        policies = summary.policies_written,
        auth.enabled = summary.auth_enabled,
        auth.existing = summary.auth_existing,
        mounts.created = summary.mounts_created,
        mounts.existing = summary.mounts_existing,
        "Vault configured from {}",
        args.config.display()
    );
    Ok(ExitCode::SUCCESS)
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}
