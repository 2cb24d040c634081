//! # Sync Pass
//!
//! One ordered pass over the managed objects of a `Vault`. Every step reads
//! or creates its object and stops the pass on the first error; nothing
//! already created is rolled back.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::controller::reconciler::resources::{
    configurer, deployment, etcd, namespace_of, owner_reference, service, tls, vault_labels,
};
use crate::controller::reconciler::store::{CreateOutcome, ManagedObject, ObjectKind, StoreError};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::reconciler::validation::validate_vault;
use crate::crd::{Vault, VaultStatus};
use crate::observability;
use crate::pki;

/// Bring the cluster in line with `vault`.
pub async fn sync_vault(vault: &Vault, ctx: &Reconciler) -> Result<(), ReconcilerError> {
    validate_vault(vault)?;
    let owner = owner_reference(vault)?;
    let namespace = namespace_of(vault);

    if vault.spec.uses_etcd() {
        sync_etcd(vault, ctx, &namespace, &owner).await?;
    }

    ensure_tls_secret(
        ctx,
        &namespace,
        &tls::vault_secret_name(vault),
        &tls::vault_sans(vault),
        |bundle| tls::vault_tls_secret(vault, &owner, bundle),
    )
    .await?;

    let server = deployment::server_deployment(vault, &owner, &ctx.config)?;
    ensure(ctx, ManagedObject::Deployment(server)).await?;
    sync_replicas(vault, ctx, &namespace).await?;
    sync_status(vault, ctx, &namespace).await?;

    sync_service(vault, ctx, &namespace, &owner).await?;

    ensure(
        ctx,
        ManagedObject::Deployment(configurer::configurer_deployment(vault, &owner, &ctx.config)),
    )
    .await?;
    sync_configurer_config(vault, ctx, &owner).await
}

async fn sync_etcd(
    vault: &Vault,
    ctx: &Reconciler,
    namespace: &str,
    owner: &OwnerReference,
) -> Result<(), ReconcilerError> {
    let etcd_name = etcd::etcd_cluster_name(vault)?;
    ensure_tls_secret(
        ctx,
        namespace,
        &tls::etcd_secret_name(&etcd_name),
        &tls::etcd_sans(&etcd_name, namespace),
        |bundle| tls::etcd_tls_secret(&etcd_name, namespace, owner, bundle),
    )
    .await?;
    ensure(
        ctx,
        ManagedObject::EtcdCluster(etcd::etcd_cluster(&etcd_name, namespace, owner)),
    )
    .await?;
    Ok(())
}

/// Create `object`, treating an existing one as success.
async fn ensure(ctx: &Reconciler, object: ManagedObject) -> Result<CreateOutcome, ReconcilerError> {
    let outcome = ctx.store.create(&object).await?;
    match outcome {
        CreateOutcome::Created => {
            info!(
                kind = %object.kind(),
                name = object.name(),
                namespace = object.namespace(),
                "Created object"
            );
            observability::metrics::increment_objects_created(object.kind().as_str());
        }
        CreateOutcome::AlreadyExists => {
            debug!(kind = %object.kind(), name = object.name(), "Object already exists");
        }
    }
    Ok(outcome)
}

async fn update(ctx: &Reconciler, object: ManagedObject) -> Result<(), ReconcilerError> {
    ctx.store.update(&object).await?;
    info!(kind = %object.kind(), name = object.name(), "Updated object");
    observability::metrics::increment_objects_updated(object.kind().as_str());
    Ok(())
}

/// Generate and store a TLS secret unless one with that name already exists.
async fn ensure_tls_secret<F>(
    ctx: &Reconciler,
    namespace: &str,
    name: &str,
    sans: &BTreeSet<String>,
    build: F,
) -> Result<(), ReconcilerError>
where
    F: FnOnce(&pki::CertificateBundle) -> Secret,
{
    match ctx.store.get(ObjectKind::Secret, namespace, name).await {
        Ok(_) => {
            debug!("TLS secret {}/{} present, keeping it", namespace, name);
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            let bundle = pki::generate(sans, ctx.certificate_validity)?;
            observability::metrics::increment_certificates_generated();
            ensure(ctx, ManagedObject::Secret(build(&bundle))).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn sync_replicas(vault: &Vault, ctx: &Reconciler, namespace: &str) -> Result<(), ReconcilerError> {
    let name = deployment::server_deployment_name(vault);
    let mut current = match ctx.store.get(ObjectKind::Deployment, namespace, &name).await? {
        ManagedObject::Deployment(d) => d,
        other => {
            return Err(StoreError::UnexpectedKind {
                expected: ObjectKind::Deployment,
                actual: other.kind(),
            }
            .into())
        }
    };
    if deployment::replicas(&current) == Some(vault.spec.size) {
        return Ok(());
    }
    info!(
        "Scaling {}/{} from {:?} to {} replicas",
        namespace,
        name,
        deployment::replicas(&current),
        vault.spec.size
    );
    set_replicas(&mut current, vault.spec.size);
    update(ctx, ManagedObject::Deployment(current)).await
}

fn set_replicas(deployment: &mut Deployment, size: i32) {
    deployment.spec.get_or_insert_with(Default::default).replicas = Some(size);
}

async fn sync_status(vault: &Vault, ctx: &Reconciler, namespace: &str) -> Result<(), ReconcilerError> {
    let mut nodes = ctx
        .store
        .list_pod_names(namespace, &vault_labels(vault))
        .await?;
    nodes.sort();
    let current = vault
        .status
        .as_ref()
        .map(|status| status.nodes.clone())
        .unwrap_or_default();
    if current == nodes {
        return Ok(());
    }
    debug!("Vault {} nodes changed: {:?} -> {:?}", vault.name_any(), current, nodes);
    ctx.store
        .update_status(vault, &VaultStatus { nodes })
        .await?;
    Ok(())
}

/// Create the Service, or carry a changed type and ports onto the live one.
/// Fields the API server assigns, such as `clusterIP`, are kept.
async fn sync_service(
    vault: &Vault,
    ctx: &Reconciler,
    namespace: &str,
    owner: &OwnerReference,
) -> Result<(), ReconcilerError> {
    let desired = service::vault_service(vault, owner);
    let name = desired.name_any();
    if ensure(ctx, ManagedObject::Service(desired.clone())).await? == CreateOutcome::Created {
        return Ok(());
    }

    let mut current: Service = match ctx.store.get(ObjectKind::Service, namespace, &name).await? {
        ManagedObject::Service(svc) => svc,
        other => {
            return Err(StoreError::UnexpectedKind {
                expected: ObjectKind::Service,
                actual: other.kind(),
            }
            .into())
        }
    };
    let desired_spec = desired.spec.unwrap_or_default();
    let current_spec = current.spec.get_or_insert_with(Default::default);
    if current_spec.type_ == desired_spec.type_ && current_spec.ports == desired_spec.ports {
        return Ok(());
    }
    info!(
        "Service {}/{} type {:?} -> {:?}",
        namespace, name, current_spec.type_, desired_spec.type_
    );
    current_spec.type_ = desired_spec.type_;
    current_spec.ports = desired_spec.ports;
    update(ctx, ManagedObject::Service(current)).await
}

async fn sync_configurer_config(
    vault: &Vault,
    ctx: &Reconciler,
    owner: &OwnerReference,
) -> Result<(), ReconcilerError> {
    let desired = configurer::configurer_config_map(vault, owner)?;
    let payload = configurer::config_map_payload(&desired)
        .unwrap_or_default()
        .to_string();
    let namespace = namespace_of(vault);
    let name = configurer::configurer_name(vault);

    if ensure(ctx, ManagedObject::ConfigMap(desired)).await? == CreateOutcome::Created {
        return Ok(());
    }

    let mut current: ConfigMap = match ctx.store.get(ObjectKind::ConfigMap, &namespace, &name).await? {
        ManagedObject::ConfigMap(cm) => cm,
        other => {
            return Err(StoreError::UnexpectedKind {
                expected: ObjectKind::ConfigMap,
                actual: other.kind(),
            }
            .into())
        }
    };
    if configurer::config_map_payload(&current) == Some(payload.as_str()) {
        return Ok(());
    }
    current
        .data
        .get_or_insert_with(Default::default)
        .insert(crate::constants::DEFAULT_CONFIG_FILE.to_string(), payload);
    update(ctx, ManagedObject::ConfigMap(current)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::controller::reconciler::resources::test_support::vault;
    use crate::controller::reconciler::store::MockObjectStore;
    use crate::crd::VaultSpec;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_validation_failure_touches_nothing() {
        // A mock without expectations panics on any call
        let store = MockObjectStore::new();
        let ctx = Reconciler::new(Arc::new(store), ControllerConfig::default()).unwrap();
        let vault = vault(VaultSpec {
            size: 3,
            ..VaultSpec::default()
        });

        let err = sync_vault(&vault, &ctx).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_existing_tls_secret_is_not_regenerated() {
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .withf(|kind, _, name| *kind == ObjectKind::Secret && name == "vault-tls")
            .times(1)
            .returning(|_, _, _| Ok(ManagedObject::Secret(Secret::default())));
        store.expect_create().never();
        let ctx = Reconciler::new(Arc::new(store), ControllerConfig::default()).unwrap();

        ensure_tls_secret(&ctx, "default", "vault-tls", &BTreeSet::new(), |_| {
            panic!("secret must not be rebuilt")
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_replicas_left_alone_when_matching() {
        let mut store = MockObjectStore::new();
        store.expect_get().times(1).returning(|_, _, _| {
            let mut d = Deployment::default();
            set_replicas(&mut d, 1);
            Ok(ManagedObject::Deployment(d))
        });
        store.expect_update().never();
        let ctx = Reconciler::new(Arc::new(store), ControllerConfig::default()).unwrap();

        sync_replicas(&vault(VaultSpec::default()), &ctx, "default")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_replica_lookup_rejects_wrong_kind() {
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .returning(|_, _, _| Ok(ManagedObject::ConfigMap(ConfigMap::default())));
        let ctx = Reconciler::new(Arc::new(store), ControllerConfig::default()).unwrap();

        let err = sync_replicas(&vault(VaultSpec::default()), &ctx, "default")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcilerError::Store(StoreError::UnexpectedKind { .. })
        ));
    }
}
