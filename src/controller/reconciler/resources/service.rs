use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use super::{namespace_of, object_meta, vault_labels};
use crate::constants::VAULT_PORT;
use crate::crd::Vault;

/// Service `<name>` in front of the Vault server pods.
pub fn vault_service(vault: &Vault, owner: &OwnerReference) -> Service {
    let labels = vault_labels(vault);
    Service {
        metadata: object_meta(vault.name_any(), &namespace_of(vault), Some(labels.clone()), owner),
        spec: Some(ServiceSpec {
            type_: Some(vault.spec.service_type.clone()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("vault".to_string()),
                port: VAULT_PORT,
                target_port: Some(IntOrString::Int(VAULT_PORT)),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::reconciler::resources::owner_reference;
    use crate::controller::reconciler::resources::test_support::vault;
    use crate::crd::VaultSpec;

    #[test]
    fn test_service_selects_vault_pods() {
        let vault = vault(VaultSpec {
            service_type: "LoadBalancer".to_string(),
            ..VaultSpec::default()
        });
        let service = vault_service(&vault, &owner_reference(&vault).unwrap());
        let spec = service.spec.unwrap();

        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(spec.selector.unwrap()["vault_cr"], "vault");
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 8200);
        assert_eq!(port.name.as_deref(), Some("vault"));
    }
}
