//! Custom Resource Definitions for the Cosmo Tech operator

mod azure;
mod common;
mod platform;
mod power_bi;

pub use azure::*;
pub use common::*;
pub use platform::*;
pub use power_bi::*;

use kube::CustomResourceExt;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    Ok(vec![
        serde_yaml::to_string(&Organization::crd())?,
        serde_yaml::to_string(&Solution::crd())?,
        serde_yaml::to_string(&Workspace::crd())?,
        serde_yaml::to_string(&Runner::crd())?,
        serde_yaml::to_string(&Run::crd())?,
        serde_yaml::to_string(&AdxDatabase::crd())?,
        serde_yaml::to_string(&EventHub::crd())?,
        serde_yaml::to_string(&Report::crd())?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_status_subresource() {
        let crds = [
            Organization::crd(),
            Solution::crd(),
            Workspace::crd(),
            Runner::crd(),
            Run::crd(),
            AdxDatabase::crd(),
            EventHub::crd(),
            Report::crd(),
        ];

        for crd in crds {
            let version = &crd.spec.versions[0];
            assert!(
                version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some(),
                "{} has no status subresource",
                crd.spec.names.kind
            );
        }
    }

    #[test]
    fn generates_one_manifest_per_kind() {
        let manifests = generate_crds().unwrap();
        assert_eq!(manifests.len(), 8);
        assert!(manifests[0].contains("organizations.api.cosmotech.com"));
        assert!(manifests[7].contains("reports.powerbi.cosmotech.com"));
    }

    #[test]
    fn free_form_fields_preserve_unknown_fields() {
        let manifest = serde_yaml::to_string(&Workspace::crd()).unwrap();
        assert!(manifest.contains("x-kubernetes-preserve-unknown-fields: true"));
    }
}
