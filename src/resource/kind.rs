//! Resource kinds and the dependency graph between them

use std::fmt;

use kube::core::ApiResource;

use crate::crd;

/// Every kind of custom resource this operator reconciles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum)]
pub enum ResourceKind {
    Organization,
    Solution,
    Workspace,
    Runner,
    Run,
    AdxDatabase,
    EventHub,
    Report,
}

use ResourceKind::*;

impl ResourceKind {
    /// All kinds, parents before children
    pub const ALL: [ResourceKind; 8] = [
        Organization,
        Solution,
        Workspace,
        Runner,
        Run,
        AdxDatabase,
        EventHub,
        Report,
    ];

    /// Kind name as it appears in `kind:` and owner references
    pub fn as_str(&self) -> &'static str {
        match self {
            Organization => "Organization",
            Solution => "Solution",
            Workspace => "Workspace",
            Runner => "Runner",
            Run => "Run",
            AdxDatabase => "AdxDatabase",
            EventHub => "EventHub",
            Report => "Report",
        }
    }

    /// Group, version and plural used to reach the kind through the API server
    pub fn api_resource(&self) -> ApiResource {
        match self {
            Organization => ApiResource::erase::<crd::Organization>(&()),
            Solution => ApiResource::erase::<crd::Solution>(&()),
            Workspace => ApiResource::erase::<crd::Workspace>(&()),
            Runner => ApiResource::erase::<crd::Runner>(&()),
            Run => ApiResource::erase::<crd::Run>(&()),
            AdxDatabase => ApiResource::erase::<crd::AdxDatabase>(&()),
            EventHub => ApiResource::erase::<crd::EventHub>(&()),
            Report => ApiResource::erase::<crd::Report>(&()),
        }
    }

    /// Key under `spec.selector` naming a parent of this kind
    pub fn selector_key(&self) -> Option<&'static str> {
        match self {
            Organization => Some("organization"),
            Workspace => Some("workspace"),
            Solution => Some("solution"),
            Runner => Some("runner"),
            Run | AdxDatabase | EventHub | Report => None,
        }
    }

    /// Spec field holding the resolved id of a parent of this kind
    pub fn id_field(&self) -> Option<&'static str> {
        match self {
            Organization => Some("organizationId"),
            Workspace => Some("workspaceId"),
            Solution => Some("solutionId"),
            Runner => Some("runnerId"),
            Run | AdxDatabase | EventHub | Report => None,
        }
    }

    /// Parents that must be named in the selector
    pub fn required_parents(&self) -> &'static [ResourceKind] {
        match self {
            Organization | Report => &[],
            Solution | Workspace => &[Organization],
            Runner => &[Organization, Workspace],
            Run => &[Organization, Workspace, Runner],
            AdxDatabase | EventHub => &[Organization, Workspace],
        }
    }

    /// Parents that may be named in the selector
    pub fn allowed_parents(&self) -> &'static [ResourceKind] {
        match self {
            Organization | Report => &[],
            Solution => &[Organization],
            Workspace => &[Organization, Solution],
            Runner => &[Organization, Workspace, Solution],
            Run => &[Organization, Workspace, Runner],
            AdxDatabase | EventHub => &[Organization, Workspace],
        }
    }

    /// Parents whose deletion garbage-collects resources of this kind
    pub fn owner_parents(&self) -> &'static [ResourceKind] {
        match self {
            Organization | Report => &[],
            Solution | Workspace => &[Organization],
            Runner => &[Organization, Workspace],
            Run => &[Runner],
            AdxDatabase | EventHub => &[Workspace],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_and_owner_parents_are_allowed() {
        for kind in ResourceKind::ALL {
            for parent in kind.required_parents().iter().chain(kind.owner_parents()) {
                assert!(
                    kind.allowed_parents().contains(parent),
                    "{kind} lists {parent} without allowing it"
                );
                assert!(parent.selector_key().is_some());
            }
        }
    }

    #[test]
    fn parents_come_before_children() {
        let position = |k: ResourceKind| ResourceKind::ALL.iter().position(|x| *x == k).unwrap();
        for kind in ResourceKind::ALL {
            for parent in kind.allowed_parents() {
                assert!(position(*parent) < position(kind));
            }
        }
    }

    #[test]
    fn api_resource_matches_crd() {
        let ar = ResourceKind::AdxDatabase.api_resource();
        assert_eq!(ar.group, "azure.cosmotech.com");
        assert_eq!(ar.plural, "adxdatabases");
        assert_eq!(ar.kind, "AdxDatabase");
        assert_eq!(ResourceKind::Workspace.api_resource().api_version, "api.cosmotech.com/v1");
    }
}
