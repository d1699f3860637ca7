//! Resolution of selector names into parent external ids

use tracing::debug;

use crate::error::{Error, Result, UnresolvedReason};
use crate::resource::{ManagedResource, ResolvedParent, ResourceKind, ResourceStore};

/// Resolves parents named in `spec.selector` through their sibling resources
pub struct DependencyResolver<'a> {
    store: &'a dyn ResourceStore,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(store: &'a dyn ResourceStore) -> Self {
        Self { store }
    }

    /// Resolve one parent by cluster name
    pub async fn resolve(&self, kind: ResourceKind, name: &str) -> Result<ResolvedParent> {
        let Some(parent) = self.store.get(kind, name).await? else {
            return Err(Error::unresolved(kind, name, UnresolvedReason::Missing));
        };
        let Some(external_id) = parent.external_id() else {
            return Err(Error::unresolved(kind, name, UnresolvedReason::Unreconciled));
        };

        Ok(ResolvedParent {
            kind,
            name: parent.name.clone(),
            uid: parent.uid.clone(),
            external_id: external_id.to_string(),
            key: parent.spec.field_str("key").map(str::to_string),
        })
    }

    /// Resolve every parent named by a resource, parents first
    ///
    /// A required parent absent from the selector, or a parent the kind does
    /// not accept, is a permanent failure. The first unresolved parent stops
    /// the resolution.
    pub async fn resolve_all(&self, resource: &ManagedResource) -> Result<Vec<ResolvedParent>> {
        let kind = resource.kind;
        let selector = resource.spec.selector.clone().unwrap_or_default();

        for required in kind.required_parents() {
            if selector.get(*required).is_none() {
                return Err(Error::permanent(format!(
                    "{kind} '{}' must name its {required} in spec.selector.{}",
                    resource.name,
                    required.selector_key().unwrap_or_default()
                )));
            }
        }

        let named = selector.named_parents();
        if let Some((parent, _)) = named.iter().find(|(p, _)| !kind.allowed_parents().contains(p)) {
            return Err(Error::permanent(format!(
                "{kind} '{}' cannot have a {parent} parent",
                resource.name
            )));
        }

        let mut resolved = Vec::with_capacity(named.len());
        for (parent_kind, name) in named {
            let parent = self.resolve(parent_kind, name).await?;
            debug!(
                kind = %parent_kind,
                name = %name,
                external_id = %parent.external_id,
                "Resolved parent"
            );
            resolved.push(parent);
        }
        Ok(resolved)
    }
}
