//! Owner references linking children to their parents

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use crate::resource::{ResolvedParent, ResourceKind};

/// Owner reference pointing at a resolved parent
///
/// `blockOwnerDeletion` keeps the parent around until the garbage collector
/// has removed the child.
pub fn link(parent: &ResolvedParent) -> OwnerReference {
    OwnerReference {
        api_version: parent.kind.api_resource().api_version,
        kind: parent.kind.as_str().to_string(),
        name: parent.name.clone(),
        uid: parent.uid.clone(),
        block_owner_deletion: Some(true),
        controller: None,
    }
}

/// Owner references for the parents of `kind` that own it
pub fn owners_of(kind: ResourceKind, parents: &[ResolvedParent]) -> Vec<OwnerReference> {
    parents
        .iter()
        .filter(|p| kind.owner_parents().contains(&p.kind))
        .map(link)
        .collect()
}

/// Combine existing and computed references, one entry per uid
///
/// Existing references keep their position; computed ones replace an
/// existing entry with the same uid or are appended.
pub fn merge(existing: &[OwnerReference], computed: Vec<OwnerReference>) -> Vec<OwnerReference> {
    let mut merged: Vec<OwnerReference> = Vec::with_capacity(existing.len() + computed.len());
    for reference in existing.iter().cloned().chain(computed) {
        match merged.iter_mut().find(|r| r.uid == reference.uid) {
            Some(slot) => *slot = reference,
            None => merged.push(reference),
        }
    }
    merged
}
