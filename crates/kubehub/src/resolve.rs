//! Identity Resolver: declared kind to queryable resource address.

use conflux_core::{IdentityError, ResourceIdentifier};
use thiserror::Error;

use crate::discovery::DiscoveryIndex;

/// Namespace assumed for namespaced kinds that do not declare one.
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("no resource type for kind {kind:?} in group {group:?}")]
    UnresolvableKind { group: String, kind: String },
}

/// Fill in the plural resource name and pick a served version.
///
/// The declared version wins when served; otherwise the highest-priority
/// served version is used. Namespaced kinds without a namespace land in
/// `default`; cluster-scoped kinds drop any namespace.
pub fn resolve_address(identifier: &ResourceIdentifier, index: &DiscoveryIndex) -> Result<ResourceIdentifier, ResolveError> {
    if identifier.kind.is_empty() || identifier.version.is_empty() {
        return Err(IdentityError::IncompleteIdentity(format!(
            "apiVersion={:?} kind={:?}",
            identifier.api_version(),
            identifier.kind
        ))
        .into());
    }
    if identifier.name.is_empty() {
        return Err(IdentityError::MissingName.into());
    }
    let (resource, discovered) = index.find_kind(&identifier.group, &identifier.kind).ok_or_else(|| {
        ResolveError::UnresolvableKind { group: identifier.group.clone(), kind: identifier.kind.clone() }
    })?;
    let version = if discovered.versions.iter().any(|v| v == &identifier.version) {
        identifier.version.clone()
    } else {
        discovered
            .versions
            .first()
            .cloned()
            .ok_or_else(|| ResolveError::UnresolvableKind { group: identifier.group.clone(), kind: identifier.kind.clone() })?
    };
    let namespace = if discovered.namespaced {
        Some(identifier.namespace.clone().unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()))
    } else {
        None
    };
    Ok(ResourceIdentifier {
        ordinal: identifier.ordinal,
        group: identifier.group.clone(),
        version,
        kind: discovered.kind.clone(),
        resource: Some(resource.to_string()),
        namespace,
        name: identifier.name.clone(),
    })
}
