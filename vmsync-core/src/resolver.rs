//! Placement resolution: symbolic datacenter/folder/resource-pool/
//! datastore names to live backend handles.
//!
//! Resolution is read-only and never cached - placement inventory can
//! change between invocations, so every reconcile call re-resolves.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{Backend, ObjectRef};
use crate::error::{Error, Result};
use crate::types::PlacementHints;

/// Names to fall back to when the declared record carries no hint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlacementDefaults {
    pub datacenter: Option<String>,
    pub folder: Option<String>,
    pub resource_pool: Option<String>,
    pub datastore: Option<String>,
}

/// Fully resolved placement handles for one reconcile invocation.
///
/// Construction is all-or-nothing: the only way to obtain one is a
/// successful [`ResourceResolver::resolve`], so all four handles are
/// populated and scoped to the same datacenter.
#[derive(Debug, Clone)]
pub struct ResourceContext {
    datacenter: ObjectRef,
    folder: ObjectRef,
    resource_pool: ObjectRef,
    datastore: ObjectRef,
}

impl ResourceContext {
    pub fn datacenter(&self) -> &ObjectRef {
        &self.datacenter
    }

    pub fn folder(&self) -> &ObjectRef {
        &self.folder
    }

    pub fn resource_pool(&self) -> &ObjectRef {
        &self.resource_pool
    }

    pub fn datastore(&self) -> &ObjectRef {
        &self.datastore
    }

    /// Datastore path VM files are created under.
    pub fn vm_file_path(&self) -> String {
        format!("[{}]", self.datastore.name)
    }
}

/// Resolves placement hints against the live backend inventory.
pub struct ResourceResolver {
    backend: Arc<dyn Backend>,
    defaults: PlacementDefaults,
}

impl ResourceResolver {
    pub fn new(backend: Arc<dyn Backend>, defaults: PlacementDefaults) -> Self {
        Self { backend, defaults }
    }

    /// Resolve all four placement objects, datacenter first so every
    /// further lookup is scoped to it. Fails fast on the first
    /// NotFound/Ambiguous; retry is the caller's responsibility.
    pub async fn resolve(&self, hints: &PlacementHints) -> Result<ResourceContext> {
        let datacenter = select_one(
            "datacenter",
            requested(&hints.datacenter, &self.defaults.datacenter),
            self.backend.list_datacenters().await?,
        )?;
        debug!(datacenter = %datacenter.name, "resolved datacenter");

        let folder = select_one(
            "folder",
            requested(&hints.folder, &self.defaults.folder),
            self.backend.list_folders(&datacenter).await?,
        )?;
        let resource_pool = select_one(
            "resource pool",
            requested(&hints.resource_pool, &self.defaults.resource_pool),
            self.backend.list_resource_pools(&datacenter).await?,
        )?;
        let datastore = select_one(
            "datastore",
            requested(&hints.datastore, &self.defaults.datastore),
            self.backend.list_datastores(&datacenter).await?,
        )?;
        debug!(
            folder = %folder.name,
            resource_pool = %resource_pool.name,
            datastore = %datastore.name,
            "resolved placement"
        );

        Ok(ResourceContext {
            datacenter,
            folder,
            resource_pool,
            datastore,
        })
    }
}

fn requested<'a>(hint: &'a Option<String>, default: &'a Option<String>) -> Option<&'a str> {
    hint.as_deref().or(default.as_deref())
}

/// Pick exactly one object: by name when one was requested, otherwise
/// the single existing one. Zero matches is NotFound, several matches
/// with no name to disambiguate is Ambiguous.
fn select_one(
    kind: &'static str,
    requested: Option<&str>,
    mut candidates: Vec<ObjectRef>,
) -> Result<ObjectRef> {
    if let Some(name) = requested {
        candidates.retain(|o| o.name == name);
        match candidates.len() {
            0 => Err(Error::not_found(kind, name)),
            1 => Ok(candidates.remove(0)),
            count => Err(Error::Ambiguous {
                kind,
                name: name.to_string(),
                count,
            }),
        }
    } else {
        match candidates.len() {
            0 => Err(Error::not_found(kind, "*")),
            1 => Ok(candidates.remove(0)),
            count => Err(Error::Ambiguous {
                kind,
                name: "*".to_string(),
                count,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(id: &str, name: &str) -> ObjectRef {
        ObjectRef {
            id: id.into(),
            name: name.into(),
        }
    }

    #[test]
    fn named_lookup_picks_the_match() {
        let picked = select_one("folder", Some("b"), vec![obj("1", "a"), obj("2", "b")]).unwrap();
        assert_eq!(picked.id, "2");
    }

    #[test]
    fn named_lookup_with_no_match_is_not_found() {
        let err = select_one("folder", Some("c"), vec![obj("1", "a")]).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "folder", .. }));
    }

    #[test]
    fn duplicate_names_are_ambiguous() {
        let err =
            select_one("datastore", Some("ds"), vec![obj("1", "ds"), obj("2", "ds")]).unwrap_err();
        assert!(matches!(err, Error::Ambiguous { count: 2, .. }));
    }

    #[test]
    fn unnamed_lookup_needs_exactly_one_candidate() {
        let picked = select_one("datacenter", None, vec![obj("1", "dc0")]).unwrap();
        assert_eq!(picked.id, "1");

        let err = select_one("datacenter", None, vec![]).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let err = select_one("datacenter", None, vec![obj("1", "a"), obj("2", "b")]).unwrap_err();
        assert!(matches!(err, Error::Ambiguous { count: 2, .. }));
    }

    #[test]
    fn hint_takes_precedence_over_default() {
        let hint = Some("from-hint".to_string());
        let default = Some("from-default".to_string());
        assert_eq!(requested(&hint, &default), Some("from-hint"));
        assert_eq!(requested(&None, &default), Some("from-default"));
        assert_eq!(requested(&None, &None), None);
    }

    #[test]
    fn file_path_brackets_the_datastore_name() {
        let ctx = ResourceContext {
            datacenter: obj("dc", "dc0"),
            folder: obj("f", "vms"),
            resource_pool: obj("rp", "pool"),
            datastore: obj("ds", "ds0"),
        };
        assert_eq!(ctx.vm_file_path(), "[ds0]");
    }
}
