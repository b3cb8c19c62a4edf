//! Hierarchical resource addresses.
//!
//! Every node of the resource tree (the root, each collection, each
//! resource) is a [`Location`]. A location knows its local key and its
//! parent, which is all that is needed to build an address:
//!
//! ```text
//! /apps/web/components/api/releases/20240101/instances/0
//! /nodes/i-0123
//! /entrypoints/public
//! ```
//!
//! [`resolve`] walks an address back down from the root, loading each
//! resource segment from the catalog, so a task queued by one process can
//! find its target again in another.

use crate::catalog::Catalog;
use crate::error::{CoreError, CoreResult};
use crate::types::{Resource, ResourceKind};

const APPS: &str = "apps";
const COMPONENTS: &str = "components";
const RELEASES: &str = "releases";
const INSTANCES: &str = "instances";
const VOLUMES: &str = "volumes";
const NODES: &str = "nodes";
const ENTRYPOINTS: &str = "entrypoints";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Root,
    Apps,
    App {
        app: String,
    },
    Components {
        app: String,
    },
    Component {
        app: String,
        component: String,
    },
    Releases {
        app: String,
        component: String,
    },
    Release {
        app: String,
        component: String,
        release: String,
    },
    Instances {
        app: String,
        component: String,
        release: String,
    },
    Instance {
        app: String,
        component: String,
        release: String,
        instance: String,
    },
    Volumes {
        app: String,
        component: String,
        release: String,
    },
    Volume {
        app: String,
        component: String,
        release: String,
        volume: String,
    },
    Nodes,
    Node {
        node: String,
    },
    Entrypoints,
    Entrypoint {
        entrypoint: String,
    },
}

impl Location {
    /// The segment identifying this location under its parent.
    pub fn key(&self) -> &str {
        match self {
            Location::Root => "",
            Location::Apps => APPS,
            Location::App { app } => app,
            Location::Components { .. } => COMPONENTS,
            Location::Component { component, .. } => component,
            Location::Releases { .. } => RELEASES,
            Location::Release { release, .. } => release,
            Location::Instances { .. } => INSTANCES,
            Location::Instance { instance, .. } => instance,
            Location::Volumes { .. } => VOLUMES,
            Location::Volume { volume, .. } => volume,
            Location::Nodes => NODES,
            Location::Node { node } => node,
            Location::Entrypoints => ENTRYPOINTS,
            Location::Entrypoint { entrypoint } => entrypoint,
        }
    }

    /// The enclosing location; `None` for the root.
    pub fn parent(&self) -> Option<Location> {
        let parent = match self.clone() {
            Location::Root => return None,
            Location::Apps | Location::Nodes | Location::Entrypoints => Location::Root,
            Location::App { .. } => Location::Apps,
            Location::Components { app } => Location::App { app },
            Location::Component { app, .. } => Location::Components { app },
            Location::Releases { app, component } => Location::Component { app, component },
            Location::Release { app, component, .. } => Location::Releases { app, component },
            Location::Instances {
                app,
                component,
                release,
            }
            | Location::Volumes {
                app,
                component,
                release,
            } => Location::Release {
                app,
                component,
                release,
            },
            Location::Instance {
                app,
                component,
                release,
                ..
            } => Location::Instances {
                app,
                component,
                release,
            },
            Location::Volume {
                app,
                component,
                release,
                ..
            } => Location::Volumes {
                app,
                component,
                release,
            },
            Location::Node { .. } => Location::Nodes,
            Location::Entrypoint { .. } => Location::Entrypoints,
        };
        Some(parent)
    }

    /// The child location named by `key`.
    ///
    /// Only checks that `key` is valid at this position; whether a resource
    /// actually exists there is the catalog's business.
    pub fn child(&self, key: &str) -> CoreResult<Location> {
        if key.is_empty() {
            return Err(self.invalid_child(key, "empty segment"));
        }
        let child = match self.clone() {
            Location::Root => match key {
                APPS => Location::Apps,
                NODES => Location::Nodes,
                ENTRYPOINTS => Location::Entrypoints,
                _ => return Err(self.invalid_child(key, "unknown collection")),
            },
            Location::Apps => Location::App {
                app: key.to_string(),
            },
            Location::App { app } => match key {
                COMPONENTS => Location::Components { app },
                _ => return Err(self.invalid_child(key, "unknown collection")),
            },
            Location::Components { app } => Location::Component {
                app,
                component: key.to_string(),
            },
            Location::Component { app, component } => match key {
                RELEASES => Location::Releases { app, component },
                _ => return Err(self.invalid_child(key, "unknown collection")),
            },
            Location::Releases { app, component } => Location::Release {
                app,
                component,
                release: key.to_string(),
            },
            Location::Release {
                app,
                component,
                release,
            } => match key {
                INSTANCES => Location::Instances {
                    app,
                    component,
                    release,
                },
                VOLUMES => Location::Volumes {
                    app,
                    component,
                    release,
                },
                _ => return Err(self.invalid_child(key, "unknown collection")),
            },
            Location::Instances {
                app,
                component,
                release,
            } => Location::Instance {
                app,
                component,
                release,
                instance: key.to_string(),
            },
            Location::Volumes {
                app,
                component,
                release,
            } => Location::Volume {
                app,
                component,
                release,
                volume: key.to_string(),
            },
            Location::Nodes => Location::Node {
                node: key.to_string(),
            },
            Location::Entrypoints => Location::Entrypoint {
                entrypoint: key.to_string(),
            },
            Location::Instance { .. }
            | Location::Volume { .. }
            | Location::Node { .. }
            | Location::Entrypoint { .. } => {
                return Err(self.invalid_child(key, "resource has no children"));
            }
        };
        Ok(child)
    }

    /// The resource kind stored at this location, or `None` for the root
    /// and collections.
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            Location::App { .. } => Some(ResourceKind::App),
            Location::Component { .. } => Some(ResourceKind::Component),
            Location::Release { .. } => Some(ResourceKind::Release),
            Location::Instance { .. } => Some(ResourceKind::Instance),
            Location::Volume { .. } => Some(ResourceKind::Volume),
            Location::Node { .. } => Some(ResourceKind::Node),
            Location::Entrypoint { .. } => Some(ResourceKind::Entrypoint),
            _ => None,
        }
    }

    /// The kind of record held by this collection, or `None` if this is not
    /// a collection.
    pub fn member_kind(&self) -> Option<ResourceKind> {
        match self {
            Location::Apps => Some(ResourceKind::App),
            Location::Components { .. } => Some(ResourceKind::Component),
            Location::Releases { .. } => Some(ResourceKind::Release),
            Location::Instances { .. } => Some(ResourceKind::Instance),
            Location::Volumes { .. } => Some(ResourceKind::Volume),
            Location::Nodes => Some(ResourceKind::Node),
            Location::Entrypoints => Some(ResourceKind::Entrypoint),
            _ => None,
        }
    }

    pub fn is_resource(&self) -> bool {
        self.kind().is_some()
    }

    /// Coordination store key of the record at this location.
    ///
    /// Records are stored by collection name followed by their ids
    /// (`/releases/<app>/<component>/<timestamp>`), which differs from the
    /// address form.
    pub fn storage_key(&self) -> Option<String> {
        let key = match self {
            Location::App { app } => format!("/{APPS}/{app}"),
            Location::Component { app, component } => format!("/{COMPONENTS}/{app}/{component}"),
            Location::Release {
                app,
                component,
                release,
            } => format!("/{RELEASES}/{app}/{component}/{release}"),
            Location::Instance {
                app,
                component,
                release,
                instance,
            } => format!("/{INSTANCES}/{app}/{component}/{release}/{instance}"),
            Location::Volume {
                app,
                component,
                release,
                volume,
            } => format!("/{VOLUMES}/{app}/{component}/{release}/{volume}"),
            Location::Node { node } => format!("/{NODES}/{node}"),
            Location::Entrypoint { entrypoint } => format!("/{ENTRYPOINTS}/{entrypoint}"),
            _ => return None,
        };
        Some(key)
    }

    /// Coordination store directory holding the members of this collection.
    pub fn storage_dir(&self) -> Option<String> {
        let dir = match self {
            Location::Apps => format!("/{APPS}"),
            Location::Components { app } => format!("/{COMPONENTS}/{app}"),
            Location::Releases { app, component } => format!("/{RELEASES}/{app}/{component}"),
            Location::Instances {
                app,
                component,
                release,
            } => format!("/{INSTANCES}/{app}/{component}/{release}"),
            Location::Volumes {
                app,
                component,
                release,
            } => format!("/{VOLUMES}/{app}/{component}/{release}"),
            Location::Nodes => format!("/{NODES}"),
            Location::Entrypoints => format!("/{ENTRYPOINTS}"),
            _ => return None,
        };
        Some(dir)
    }

    fn invalid_child(&self, key: &str, reason: &str) -> CoreError {
        CoreError::InvalidAddress {
            address: format!("{}/{key}", address_of(self)),
            reason: reason.to_string(),
        }
    }
}

/// Build the address of `location` by joining keys from the root down.
pub fn address_of(location: &Location) -> String {
    let mut keys = Vec::new();
    let mut current = Some(location.clone());
    while let Some(node) = current {
        if node != Location::Root {
            keys.push(node.key().to_string());
        }
        current = node.parent();
    }
    keys.reverse();
    keys.iter().map(|k| format!("/{k}")).collect()
}

/// Walk `address` from the root, loading every resource segment on the way.
///
/// Fails with [`CoreError::ResourceNotFound`] as soon as a resource along
/// the path is missing, and with [`CoreError::InvalidAddress`] when the
/// address is malformed or names a collection rather than a resource.
pub fn resolve(catalog: &Catalog, address: &str) -> CoreResult<Resource> {
    let Some(path) = address.strip_prefix('/') else {
        return Err(CoreError::InvalidAddress {
            address: address.to_string(),
            reason: "address must start with '/'".to_string(),
        });
    };

    let mut location = Location::Root;
    let mut resource = None;
    for segment in path.split('/') {
        location = location.child(segment)?;
        if location.is_resource() {
            resource = Some(catalog.load(&location)?);
        }
    }

    match resource {
        Some(resource) if location.is_resource() => Ok(resource),
        _ => Err(CoreError::InvalidAddress {
            address: address.to_string(),
            reason: "address does not name a resource".to_string(),
        }),
    }
}
