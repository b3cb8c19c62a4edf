//! Domain records persisted in the coordination store.
//!
//! Every record is JSON-encoded and stored under its collection key (see
//! [`crate::Location::storage_key`]). Timestamps are Unix seconds.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::location::Location;

/// Current time as Unix seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The fixed set of resource kinds an operation can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    App,
    Component,
    Release,
    Instance,
    Volume,
    Node,
    Entrypoint,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::App,
        ResourceKind::Component,
        ResourceKind::Release,
        ResourceKind::Instance,
        ResourceKind::Volume,
        ResourceKind::Node,
        ResourceKind::Entrypoint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::App => "app",
            ResourceKind::Component => "component",
            ResourceKind::Release => "release",
            ResourceKind::Instance => "instance",
            ResourceKind::Volume => "volume",
            ResourceKind::Node => "node",
            ResourceKind::Entrypoint => "entrypoint",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Application tree ───────────────────────────────────────────────

/// Top-level application; maps to one cluster namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    pub name: String,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Component {
    pub app: String,
    pub name: String,
    /// Timestamp of the release that should be running.
    pub current_release: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// An immutable snapshot of a component's desired shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    pub app: String,
    pub component: String,
    pub timestamp: String,
    pub instance_count: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub app: String,
    pub component: String,
    pub release: String,
    pub id: String,
    pub status: InstanceStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Stopped,
    Started,
}

/// Block volume attached to a release's instances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Volume {
    pub app: String,
    pub component: String,
    pub release: String,
    pub name: String,
    pub size_gb: u32,
    /// Cloud-side volume id, set once the volume has been created.
    pub volume_id: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

// ── Infrastructure ─────────────────────────────────────────────────

/// A cluster worker machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: String,
    /// Machine class (instance type).
    pub class: String,
    /// Cluster-visible hostname, known after provisioning.
    pub name: Option<String>,
    pub external_ip: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// A public load balancer in front of the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entrypoint {
    pub name: String,
    pub domain: String,
    /// Load balancer address, known after provisioning.
    pub address: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl App {
    pub fn new(name: impl Into<String>) -> Self {
        let now = epoch_secs();
        Self {
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Component {
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        let now = epoch_secs();
        Self {
            app: app.into(),
            name: name.into(),
            current_release: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Release {
    pub fn new(
        app: impl Into<String>,
        component: impl Into<String>,
        timestamp: impl Into<String>,
        instance_count: u32,
    ) -> Self {
        let now = epoch_secs();
        Self {
            app: app.into(),
            component: component.into(),
            timestamp: timestamp.into(),
            instance_count,
            created_at: now,
            updated_at: now,
        }
    }

    /// Name shared by the release's cluster service and its instances.
    pub fn service_name(&self) -> String {
        format!("{}-{}", self.component, self.timestamp)
    }
}

impl Instance {
    pub fn new(release: &Release, id: impl Into<String>) -> Self {
        let now = epoch_secs();
        Self {
            app: release.app.clone(),
            component: release.component.clone(),
            release: release.timestamp.clone(),
            id: id.into(),
            status: InstanceStatus::Stopped,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replication controller name for this instance.
    pub fn controller_name(&self) -> String {
        format!("{}-{}-{}", self.component, self.release, self.id)
    }
}

impl Volume {
    pub fn new(release: &Release, name: impl Into<String>, size_gb: u32) -> Self {
        let now = epoch_secs();
        Self {
            app: release.app.clone(),
            component: release.component.clone(),
            release: release.timestamp.clone(),
            name: name.into(),
            size_gb,
            volume_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Node {
    pub fn new(id: impl Into<String>, class: impl Into<String>) -> Self {
        let now = epoch_secs();
        Self {
            id: id.into(),
            class: class.into(),
            name: None,
            external_ip: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entrypoint {
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        let now = epoch_secs();
        Self {
            name: name.into(),
            domain: domain.into(),
            address: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ── Resource ───────────────────────────────────────────────────────

/// A loaded domain record of any kind.
///
/// Serializes as the bare inner record; the kind is implied by the storage
/// key it lives under.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Resource {
    App(App),
    Component(Component),
    Release(Release),
    Instance(Instance),
    Volume(Volume),
    Node(Node),
    Entrypoint(Entrypoint),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::App(_) => ResourceKind::App,
            Resource::Component(_) => ResourceKind::Component,
            Resource::Release(_) => ResourceKind::Release,
            Resource::Instance(_) => ResourceKind::Instance,
            Resource::Volume(_) => ResourceKind::Volume,
            Resource::Node(_) => ResourceKind::Node,
            Resource::Entrypoint(_) => ResourceKind::Entrypoint,
        }
    }

    /// Position of this record in the resource tree.
    pub fn location(&self) -> Location {
        match self {
            Resource::App(r) => Location::App {
                app: r.name.clone(),
            },
            Resource::Component(r) => Location::Component {
                app: r.app.clone(),
                component: r.name.clone(),
            },
            Resource::Release(r) => Location::Release {
                app: r.app.clone(),
                component: r.component.clone(),
                release: r.timestamp.clone(),
            },
            Resource::Instance(r) => Location::Instance {
                app: r.app.clone(),
                component: r.component.clone(),
                release: r.release.clone(),
                instance: r.id.clone(),
            },
            Resource::Volume(r) => Location::Volume {
                app: r.app.clone(),
                component: r.component.clone(),
                release: r.release.clone(),
                volume: r.name.clone(),
            },
            Resource::Node(r) => Location::Node { node: r.id.clone() },
            Resource::Entrypoint(r) => Location::Entrypoint {
                entrypoint: r.name.clone(),
            },
        }
    }

    pub(crate) fn touch(&mut self) {
        let now = epoch_secs();
        match self {
            Resource::App(r) => r.updated_at = now,
            Resource::Component(r) => r.updated_at = now,
            Resource::Release(r) => r.updated_at = now,
            Resource::Instance(r) => r.updated_at = now,
            Resource::Volume(r) => r.updated_at = now,
            Resource::Node(r) => r.updated_at = now,
            Resource::Entrypoint(r) => r.updated_at = now,
        }
    }
}
