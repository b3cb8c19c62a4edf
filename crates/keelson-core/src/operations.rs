//! Static registry of the operations each resource kind supports.
//!
//! An operation is looked up by `(kind, name)` and performed against a
//! resolved [`Resource`]. The registry is a plain slice, so the full set of
//! valid operations is known at compile time and can be enumerated.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use anyhow::bail;
use tracing::info;

use crate::context::Core;
use crate::error::{CoreError, CoreResult};
use crate::location::Location;
use crate::types::{
    App, Component, Entrypoint, Instance, InstanceStatus, Node, Release, Resource, ResourceKind,
    Volume,
};

pub type OperationFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Entry point of a registered operation.
pub type Perform = for<'a> fn(&'a Core, &'a Resource) -> OperationFuture<'a>;

#[derive(Clone, Copy)]
pub struct Operation {
    pub kind: ResourceKind,
    pub name: &'static str,
    perform: Perform,
}

impl Operation {
    pub fn perform<'a>(&self, core: &'a Core, resource: &'a Resource) -> OperationFuture<'a> {
        (self.perform)(core, resource)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish()
    }
}

/// Register `$body` as operation `$name` on `Resource::$kind`.
macro_rules! operation {
    ($kind:ident, $name:literal, $body:path) => {
        Operation {
            kind: ResourceKind::$kind,
            name: $name,
            perform: {
                fn perform<'a>(core: &'a Core, resource: &'a Resource) -> OperationFuture<'a> {
                    Box::pin(async move {
                        match resource {
                            Resource::$kind(record) => $body(core, record).await,
                            other => Err(anyhow::anyhow!(
                                "operation {} expects a {} resource, got {}",
                                $name,
                                ResourceKind::$kind,
                                other.kind()
                            )),
                        }
                    })
                }
                perform
            },
        }
    };
}

pub static OPERATIONS: &[Operation] = &[
    operation!(App, "delete", delete_app),
    operation!(Component, "deploy", deploy_component),
    operation!(Component, "delete", delete_component),
    operation!(Release, "provision", provision_release),
    operation!(Release, "delete", delete_release),
    operation!(Instance, "start", start_instance),
    operation!(Instance, "stop", stop_instance),
    operation!(Instance, "delete", delete_instance),
    operation!(Volume, "create", create_volume),
    operation!(Volume, "resize", resize_volume),
    operation!(Volume, "delete", delete_volume),
    operation!(Node, "provision", provision_node),
    operation!(Node, "delete", delete_node),
    operation!(Entrypoint, "provision", provision_entrypoint),
    operation!(Entrypoint, "delete", delete_entrypoint),
];

pub fn find_operation(kind: ResourceKind, name: &str) -> CoreResult<&'static Operation> {
    OPERATIONS
        .iter()
        .find(|op| op.kind == kind && op.name == name)
        .ok_or_else(|| CoreError::UnknownOperation {
            kind,
            name: name.to_string(),
        })
}

pub fn operations_for(kind: ResourceKind) -> impl Iterator<Item = &'static Operation> {
    OPERATIONS.iter().filter(move |op| op.kind == kind)
}

// ── App ────────────────────────────────────────────────────────────

async fn delete_app(core: &Core, app: &App) -> anyhow::Result<()> {
    let components = core.catalog.children(&Location::Components {
        app: app.name.clone(),
    })?;
    for resource in components {
        if let Resource::Component(component) = resource {
            delete_component(core, &component).await?;
        }
    }
    core.provider.delete_namespace(&app.name).await?;
    core.catalog.delete(&Location::App {
        app: app.name.clone(),
    })?;
    info!(app = %app.name, "app deleted");
    Ok(())
}

// ── Component ──────────────────────────────────────────────────────

async fn deploy_component(core: &Core, component: &Component) -> anyhow::Result<()> {
    let Some(target) = &component.current_release else {
        bail!(
            "component {}/{} has no release to deploy",
            component.app,
            component.name
        );
    };
    let location = Location::Release {
        app: component.app.clone(),
        component: component.name.clone(),
        release: target.clone(),
    };
    let Resource::Release(release) = core.catalog.load(&location)? else {
        bail!("record at release location is not a release");
    };

    provision_release(core, &release).await?;

    let instances = core.catalog.children(&Location::Instances {
        app: release.app.clone(),
        component: release.component.clone(),
        release: release.timestamp.clone(),
    })?;
    for resource in instances {
        match resource {
            Resource::Instance(instance) if instance.status != InstanceStatus::Started => {
                start_instance(core, &instance).await?;
            }
            _ => {}
        }
    }
    info!(
        app = %component.app,
        component = %component.name,
        release = %release.timestamp,
        "component deployed"
    );
    Ok(())
}

async fn delete_component(core: &Core, component: &Component) -> anyhow::Result<()> {
    let releases = core.catalog.children(&Location::Releases {
        app: component.app.clone(),
        component: component.name.clone(),
    })?;
    for resource in releases {
        if let Resource::Release(release) = resource {
            delete_release(core, &release).await?;
        }
    }
    core.catalog.delete(&Location::Component {
        app: component.app.clone(),
        component: component.name.clone(),
    })?;
    Ok(())
}

// ── Release ────────────────────────────────────────────────────────

async fn provision_release(core: &Core, release: &Release) -> anyhow::Result<()> {
    core.provider.create_namespace(&release.app).await?;
    core.provider
        .create_service(&release.app, &release.service_name())
        .await?;

    for index in 0..release.instance_count {
        let instance = Resource::Instance(Instance::new(release, index.to_string()));
        match core.catalog.create(&instance) {
            Ok(()) => {}
            // Left behind by an earlier attempt.
            Err(e) if e.is_conflict() => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn delete_release(core: &Core, release: &Release) -> anyhow::Result<()> {
    let instances = core.catalog.children(&Location::Instances {
        app: release.app.clone(),
        component: release.component.clone(),
        release: release.timestamp.clone(),
    })?;
    for resource in instances {
        if let Resource::Instance(instance) = resource {
            delete_instance(core, &instance).await?;
        }
    }

    let volumes = core.catalog.children(&Location::Volumes {
        app: release.app.clone(),
        component: release.component.clone(),
        release: release.timestamp.clone(),
    })?;
    for resource in volumes {
        if let Resource::Volume(volume) = resource {
            delete_volume(core, &volume).await?;
        }
    }

    core.provider
        .delete_service(&release.app, &release.service_name())
        .await?;
    core.catalog.delete(&Resource::Release(release.clone()).location())?;
    Ok(())
}

// ── Instance ───────────────────────────────────────────────────────

async fn start_instance(core: &Core, instance: &Instance) -> anyhow::Result<()> {
    core.provider
        .create_replication_controller(&instance.app, &instance.controller_name(), 1)
        .await?;
    let mut updated = instance.clone();
    updated.status = InstanceStatus::Started;
    core.catalog.save(&mut Resource::Instance(updated))?;
    Ok(())
}

async fn stop_instance(core: &Core, instance: &Instance) -> anyhow::Result<()> {
    core.provider
        .delete_replication_controller(&instance.app, &instance.controller_name())
        .await?;
    let mut updated = instance.clone();
    updated.status = InstanceStatus::Stopped;
    core.catalog.save(&mut Resource::Instance(updated))?;
    Ok(())
}

async fn delete_instance(core: &Core, instance: &Instance) -> anyhow::Result<()> {
    if instance.status == InstanceStatus::Started {
        core.provider
            .delete_replication_controller(&instance.app, &instance.controller_name())
            .await?;
    }
    core.catalog
        .delete(&Resource::Instance(instance.clone()).location())?;
    Ok(())
}

// ── Volume ─────────────────────────────────────────────────────────

async fn create_volume(core: &Core, volume: &Volume) -> anyhow::Result<()> {
    if volume.volume_id.is_some() {
        return Ok(());
    }
    let volume_id = core
        .provider
        .create_volume(&core.config.cloud, &volume.name, volume.size_gb)
        .await?;
    let mut updated = volume.clone();
    updated.volume_id = Some(volume_id);
    core.catalog.save(&mut Resource::Volume(updated))?;
    Ok(())
}

async fn resize_volume(core: &Core, volume: &Volume) -> anyhow::Result<()> {
    let Some(volume_id) = &volume.volume_id else {
        bail!("volume {} has not been created yet", volume.name);
    };
    core.provider.resize_volume(volume_id, volume.size_gb).await?;
    core.catalog.save(&mut Resource::Volume(volume.clone()))?;
    Ok(())
}

async fn delete_volume(core: &Core, volume: &Volume) -> anyhow::Result<()> {
    if let Some(volume_id) = &volume.volume_id {
        core.provider.delete_volume(volume_id).await?;
    }
    core.catalog
        .delete(&Resource::Volume(volume.clone()).location())?;
    Ok(())
}

// ── Node ───────────────────────────────────────────────────────────

async fn provision_node(core: &Core, node: &Node) -> anyhow::Result<()> {
    let server = core
        .provider
        .create_server(&core.config.cloud, &node.id, &node.class)
        .await?;
    let mut updated = node.clone();
    updated.name = Some(server.name);
    updated.external_ip = Some(server.external_ip);
    core.catalog.save(&mut Resource::Node(updated))?;
    info!(node = %node.id, class = %node.class, "node provisioned");
    Ok(())
}

async fn delete_node(core: &Core, node: &Node) -> anyhow::Result<()> {
    core.provider.delete_server(&node.id).await?;
    core.catalog.delete(&Location::Node {
        node: node.id.clone(),
    })?;
    Ok(())
}

// ── Entrypoint ─────────────────────────────────────────────────────

async fn provision_entrypoint(core: &Core, entrypoint: &Entrypoint) -> anyhow::Result<()> {
    let address = core
        .provider
        .create_load_balancer(&core.config.cloud, &entrypoint.name)
        .await?;
    let mut updated = entrypoint.clone();
    updated.address = Some(address);
    core.catalog.save(&mut Resource::Entrypoint(updated))?;
    Ok(())
}

async fn delete_entrypoint(core: &Core, entrypoint: &Entrypoint) -> anyhow::Result<()> {
    core.provider
        .delete_load_balancer(&entrypoint.name)
        .await?;
    core.catalog.delete(&Location::Entrypoint {
        entrypoint: entrypoint.name.clone(),
    })?;
    Ok(())
}
