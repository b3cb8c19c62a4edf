//! Typed persistence of domain records over the coordination store.

use keelson_store::CoordinationStore;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::location::{Location, address_of};
use crate::types::{Resource, ResourceKind};

#[derive(Clone)]
pub struct Catalog {
    store: CoordinationStore,
}

impl Catalog {
    pub fn new(store: CoordinationStore) -> Self {
        Self { store }
    }

    /// The underlying store, shared with the task queue.
    pub fn store(&self) -> &CoordinationStore {
        &self.store
    }

    /// Load the record at `location`.
    pub fn load(&self, location: &Location) -> CoreResult<Resource> {
        let (kind, key) = record_key(location)?;
        match self.store.get(&key)? {
            Some(value) => decode(kind, &value),
            None => Err(CoreError::ResourceNotFound(address_of(location))),
        }
    }

    /// Persist a new record. Fails if one already exists at its location.
    pub fn create(&self, resource: &Resource) -> CoreResult<()> {
        let location = resource.location();
        let (_, key) = record_key(&location)?;
        self.store.create(&key, &serde_json::to_string(resource)?)?;
        debug!(kind = %resource.kind(), address = %address_of(&location), "resource created");
        Ok(())
    }

    /// Overwrite an existing record, bumping its `updated_at`.
    pub fn save(&self, resource: &mut Resource) -> CoreResult<()> {
        resource.touch();
        let location = resource.location();
        let (_, key) = record_key(&location)?;
        self.store
            .update(&key, &serde_json::to_string(resource)?)
            .map_err(|e| {
                if e.is_not_found() {
                    CoreError::ResourceNotFound(address_of(&location))
                } else {
                    e.into()
                }
            })
    }

    /// Remove the record at `location`. Returns true if it existed.
    pub fn delete(&self, location: &Location) -> CoreResult<bool> {
        let (_, key) = record_key(location)?;
        let existed = self.store.delete(&key)?;
        debug!(address = %address_of(location), existed, "resource deleted");
        Ok(existed)
    }

    /// Every record in the collection at `collection`, in key order.
    pub fn children(&self, collection: &Location) -> CoreResult<Vec<Resource>> {
        let (Some(kind), Some(dir)) = (collection.member_kind(), collection.storage_dir()) else {
            return Err(CoreError::InvalidAddress {
                address: address_of(collection),
                reason: "not a collection".to_string(),
            });
        };

        self.store
            .list(&dir)?
            .into_iter()
            .map(|(_, value)| decode(kind, &value))
            .collect()
    }
}

fn record_key(location: &Location) -> CoreResult<(ResourceKind, String)> {
    match (location.kind(), location.storage_key()) {
        (Some(kind), Some(key)) => Ok((kind, key)),
        _ => Err(CoreError::InvalidAddress {
            address: address_of(location),
            reason: "not a resource".to_string(),
        }),
    }
}

fn decode(kind: ResourceKind, value: &str) -> CoreResult<Resource> {
    fn parse<T: DeserializeOwned>(value: &str) -> CoreResult<T> {
        Ok(serde_json::from_str(value)?)
    }

    let resource = match kind {
        ResourceKind::App => Resource::App(parse(value)?),
        ResourceKind::Component => Resource::Component(parse(value)?),
        ResourceKind::Release => Resource::Release(parse(value)?),
        ResourceKind::Instance => Resource::Instance(parse(value)?),
        ResourceKind::Volume => Resource::Volume(parse(value)?),
        ResourceKind::Node => Resource::Node(parse(value)?),
        ResourceKind::Entrypoint => Resource::Entrypoint(parse(value)?),
    };
    Ok(resource)
}
