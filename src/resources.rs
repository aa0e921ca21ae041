//! Ownership ledger for graphics resources.
//!
//! Every geometry, material and texture the engine allocates for a session is recorded here
//! with its owner at creation time. Teardown walks the ledger instead of relying on the
//! engine to reclaim anything implicitly.

use anyhow::Result;

use crate::scene::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Geometry(GeometryId),
    Material(MaterialId),
    Texture(TextureId),
}

impl From<GeometryId> for ResourceId {
    fn from(id: GeometryId) -> Self {
        ResourceId::Geometry(id)
    }
}

impl From<MaterialId> for ResourceId {
    fn from(id: MaterialId) -> Self {
        ResourceId::Material(id)
    }
}

impl From<TextureId> for ResourceId {
    fn from(id: TextureId) -> Self {
        ResourceId::Texture(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceOwner {
    /// Lives as long as the scene itself (background texture and similar).
    Scene,
    /// Belongs to a node subtree and goes away with it.
    Node(NodeId),
}

/// Anything that can free a graphics resource by id.
pub trait ResourceReleaser {
    fn release(&mut self, resource: ResourceId) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LedgerEntry {
    resource: ResourceId,
    owner: ResourceOwner,
}

#[derive(Debug, Default)]
pub struct ResourceLedger {
    entries: Vec<LedgerEntry>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: impl Into<ResourceId>, owner: ResourceOwner) {
        let resource = resource.into();
        debug_assert!(
            !self.entries.iter().any(|entry| entry.resource == resource),
            "resource {resource:?} registered twice"
        );
        self.entries.push(LedgerEntry { resource, owner });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn owned_by(&self, owner: ResourceOwner) -> impl Iterator<Item = ResourceId> + '_ {
        self.entries.iter().filter(move |entry| entry.owner == owner).map(|entry| entry.resource)
    }

    pub fn count_owned_by(&self, owner: ResourceOwner) -> usize {
        self.owned_by(owner).count()
    }

    /// Releases every resource held by `owner`, newest first. Entries are dropped from the
    /// ledger even when the releaser reports an error; the number of successful releases is
    /// returned.
    pub fn release_owned_by(&mut self, owner: ResourceOwner, releaser: &mut dyn ResourceReleaser) -> usize {
        let mut released = 0;
        let mut kept = Vec::with_capacity(self.entries.len());
        let mut doomed = Vec::new();
        for entry in self.entries.drain(..) {
            if entry.owner == owner {
                doomed.push(entry.resource);
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;
        for resource in doomed.into_iter().rev() {
            match releaser.release(resource) {
                Ok(()) => released += 1,
                Err(err) => log::warn!("Failed to release {resource:?}: {err:?}"),
            }
        }
        released
    }

    /// Releases everything left in the ledger regardless of owner.
    pub fn release_all(&mut self, releaser: &mut dyn ResourceReleaser) -> usize {
        let mut released = 0;
        for entry in self.entries.drain(..).rev() {
            match releaser.release(entry.resource) {
                Ok(()) => released += 1,
                Err(err) => log::warn!("Failed to release {:?}: {err:?}", entry.resource),
            }
        }
        released
    }
}
