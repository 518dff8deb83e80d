//! Graph store interface
//!
//! The persistent graph store is an external collaborator. This module
//! defines the operations the traversal, export and merge engines need
//! from it, plus a scoped transaction helper.

use crate::entity::{Entity, EntityId, EntityKind, EntityRecord};
use crate::error::StoreError;
use crate::link::{Direction, LinkRow, LinkType, Neighbor};
use uuid::Uuid;

/// Storage backend for the provenance graph
///
/// Implementations own id assignment, uniqueness of uuids per kind and of
/// user emails, and link endpoint validity. Transactions must nest: every
/// `begin` is matched by one `commit` or `rollback`, and rolling back an
/// outer transaction discards work committed by inner ones.
pub trait GraphStore {
    /// Look up an entity by global identity
    ///
    /// # Errors
    /// Backend failure
    fn get_by_uuid(&self, kind: EntityKind, uuid: &Uuid) -> Result<Option<Entity>, StoreError>;

    /// Look up an entity by local id
    ///
    /// # Errors
    /// Backend failure
    fn get_by_id(&self, kind: EntityKind, id: EntityId) -> Result<Option<Entity>, StoreError>;

    /// Look up many entities by uuid; missing uuids are skipped
    ///
    /// Callers chunk `uuids` to respect backend parameter limits.
    ///
    /// # Errors
    /// Backend failure
    fn get_many_by_uuid(
        &self,
        kind: EntityKind,
        uuids: &[Uuid],
    ) -> Result<Vec<Entity>, StoreError> {
        let mut found = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            if let Some(entity) = self.get_by_uuid(kind, uuid)? {
                found.push(entity);
            }
        }
        Ok(found)
    }

    /// Create an entity and assign it a local id
    ///
    /// # Errors
    /// Constraint violations (duplicate uuid, duplicate email) or backend failure
    fn create(&mut self, record: EntityRecord) -> Result<Entity, StoreError>;

    /// Create many entities
    ///
    /// # Errors
    /// As [`GraphStore::create`]
    fn bulk_insert(&mut self, records: Vec<EntityRecord>) -> Result<Vec<Entity>, StoreError> {
        records.into_iter().map(|r| self.create(r)).collect()
    }

    /// Replace the stored record of an existing entity
    ///
    /// # Errors
    /// `StoreError::Missing` if the entity does not exist
    fn update(&mut self, entity: &Entity) -> Result<(), StoreError>;

    /// Update many entities
    ///
    /// # Errors
    /// As [`GraphStore::update`]
    fn bulk_update(&mut self, entities: &[Entity]) -> Result<(), StoreError> {
        entities.iter().try_for_each(|e| self.update(e))
    }

    /// Neighbors of a node over one link type in one direction
    ///
    /// # Errors
    /// Backend failure
    fn query_neighbors(
        &self,
        node: EntityId,
        link_type: LinkType,
        direction: Direction,
    ) -> Result<Vec<Neighbor>, StoreError>;

    /// Insert a link; returns `false` if the identical tuple already exists
    ///
    /// # Errors
    /// Unknown endpoints, endpoint types the link type forbids, backend failure
    fn insert_link(&mut self, link: &LinkRow) -> Result<bool, StoreError>;

    /// Insert many links; returns how many were new
    ///
    /// # Errors
    /// As [`GraphStore::insert_link`]
    fn bulk_insert_links(&mut self, links: &[LinkRow]) -> Result<usize, StoreError> {
        let mut inserted = 0;
        for link in links {
            if self.insert_link(link)? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Entities of a labelled kind (computer, group) carrying `label`
    ///
    /// # Errors
    /// Backend failure
    fn find_by_label(&self, kind: EntityKind, label: &str) -> Result<Vec<Entity>, StoreError>;

    /// User with the given email
    ///
    /// # Errors
    /// Backend failure
    fn find_user_by_email(&self, email: &str) -> Result<Option<Entity>, StoreError>;

    /// Logs or comments attached to a node
    ///
    /// # Errors
    /// Backend failure
    fn attached(&self, kind: EntityKind, node: &Uuid) -> Result<Vec<Entity>, StoreError>;

    /// Groups containing at least one of `nodes`
    ///
    /// # Errors
    /// Backend failure
    fn groups_containing(&self, nodes: &[Uuid]) -> Result<Vec<Entity>, StoreError>;

    /// Binary payload of a node
    ///
    /// # Errors
    /// Backend failure
    fn payload(&self, node: &Uuid) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store the binary payload of a node
    ///
    /// # Errors
    /// Backend failure
    fn put_payload(&mut self, node: &Uuid, data: Vec<u8>) -> Result<(), StoreError>;

    /// Open a (possibly nested) transaction
    ///
    /// # Errors
    /// Backend failure
    fn begin(&mut self) -> Result<(), StoreError>;

    /// Commit the innermost transaction
    ///
    /// # Errors
    /// `StoreError::NoTransaction` or backend failure
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Roll back the innermost transaction
    ///
    /// # Errors
    /// `StoreError::NoTransaction` or backend failure
    fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Run `f` inside a store transaction
///
/// Commits when `f` succeeds and rolls back on any error. A failed rollback
/// is logged; the original error is returned.
///
/// # Errors
/// The error returned by `f`, or a store error from `begin`/`commit`
pub fn transaction<S, T, E, F>(store: &mut S, f: F) -> Result<T, E>
where
    S: GraphStore + ?Sized,
    E: From<StoreError>,
    F: FnOnce(&mut S) -> Result<T, E>,
{
    store.begin()?;
    match f(store) {
        Ok(value) => {
            store.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = store.rollback() {
                tracing::error!("Rollback failed: {}", rollback_err);
            } else {
                tracing::debug!("Transaction rolled back");
            }
            Err(err)
        }
    }
}
