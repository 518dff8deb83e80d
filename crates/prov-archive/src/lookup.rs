//! Batched store lookups

use prov_graph::{Entity, EntityKind, GraphStore, StoreError};
use uuid::Uuid;

/// Fetch entities by uuid in chunks of `batch_size`; missing uuids are skipped
pub(crate) fn lookup<S>(
    store: &S,
    kind: EntityKind,
    uuids: &[Uuid],
    batch_size: usize,
) -> Result<Vec<Entity>, StoreError>
where
    S: GraphStore + ?Sized,
{
    let mut found = Vec::with_capacity(uuids.len());
    for chunk in uuids.chunks(batch_size.max(1)) {
        found.extend(store.get_many_by_uuid(kind, chunk)?);
    }
    Ok(found)
}
