//! Label collision handling for computers and groups

use prov_graph::{EntityKind, GraphStore, StoreError};
use uuid::Uuid;

/// Label under which an imported entity can be stored
///
/// Returns `label` unchanged unless another uuid already owns it. Otherwise
/// tries `{label}{suffix}{n}` for `n = start, start + 1, ...` and returns the
/// first candidate nobody owns. Pre-existing entities are never renamed.
///
/// # Errors
/// Store lookup failure
pub(crate) fn unique_label<S>(
    store: &S,
    kind: EntityKind,
    uuid: &Uuid,
    label: &str,
    suffix: &str,
    start: u32,
) -> Result<String, StoreError>
where
    S: GraphStore + ?Sized,
{
    if is_free(store, kind, uuid, label)? {
        return Ok(label.to_string());
    }

    let mut n = start;
    loop {
        let candidate = format!("{label}{suffix}{n}");
        if is_free(store, kind, uuid, &candidate)? {
            tracing::debug!("Renamed {} '{}' to '{}'", kind, label, candidate);
            return Ok(candidate);
        }
        n = n.checked_add(1).ok_or_else(|| {
            StoreError::ConstraintViolation(format!("no free label left for {kind} '{label}'"))
        })?;
    }
}

fn is_free<S>(store: &S, kind: EntityKind, uuid: &Uuid, label: &str) -> Result<bool, StoreError>
where
    S: GraphStore + ?Sized,
{
    Ok(store
        .find_by_label(kind, label)?
        .iter()
        .all(|owner| owner.uuid() == *uuid))
}
