//! Navigation inside raw document values
//!
//! An embedded document is addressed by the chain of (relation, id) pairs
//! leading from its root. One-relations hold a single object, many-relations
//! an array of objects; both are matched on `_id`.

use tether_core::{RecordId, Value};

pub(crate) const ID_KEY: &str = "_id";

/// One step from a parent document into an embedded child
pub(crate) type Segment = (String, RecordId);

pub(crate) fn has_id(value: &Value, id: &RecordId) -> bool {
    value.get(ID_KEY).and_then(Value::as_str) == Some(id.as_str())
}

pub(crate) fn locate<'a>(root: &'a Value, path: &[Segment]) -> Option<&'a Value> {
    let mut node = root;
    for (relation, id) in path {
        node = match node.get(relation.as_str())? {
            Value::Array(items) => items.iter().find(|item| has_id(item, id))?,
            item if has_id(item, id) => item,
            _ => return None,
        };
    }
    Some(node)
}

pub(crate) fn locate_mut<'a>(root: &'a mut Value, path: &[Segment]) -> Option<&'a mut Value> {
    let mut node = root;
    for (relation, id) in path {
        let slot = node.get_mut(relation.as_str())?;
        node = if slot.is_array() {
            slot.as_array_mut()?
                .iter_mut()
                .find(|item| has_id(item, id))?
        } else if has_id(slot, id) {
            slot
        } else {
            return None;
        };
    }
    Some(node)
}

/// Write `child` into `container[relation]`, replacing a same-id entry
pub(crate) fn upsert(container: &mut Value, relation: &str, many: bool, child: Value) -> bool {
    let Value::Object(map) = container else {
        return false;
    };

    if !many {
        map.insert(relation.to_string(), child);
        return true;
    }

    let slot = map
        .entry(relation.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }

    if let Value::Array(items) = slot {
        let existing = child
            .get(ID_KEY)
            .and_then(Value::as_str)
            .and_then(|id| items.iter().position(|item| has_id(item, &RecordId::new(id))));
        match existing {
            Some(index) => items[index] = child,
            None => items.push(child),
        }
    }
    true
}

/// Remove the child with `id` from `container[relation]`
pub(crate) fn remove(container: &mut Value, relation: &str, id: &RecordId) -> bool {
    let Some(slot) = container.get_mut(relation) else {
        return false;
    };

    match slot {
        Value::Array(items) => {
            let before = items.len();
            items.retain(|item| !has_id(item, id));
            items.len() != before
        }
        item if has_id(item, id) => {
            *item = Value::Null;
            true
        }
        _ => false,
    }
}
