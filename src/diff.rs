use serde_json::{Map, Value};

/// One changed leaf, addressed by a dotted path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Change {
    pub path: String,
    pub old: Value,
    pub new: Value,
}

/// Changes that applying `update` on top of `base` would make.
/// Keys missing from `update` are not reported; payloads are partial.
pub(crate) fn changes_between(base: &Map<String, Value>, update: &Map<String, Value>) -> Vec<Change> {
    let mut changes = Vec::new();
    walk(base, update, "", &mut changes);
    changes
}

fn walk(base: &Map<String, Value>, update: &Map<String, Value>, prefix: &str, out: &mut Vec<Change>) {
    for (key, new) in update {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match (base.get(key), new) {
            (Some(Value::Object(old_map)), Value::Object(new_map)) => {
                walk(old_map, new_map, &path, out);
            }
            (None, Value::Object(new_map)) => walk(&Map::new(), new_map, &path, out),
            (Some(old), new) if old == new => {}
            (old, new) => out.push(Change {
                path,
                old: old.cloned().unwrap_or(Value::Null),
                new: new.clone(),
            }),
        }
    }
}
