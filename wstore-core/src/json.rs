//! Canonical JSON helpers

use crate::error::{Result, WorkspaceError};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Recursively sorts object keys
pub fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::with_capacity(entries.len());
            for (k, v) in entries {
                out.insert(k.clone(), sorted(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Serialized form used for storage, checksums and size accounting
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&sorted(value))?)
}

/// MD5 of the canonical bytes, lower-case hex
pub fn checksum(canonical: &[u8]) -> String {
    format!("{:x}", md5::compute(canonical))
}

/// Builds a copy of `value` containing only the given JSON pointer paths.
///
/// Selected array elements stay in an array, in their original order.
pub fn extract_paths(value: &Value, paths: &[String]) -> Result<Value> {
    let mut selection = Selection::Some(BTreeMap::new());
    for path in paths {
        if value.pointer(path).is_none() {
            return Err(WorkspaceError::illegal(format!("Invalid selection: no such path {}", path)));
        }
        selection.add(pointer_tokens(path));
    }
    Ok(selection.project(value))
}

enum Selection {
    All,
    Some(BTreeMap<String, Selection>),
}

impl Selection {
    fn add(&mut self, tokens: Vec<String>) {
        let mut cur = self;
        for token in tokens {
            cur = match cur {
                Selection::All => return,
                Selection::Some(children) => children
                    .entry(token)
                    .or_insert_with(|| Selection::Some(BTreeMap::new())),
            };
        }
        *cur = Selection::All;
    }

    fn project(&self, value: &Value) -> Value {
        let children = match self {
            Selection::All => return value.clone(),
            Selection::Some(children) => children,
        };
        match value {
            Value::Object(map) => Value::Object(
                children
                    .iter()
                    .filter_map(|(k, sel)| map.get(k).map(|v| (k.clone(), sel.project(v))))
                    .collect(),
            ),
            Value::Array(items) => {
                let mut picked: Vec<(usize, &Selection)> = children
                    .iter()
                    .filter_map(|(k, sel)| k.parse::<usize>().ok().map(|i| (i, sel)))
                    .collect();
                picked.sort_by_key(|(i, _)| *i);
                Value::Array(
                    picked
                        .into_iter()
                        .filter_map(|(i, sel)| items.get(i).map(|v| sel.project(v)))
                        .collect(),
                )
            }
            other => other.clone(),
        }
    }
}

fn pointer_tokens(path: &str) -> Vec<String> {
    path.split('/')
        .skip(1)
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect()
}
