use super::{arg, float, handle, int, text};
use crate::fixture::{Fixture, FixtureSet};
use crate::step::Operation;
use crate::value::{HandleId, Reply, Value};
use serde_json::{Map, Number, Value as Json};

/// A node argument: a handle to a live JSON tree or a snapshot value taken by
/// an earlier lookup.
fn node<'a>(args: &'a [Value], index: usize, fixtures: &'a FixtureSet) -> Option<&'a Json> {
    match arg(args, index) {
        Value::Json(v) => Some(v),
        Value::Handle(id) => match fixtures.get(*id) {
            Some(Fixture::Json(v)) => Some(v),
            _ => None,
        },
        _ => None,
    }
}

fn new_tree(fixtures: &mut FixtureSet, op: Operation, tree: Json) -> Reply {
    Reply::ret(Value::Handle(
        fixtures.acquire_anonymous(op.name(), Fixture::Json(tree)),
    ))
}

fn is_tree(fixtures: &FixtureSet, id: HandleId) -> bool {
    matches!(fixtures.get(id), Some(Fixture::Json(_)))
}

fn number(x: f64) -> Json {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < i64::MAX as f64 {
        Json::from(x as i64)
    } else {
        Number::from_f64(x).map(Json::Number).unwrap_or(Json::Null)
    }
}

/// Moves `item` under `parent`. Ownership transfers only when `attach`
/// accepts the parent; otherwise the item stays with the caller.
fn adopt(
    fixtures: &mut FixtureSet,
    parent: Option<HandleId>,
    item: Option<HandleId>,
    accepts: impl Fn(&Json) -> bool,
    attach: impl FnOnce(&mut Json, Json),
) -> bool {
    let (Some(parent), Some(item)) = (parent, item) else {
        return false;
    };
    if parent == item || !is_tree(fixtures, item) {
        return false;
    }
    match fixtures.get(parent) {
        Some(Fixture::Json(tree)) if accepts(tree) => {}
        _ => return false,
    }
    let Some(Fixture::Json(value)) = fixtures.transfer(item, parent) else {
        return false;
    };
    if let Some(Fixture::Json(tree)) = fixtures.get_mut(parent) {
        attach(tree, value);
    }
    true
}

pub fn invoke(op: Operation, args: &[Value], fixtures: &mut FixtureSet) -> Reply {
    match op {
        Operation::JsonCreateObject => new_tree(fixtures, op, Json::Object(Map::new())),
        Operation::JsonCreateArray => new_tree(fixtures, op, Json::Array(Vec::new())),
        Operation::JsonCreateString => match text(args, 0) {
            Some(s) => new_tree(fixtures, op, Json::String(s)),
            None => Reply::ret(Value::Null),
        },
        Operation::JsonCreateNumber => new_tree(fixtures, op, number(float(args, 0))),
        Operation::JsonAddToObject => {
            let Some(key) = text(args, 1) else {
                return Reply::ret(Value::Bool(false));
            };
            let added = adopt(
                fixtures,
                handle(args, 0),
                handle(args, 2),
                Json::is_object,
                |tree, value| {
                    if let Json::Object(map) = tree {
                        map.insert(key, value);
                    }
                },
            );
            Reply::ret(Value::Bool(added))
        }
        Operation::JsonAddToArray => {
            let added = adopt(
                fixtures,
                handle(args, 0),
                handle(args, 1),
                Json::is_array,
                |tree, value| {
                    if let Json::Array(items) = tree {
                        items.push(value);
                    }
                },
            );
            Reply::ret(Value::Bool(added))
        }
        Operation::JsonGetItem => {
            let found = text(args, 1).and_then(|key| {
                node(args, 0, fixtures)
                    .and_then(Json::as_object)
                    .and_then(|map| map.get(&key))
                    .cloned()
            });
            Reply::ret(found.map(Value::Json).unwrap_or(Value::Null))
        }
        Operation::JsonGetArrayItem => {
            let found = usize::try_from(int(args, 1)).ok().and_then(|index| {
                node(args, 0, fixtures)
                    .and_then(Json::as_array)
                    .and_then(|items| items.get(index))
                    .cloned()
            });
            Reply::ret(found.map(Value::Json).unwrap_or(Value::Null))
        }
        Operation::JsonArraySize => {
            let len = match node(args, 0, fixtures) {
                Some(Json::Array(items)) => items.len(),
                Some(Json::Object(map)) => map.len(),
                _ => 0,
            };
            Reply::ret(Value::Int(len as i64))
        }
        Operation::JsonDeleteItem => {
            let removed = match (handle(args, 0), text(args, 1)) {
                (Some(id), Some(key)) => match fixtures.get_mut(id) {
                    Some(Fixture::Json(Json::Object(map))) => map.shift_remove(&key).is_some(),
                    _ => false,
                },
                _ => false,
            };
            Reply::ret(Value::Bool(removed))
        }
        Operation::JsonDetachItem => {
            let detached = match (handle(args, 0), text(args, 1)) {
                (Some(id), Some(key)) => match fixtures.get_mut(id) {
                    Some(Fixture::Json(Json::Object(map))) => map.shift_remove(&key),
                    _ => None,
                },
                _ => None,
            };
            match detached {
                Some(tree) => new_tree(fixtures, op, tree),
                None => Reply::ret(Value::Null),
            }
        }
        Operation::JsonReplaceItem => {
            let Some(key) = text(args, 1) else {
                return Reply::ret(Value::Bool(false));
            };
            let replaced = adopt(
                fixtures,
                handle(args, 0),
                handle(args, 2),
                |tree| tree.as_object().is_some_and(|map| map.contains_key(&key)),
                |tree, value| {
                    if let Some(slot) = tree.get_mut(&key) {
                        *slot = value;
                    }
                },
            );
            Reply::ret(Value::Bool(replaced))
        }
        Operation::JsonReplaceArrayItem => {
            // Negative or out-of-bounds indices reject the call; the item stays
            // with the caller.
            let Ok(index) = usize::try_from(int(args, 1)) else {
                return Reply::ret(Value::Bool(false));
            };
            let replaced = adopt(
                fixtures,
                handle(args, 0),
                handle(args, 2),
                |tree| tree.as_array().is_some_and(|items| index < items.len()),
                |tree, value| {
                    if let Some(slot) = tree.get_mut(index) {
                        *slot = value;
                    }
                },
            );
            Reply::ret(Value::Bool(replaced))
        }
        Operation::JsonPrint => {
            let pretty = int(args, 1) != 0;
            let printed = node(args, 0, fixtures).and_then(|tree| {
                if pretty {
                    serde_json::to_string_pretty(tree).ok()
                } else {
                    serde_json::to_string(tree).ok()
                }
            });
            Reply::ret(printed.map(Value::Text).unwrap_or(Value::Null))
        }
        Operation::JsonParse => match text(args, 0).map(|s| serde_json::from_str::<Json>(&s)) {
            Some(Ok(tree)) => new_tree(fixtures, op, tree),
            _ => Reply::ret(Value::Null),
        },
        Operation::JsonDuplicate => {
            let recurse = int(args, 1) != 0;
            let copy = node(args, 0, fixtures).map(|tree| match tree {
                Json::Object(_) if !recurse => Json::Object(Map::new()),
                Json::Array(_) if !recurse => Json::Array(Vec::new()),
                other => other.clone(),
            });
            match copy {
                Some(tree) => new_tree(fixtures, op, tree),
                None => Reply::ret(Value::Null),
            }
        }
        Operation::JsonCompare => {
            let equal = match (node(args, 0, fixtures), node(args, 1, fixtures)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
            Reply::ret(Value::Bool(equal))
        }
        Operation::JsonDelete => match handle(args, 0) {
            Some(id) if is_tree(fixtures, id) => {
                Reply::ret(Value::Bool(fixtures.release(id).unwrap_or(false)))
            }
            _ => Reply::ret(Value::Bool(false)),
        },
        _ => Reply::ret(Value::Null),
    }
}
