//! Normalized parameter bag for action objects
//!
//! Keys are folded to snake_case (`elementId` → `element_id`) and parameters
//! nested under `params`/`parameters`/`args` are lifted to the top level.
//! Typed readers accept the loose shapes reasoning services tend to emit.

use pilot_core::{Point, ScrollDirection, Target};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Keys that carry an element id
pub const ELEMENT_KEYS: &[&str] = &[
    "element_id",
    "element",
    "element_index",
    "index",
    "id",
    "target_id",
];

/// Keys that carry a single coordinate pair
pub const COORDINATE_KEYS: &[&str] = &["coordinate", "coordinates", "point", "position"];

const NESTED_KEYS: &[&str] = &["params", "parameters", "args", "arguments"];

/// Convert `camelCase`, `kebab-case` or `snake_case` to `snake_case`
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_lower = false;
    for c in s.trim().chars() {
        if c == '-' || c == ' ' {
            out.push('_');
            prev_lower = false;
        } else if c.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

/// Parameter bag with snake_case keys
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, Value>,
}

impl Params {
    /// Build from a JSON action object
    ///
    /// Top-level keys win over nested ones; `skip` names keys (such as the
    /// discriminator) that are not parameters.
    pub fn from_object(object: &Map<String, Value>, skip: &[&str]) -> Self {
        let mut values = BTreeMap::new();

        for nested in NESTED_KEYS {
            if let Some(Value::Object(inner)) = object.get(*nested) {
                for (key, value) in inner {
                    values.insert(to_snake_case(key), value.clone());
                }
            }
        }

        for (key, value) in object {
            let key = to_snake_case(key);
            if skip.contains(&key.as_str()) || NESTED_KEYS.contains(&key.as_str()) {
                continue;
            }
            values.insert(key, value.clone());
        }

        values.retain(|_, v| !v.is_null());
        Self { values }
    }

    /// Build from an already-collected bag (dynamic actions)
    pub fn from_bag(bag: &BTreeMap<String, Value>) -> Self {
        let values = bag
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (to_snake_case(k), v.clone()))
            .collect();
        Self { values }
    }

    pub fn into_bag(self) -> BTreeMap<String, Value> {
        self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// First present key among `keys`, with its value
    pub fn first<'a>(&'a self, keys: &[&'a str]) -> Option<(&'a str, &'a Value)> {
        keys.iter()
            .find_map(|key| self.values.get(*key).map(|v| (*key, v)))
    }

    pub fn has_any(&self, keys: &[&str]) -> bool {
        keys.iter().any(|key| self.values.contains_key(*key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Coordinate pair stored under `name`, or split across `name_x`/`name_y`
    pub fn point(&self, name: &str) -> Option<Point> {
        if let Some(value) = self.values.get(name) {
            return value_to_point(value);
        }
        let x = self.values.get(&format!("{}_x", name)).and_then(value_to_i64)?;
        let y = self.values.get(&format!("{}_y", name)).and_then(value_to_i64)?;
        coordinates(x, y)
    }

    /// Whether a usable coordinate pair exists under `name`
    pub fn has_point(&self, name: &str) -> bool {
        self.point(name).is_some()
    }

    /// Element id or coordinate pair, from any of the recognised shapes
    ///
    /// Returns `Err` when a target key is present but holds an unusable value.
    pub fn target(&self) -> Result<Option<Target>, String> {
        if let Some(value) = self.values.get("target") {
            if let Some(id) = value_to_i64(value) {
                return element_target(id).map(Some);
            }
            return value_to_point(value)
                .map(|p| Some(Target::Point(p)))
                .ok_or_else(|| "parameter 'target': expected element id or coordinates".into());
        }

        if let Some((key, value)) = self.first(ELEMENT_KEYS) {
            let id = value_to_i64(value)
                .ok_or_else(|| format!("parameter '{}': expected an element id", key))?;
            return element_target(id).map(Some);
        }

        if let Some((key, value)) = self.first(COORDINATE_KEYS) {
            return value_to_point(value)
                .map(|p| Some(Target::Point(p)))
                .ok_or_else(|| format!("parameter '{}': expected [x, y]", key));
        }

        match (self.values.get("x"), self.values.get("y")) {
            (Some(x), Some(y)) => match (value_to_i64(x), value_to_i64(y)) {
                (Some(x), Some(y)) => coordinates(x, y)
                    .map(|p| Some(Target::Point(p)))
                    .ok_or_else(|| format!("coordinates ({}, {}) out of range", x, y)),
                _ => Err("parameters 'x'/'y': expected numbers".to_string()),
            },
            _ => Ok(None),
        }
    }

    /// Whether any target shape is present
    pub fn has_target(&self) -> bool {
        matches!(self.target(), Ok(Some(_)))
    }
}

fn element_target(id: i64) -> Result<Target, String> {
    u32::try_from(id)
        .map(Target::Element)
        .map_err(|_| format!("element id {} out of range", id))
}

/// Point from integer coordinates; `None` when either overflows `i32`
fn coordinates(x: i64, y: i64) -> Option<Point> {
    Some(Point::new(i32::try_from(x).ok()?, i32::try_from(y).ok()?))
}

/// Integer from a number (integral floats allowed) or numeric string
pub fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// String from a string, number or bool; `None` for arrays and objects
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn value_to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn value_to_direction(value: &Value) -> Option<ScrollDirection> {
    value.as_str().and_then(|s| s.parse().ok())
}

/// `[x, y]`, `{"x": .., "y": ..}` or `"x,y"`
pub fn value_to_point(value: &Value) -> Option<Point> {
    let (x, y) = match value {
        Value::Array(items) if items.len() == 2 => {
            (value_to_i64(&items[0])?, value_to_i64(&items[1])?)
        }
        Value::Object(map) => (value_to_i64(map.get("x")?)?, value_to_i64(map.get("y")?)?),
        Value::String(s) => {
            let (x, y) = s.trim_matches(|c| c == '(' || c == ')' || c == '[' || c == ']').split_once(',')?;
            (x.trim().parse().ok()?, y.trim().parse().ok()?)
        }
        _ => return None,
    };
    coordinates(x, y)
}
