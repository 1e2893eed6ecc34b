// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-place upgrades of legacy profile records

use serde_json::{json, Map, Value};
use std::collections::HashSet;

use super::ProfileEntry;
use crate::manifest::MANIFEST_FILE_NAME;

/// Bring a record to the current shape, returning whether anything changed
///
/// `app_params` holds the param names declared by the record's manifest; they
/// decide which legacy flat args belong to `args.app`.
pub fn upgrade_profile(entry: &mut ProfileEntry, app_params: &HashSet<String>) -> bool {
    let mut changed = false;

    changed |= split_flat_args(entry, app_params);
    changed |= insert_missing(entry, "autoclear", json!(true));
    changed |= upgrade_exit_codes(entry);
    changed |= insert_missing(entry, "install_json", json!(MANIFEST_FILE_NAME));
    for key in ["data_files", "groups", "validations"] {
        changed |= insert_missing(entry, key, json!([]));
    }
    changed |= upgrade_validations(entry);

    changed
}

fn insert_missing(entry: &mut ProfileEntry, key: &str, value: Value) -> bool {
    if entry.contains_key(key) {
        return false;
    }
    entry.insert(key.to_string(), value);
    true
}

/// `args: {...}` → `args: {app: {...}, default: {...}}`
fn split_flat_args(entry: &mut ProfileEntry, app_params: &HashSet<String>) -> bool {
    let flat = match entry.get("args") {
        Some(Value::Object(args)) if !args.contains_key("app") && !args.contains_key("default") => {
            args.clone()
        }
        Some(_) => return false,
        None => Map::new(),
    };

    let mut app = Map::new();
    let mut default = Map::new();
    for (key, value) in flat {
        if app_params.contains(&key) {
            app.insert(key, value);
        } else {
            default.insert(key, value);
        }
    }

    entry.insert(
        "args".to_string(),
        json!({"app": app, "default": default}),
    );
    true
}

/// `exit_code: n` → `exit_codes: [n]`
fn upgrade_exit_codes(entry: &mut ProfileEntry) -> bool {
    match entry.remove("exit_code") {
        Some(code) => {
            if !entry.contains_key("exit_codes") {
                let codes = match code {
                    Value::Array(codes) => codes,
                    other => vec![other],
                };
                entry.insert("exit_codes".to_string(), Value::Array(codes));
            }
            true
        }
        None => insert_missing(entry, "exit_codes", json!([0])),
    }
}

/// Fill `data_type` and `operator` on validation rules
fn upgrade_validations(entry: &mut ProfileEntry) -> bool {
    let Some(Value::Array(rules)) = entry.get_mut("validations") else {
        return false;
    };

    let mut changed = false;
    for rule in rules.iter_mut().filter_map(Value::as_object_mut) {
        changed |= insert_missing(rule, "data_type", json!("redis"));
        changed |= insert_missing(rule, "operator", json!("eq"));
    }
    changed
}
