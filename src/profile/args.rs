// SPDX-License-Identifier: AGPL-3.0-or-later
//! Default profile arguments derived from a manifest

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::manifest::{format_variable, InstallJson, Param};

/// Job id used in generated playbook variable references
pub const JOB_ID: &str = "9876";

/// Group types accepted by the platform
const GROUP_TYPES: &[&str] = &[
    "Adversary",
    "Campaign",
    "Document",
    "Email",
    "Event",
    "Incident",
    "Intrusion Set",
    "Report",
    "Signature",
    "Task",
    "Threat",
];

/// Indicator types accepted by the platform
const INDICATOR_TYPES: &[&str] = &[
    "Address",
    "ASN",
    "CIDR",
    "EmailAddress",
    "File",
    "Host",
    "Mutex",
    "Registry Key",
    "URL",
    "User Agent",
];

/// Params that are always taken from the platform defaults
const DEFAULT_ONLY_PARAMS: &[&str] = &["api_access_id", "api_secret_key"];

/// Expand `${GROUP_TYPES}` and `${INDICATOR_TYPES}` tokens; other values pass through
pub fn expand_valid_values(values: &[String]) -> Vec<String> {
    let mut expanded = Vec::new();

    for value in values {
        match value.trim() {
            "${GROUP_TYPES}" => expanded.extend(GROUP_TYPES.iter().map(|t| t.to_string())),
            "${INDICATOR_TYPES}" => expanded.extend(INDICATOR_TYPES.iter().map(|t| t.to_string())),
            _ => expanded.push(value.clone()),
        }
    }

    expanded
}

/// App parameter arguments, one per declared param
pub fn app_args(install_json: &InstallJson) -> Map<String, Value> {
    let mut args = Map::new();

    for param in &install_json.params {
        if DEFAULT_ONLY_PARAMS.contains(&param.name.as_str()) {
            continue;
        }
        args.insert(param.name.clone(), param_arg(param));
    }

    args
}

fn param_arg(param: &Param) -> Value {
    match param.param_type.to_lowercase().as_str() {
        "boolean" => Value::Bool(to_bool(param.default.as_ref())),
        "choice" => {
            let values = expand_valid_values(&param.valid_values);
            Value::String(format!("[{}]", values.join("|")))
        }
        "multichoice" => Value::Array(
            expand_valid_values(&param.valid_values)
                .into_iter()
                .map(Value::String)
                .collect(),
        ),
        _ if !param.playbook_data_type.is_empty() => param
            .default
            .clone()
            .unwrap_or_else(|| Value::String(format!("<{}>", param.playbook_data_type.join("|")))),
        _ => param
            .default
            .clone()
            .unwrap_or_else(|| Value::String(String::new())),
    }
}

fn to_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => text.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Platform arguments, plus playbook database settings for playbook apps
pub fn default_args(install_json: &InstallJson, redis_host: &str, redis_port: u16) -> Map<String, Value> {
    let mut args = Map::new();

    let defaults = [
        ("api_access_id", json!("$env.API_ACCESS_ID")),
        ("api_default_org", json!("$env.API_DEFAULT_ORG")),
        ("api_secret_key", json!("$envs.API_SECRET_KEY")),
        ("tc_api_path", json!("$env.TC_API_PATH")),
        ("tc_in_path", json!("log")),
        ("tc_log_level", json!("debug")),
        ("tc_log_path", json!("log")),
        ("tc_log_to_api", json!(false)),
        ("tc_out_path", json!("log")),
        ("tc_proxy_external", json!(false)),
        ("tc_proxy_host", json!("$env.TC_PROXY_HOST")),
        ("tc_proxy_password", json!("$envs.TC_PROXY_PASSWORD")),
        ("tc_proxy_port", json!("$env.TC_PROXY_PORT")),
        ("tc_proxy_tc", json!(false)),
        ("tc_proxy_username", json!("$env.TC_PROXY_USERNAME")),
        ("tc_temp_path", json!("log")),
    ];

    for (key, value) in defaults {
        args.insert(key.to_string(), value);
    }

    if install_json.is_playbook() {
        args.insert("tc_playbook_db_type".to_string(), json!("Redis"));
        args.insert(
            "tc_playbook_db_context".to_string(),
            json!(Uuid::new_v4().to_string()),
        );
        args.insert("tc_playbook_db_path".to_string(), json!(redis_host));
        args.insert("tc_playbook_db_port".to_string(), json!(redis_port.to_string()));
        args.insert(
            "tc_playbook_out_variables".to_string(),
            json!(install_json.output_variables(JOB_ID).join(",")),
        );
    }

    args
}

/// Staging entries for every playbook-typed input param
pub fn staging_data(install_json: &InstallJson) -> Vec<Value> {
    install_json
        .params
        .iter()
        .filter_map(|param| {
            let data_type = param.playbook_data_type.first()?;
            Some(json!({
                "data": sample_data(data_type),
                "key": format_variable(JOB_ID, &param.name, data_type),
            }))
        })
        .collect()
}

fn sample_data(data_type: &str) -> Value {
    match data_type {
        "String" | "Binary" => json!(""),
        "KeyValue" => json!({"key": "", "value": ""}),
        "TCEntity" => json!({"id": "", "type": "", "value": ""}),
        "TCEnhancedEntity" => json!({"type": "", "value": ""}),
        kind if kind.ends_with("Array") => json!([]),
        _ => Value::Null,
    }
}
