// SPDX-License-Identifier: AGPL-3.0-or-later
//! Output validation rules and the key/value store they are built from

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::Result;

/// Comparison applied to an output variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Equal
    Eq,
    /// Deep diff of structured data
    Dd,
}

/// A check against one output variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Expected data
    pub data: Value,

    /// Where the variable is read from
    #[serde(default = "default_data_type")]
    pub data_type: String,

    pub operator: Operator,

    /// Variable reference, e.g. `#App:9876:result!String`
    pub variable: String,
}

impl ValidationRule {
    /// Rule with no expected data yet
    pub fn placeholder(variable: impl Into<String>) -> Self {
        Self {
            data: Value::Null,
            data_type: default_data_type(),
            operator: Operator::Eq,
            variable: variable.into(),
        }
    }

    /// Rule expecting a raw stored value
    ///
    /// Stored values are JSON when possible; arrays and objects compare by deep diff.
    pub fn from_stored(variable: impl Into<String>, raw: &str) -> Self {
        let data = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        let operator = match data {
            Value::Array(_) | Value::Object(_) => Operator::Dd,
            _ => Operator::Eq,
        };

        Self {
            data,
            data_type: default_data_type(),
            operator,
            variable: variable.into(),
        }
    }
}

/// Build one rule per output variable from a fetched context
pub fn rules_from_context(
    variables: &[String],
    values: &HashMap<String, String>,
) -> Vec<ValidationRule> {
    variables
        .iter()
        .map(|variable| match values.get(variable) {
            Some(raw) => ValidationRule::from_stored(variable.as_str(), raw),
            None => {
                debug!(variable = %variable, "No stored value for output variable");
                ValidationRule::placeholder(variable.as_str())
            }
        })
        .collect()
}

/// Source of playbook output values, keyed by context
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Every variable/value pair stored under a context
    async fn fetch_context(&self, context: &str) -> Result<HashMap<String, String>>;
}

/// Playbook variable store backed by a Redis hash per context
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    /// Client for a `redis://` URL; no connection is made until first use
    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    /// Redis URL for a host and port
    pub fn url(host: &str, port: u16) -> String {
        format!("redis://{}:{}", host, port)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn fetch_context(&self, context: &str) -> Result<HashMap<String, String>> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let values: HashMap<String, String> = connection.hgetall(context).await?;
        info!(context = %context, variables = values.len(), "Fetched playbook context");
        Ok(values)
    }
}

fn default_data_type() -> String {
    "redis".to_string()
}
