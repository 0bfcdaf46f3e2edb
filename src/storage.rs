use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct CommandDefinition {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String, // Stable identifier, also the file stem
    #[serde(default)]
    pub title: String, // Human-readable label
    #[serde(default)]
    pub command: String, // Shell command line, may start with `~`
    #[serde(flatten)]
    pub extra: Map<String, Value>, // Caller-defined fields, stored untouched
}

impl CommandDefinition {
    #[cfg(test)]
    pub fn new(title: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            command: command.into(),
            extra: Map::new(),
        }
    }
}

/// Hand-written records sometimes carry `"id": null` or a numeric id.
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(de::Error::custom(format!("invalid command id: {}", other))),
    }
}

/// A single named input value as the front-end sends it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum InputValue {
    Bool(bool),
    Number(Number),
    Text(String),
}

impl InputValue {
    /// Environment form of the value: booleans become `1`/`0`.
    pub fn to_env_string(&self) -> String {
        match self {
            InputValue::Bool(true) => "1".to_string(),
            InputValue::Bool(false) => "0".to_string(),
            InputValue::Number(n) => n.to_string(),
            InputValue::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        InputValue::Text(value.to_string())
    }
}

impl From<bool> for InputValue {
    fn from(value: bool) -> Self {
        InputValue::Bool(value)
    }
}

impl From<i64> for InputValue {
    fn from(value: i64) -> Self {
        InputValue::Number(value.into())
    }
}

/// Input values for one command, keyed by field name. Always replaced wholesale.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct InputValueSet(pub BTreeMap<String, InputValue>);

impl InputValueSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<InputValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InputValue)> {
        self.0.iter()
    }

    /// Entries of `other` replace entries of `self` with the same name.
    pub fn merged_with(&self, other: &InputValueSet) -> InputValueSet {
        let mut merged = self.clone();
        for (name, value) in other.iter() {
            merged.0.insert(name.clone(), value.clone());
        }
        merged
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool, // Exit code was 0
    pub output: String, // stdout, then stderr
    #[serde(rename = "exitCode")]
    pub exit_code: i32, // -1 when there was no normal exit
}

impl ExecutionResult {
    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            exit_code: -1,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CommandListResponse {
    pub commands: Vec<CommandDefinition>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SaveCommandResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OperationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}
