use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level whitelist file loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistConfig {
    /// Schema version; currently must be "1.0".
    pub version: String,
    #[serde(default)]
    pub patterns: Vec<PatternSpec>,
}

/// One whitelisted query.
///
/// `query` and each value of `options` are wire JSON terms, as a driver
/// sends them, in which any node may be replaced by a placeholder object:
///
/// * `{"$ref": "name"}` matches anything and captures it under `name`;
/// * `{"$check": ...}` matches terms accepted by a [`CheckSpec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSpec {
    /// Human-readable, unique entry name.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub query: Value,
    /// Global query options the query must carry, e.g. `db`.
    #[serde(default)]
    pub options: Map<String, Value>,
    /// Validators run against the captures once the query matches.
    #[serde(default)]
    pub validate: Vec<ValidatorSpec>,
}

/// A predicate placeholder, written as the value of `$check`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CheckSpec {
    Any,
    String,
    Number,
    Integer,
    Bool,
    /// A string matching the (unanchored) regular expression.
    Regex(String),
    /// A scalar equal to one of the listed values.
    OneOf(Vec<Value>),
}

/// A declarative post-match validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidatorSpec {
    /// The captured term equals the session value at `session_key`.
    RefEqualsSession {
        #[serde(rename = "ref")]
        ref_name: String,
        /// Dotted path into the session, e.g. `user.herdId`.
        session_key: String,
    },
    /// The captured term equals one element of the session array at
    /// `session_key`.
    RefInSession {
        #[serde(rename = "ref")]
        ref_name: String,
        session_key: String,
    },
}
