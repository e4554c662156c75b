//! Whitelist files.
//!
//! Loading parses the YAML document, checks its header and entry names and
//! compiles every entry, so a whitelist that loads is one the authorizer can
//! evaluate. Errors name the file and the offending entry.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::authorizer::Whitelist;
use crate::schema::WhitelistConfig;

/// The only whitelist document version understood.
pub const WHITELIST_VERSION: &str = "1.0";

impl Whitelist {
    /// Read and compile a whitelist file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read whitelist file {}", path.display()))?;
        Self::from_yaml(&yaml).with_context(|| format!("invalid whitelist file {}", path.display()))
    }

    /// Compile a whitelist document held in memory.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_config(&parse_whitelist(yaml)?)
    }
}

/// Parse a whitelist document without compiling its queries.
pub fn parse_whitelist(yaml: &str) -> Result<WhitelistConfig> {
    let config: WhitelistConfig =
        serde_yml::from_str(yaml).context("whitelist does not match the expected schema")?;
    if config.version != WHITELIST_VERSION {
        bail!(
            "whitelist version '{}' is not supported (expected '{WHITELIST_VERSION}')",
            config.version
        );
    }
    check_names(&config)?;
    Ok(config)
}

/// Names identify entries in decisions and audit records, so they must be
/// present and distinct.
fn check_names(config: &WhitelistConfig) -> Result<()> {
    let mut first_use: HashMap<&str, usize> = HashMap::new();
    for (index, spec) in config.patterns.iter().enumerate() {
        let name = spec.name.trim();
        if name.is_empty() {
            bail!("whitelist entry #{index} has no name");
        }
        if let Some(first) = first_use.insert(name, index) {
            bail!("whitelist entry #{index} reuses the name '{name}' of entry #{first}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use reql_term::ParsedQuery;
    use serde_json::json;

    use super::*;
    use crate::QueryAuthorizer;

    const TURTLES: &str = r#"
version: "1.0"
patterns:
  - name: all-turtles
    query: [15, ["turtles"]]
    options:
      db: [14, ["test"]]
  - name: turtle-by-id
    query: [16, [[15, ["turtles"]], {"$check": "string"}]]
"#;

    fn decide(query: serde_json::Value, options: Option<&serde_json::Value>) -> ParsedQuery {
        ParsedQuery::decode(&query, options).unwrap()
    }

    #[tokio::test]
    async fn loaded_file_authorizes_queries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TURTLES.as_bytes()).unwrap();

        let whitelist = Whitelist::load(file.path()).unwrap();
        assert_eq!(whitelist.len(), 2);
        let names: Vec<_> = whitelist.iter().filter_map(|p| p.name()).collect();
        assert_eq!(names, ["all-turtles", "turtle-by-id"]);

        let auth = QueryAuthorizer::new(whitelist, false);
        let session = json!({});
        let scan = decide(json!([15, ["turtles"]]), Some(&json!({"db": [14, ["test"]]})));
        let decision = auth.is_authorized(&scan, &session).await;
        assert_eq!(decision.matched_pattern.as_deref(), Some("all-turtles"));

        let scan_no_db = decide(json!([15, ["turtles"]]), None);
        assert!(!auth.is_authorized(&scan_no_db, &session).await.is_allowed());

        let get = decide(json!([16, [[15, ["turtles"]], "leo"]]), None);
        assert!(auth.is_authorized(&get, &session).await.is_allowed());
        let get_by_number = decide(json!([16, [[15, ["turtles"]], 4]]), None);
        assert!(!auth.is_authorized(&get_by_number, &session).await.is_allowed());
    }

    #[test]
    fn unsupported_version_is_named() {
        let err = parse_whitelist("version: \"2.0\"\npatterns: []\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "whitelist version '2.0' is not supported (expected '1.0')"
        );
    }

    #[test]
    fn empty_document_is_an_empty_whitelist() {
        let whitelist = Whitelist::from_yaml("version: \"1.0\"\n").unwrap();
        assert!(whitelist.is_empty());
    }

    #[test]
    fn reused_name_points_at_both_entries() {
        let yaml = r#"
version: "1.0"
patterns:
  - name: herd
    query: [15, ["herds"]]
  - name: turtles
    query: [15, ["turtles"]]
  - name: " herd "
    query: [15, ["herds"]]
"#;
        let err = parse_whitelist(yaml).unwrap_err();
        assert_eq!(
            err.to_string(),
            "whitelist entry #2 reuses the name 'herd' of entry #0"
        );
    }

    #[test]
    fn blank_name_is_rejected() {
        let yaml = "version: \"1.0\"\npatterns:\n  - name: \"  \"\n    query: [15, [\"t\"]]\n";
        let err = parse_whitelist(yaml).unwrap_err();
        assert!(err.to_string().contains("entry #0 has no name"), "{err}");
    }

    #[test]
    fn compile_errors_name_file_and_entry() {
        let yaml = r#"
version: "1.0"
patterns:
  - name: rebinds
    query: [24, [[69, [[2, [1]], [10, [1]]]], [69, [[2, [1]], [10, [1]]]]]]
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let err = format!("{:#}", Whitelist::load(file.path()).unwrap_err());
        assert!(err.contains("invalid whitelist file"), "{err}");
        assert!(err.contains("rebinds"), "{err}");
        assert!(err.contains("bound more than once"), "{err}");
    }

    #[test]
    fn missing_file_is_reported() {
        let err = Whitelist::load("/does/not/exist.yaml").unwrap_err();
        assert!(
            err.to_string().starts_with("failed to read whitelist file"),
            "{err}"
        );
    }
}
