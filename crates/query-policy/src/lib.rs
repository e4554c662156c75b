//! # query-policy
//!
//! Whitelist authorization for database queries.  A whitelist is a set of
//! query patterns; a query is forwarded only if some pattern matches it
//! structurally and every validator attached to that pattern accepts the
//! captured values for the current session.
//!
//! Patterns are built either in code or from a YAML whitelist file.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use query_policy::{QueryAuthorizer, Whitelist};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let authorizer = QueryAuthorizer::new(Whitelist::load("whitelist.yaml")?, false);
//! let session = serde_json::json!({ "user": { "herdId": 7 } });
//! let decision = authorizer
//!     .authorize_command(br#"[1, [15, ["turtles"]], {}]"#, &session)
//!     .await?;
//! println!("{:?}", decision.decision);
//! # Ok(())
//! # }
//! ```

mod authorizer;
mod compile;
mod decision;
mod error;
pub mod loader;
pub mod matcher;
mod pattern;
mod schema;

pub use authorizer::{QueryAuthorizer, Whitelist};
pub use compile::compile_term;
pub use decision::{CommandDecision, DecisionAction, QueryDecision};
pub use error::{PatternError, WhitelistError};
pub use pattern::{Check, OpPattern, Pattern, QueryPattern, Refs, Session, Validator};
pub use schema::{CheckSpec, PatternSpec, ValidatorSpec, WhitelistConfig};
