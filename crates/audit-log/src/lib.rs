//! Append-only JSON-lines audit log for the gateway.
//!
//! Every connection event and every query decision can be recorded as one
//! newline-terminated JSON object. Producers hold a cloneable [`AuditSink`];
//! a background task owns the file.
//!
//! ```rust,no_run
//! use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, _handle) = AuditSink::start("/var/log/reql-guard/audit.jsonl").await?;
//! sink.log(AuditEntry::new(
//!     AuditEventType::GatewayStarted,
//!     AuditSource::new("reql-guard"),
//!     serde_json::json!({"version": "0.1.0"}),
//! ))
//! .await;
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod sink;

pub use entry::{AuditEntry, AuditEventType, AuditSource, QueryRecord};
pub use sink::{AuditError, AuditSink};
