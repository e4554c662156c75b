use futures_util::future::join_all;
use reql_term::{MalformedQuery, ParsedQuery, QueryType};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::decision::{CommandDecision, QueryDecision};
use crate::error::WhitelistError;
use crate::matcher::MatchContext;
use crate::pattern::{QueryPattern, Refs, Session};

/// An ordered set of query patterns. Order carries no meaning for the
/// decision; it only picks which name is reported when several entries
/// match.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    patterns: Vec<QueryPattern>,
}

impl Whitelist {
    /// Build a whitelist, rejecting entries that could never be evaluated.
    pub fn new(patterns: impl IntoIterator<Item = QueryPattern>) -> Result<Self, WhitelistError> {
        let patterns: Vec<QueryPattern> = patterns.into_iter().collect();
        for (index, pattern) in patterns.iter().enumerate() {
            pattern.check_bindings().map_err(|source| WhitelistError {
                index,
                name: pattern.name().map(str::to_string),
                source,
            })?;
        }
        Ok(Self { patterns })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryPattern> {
        self.patterns.iter()
    }
}

/// Decides whether client queries may be forwarded to the database.
///
/// Immutable after construction and shared by every connection.
#[derive(Debug)]
pub struct QueryAuthorizer {
    whitelist: Whitelist,
    unsafely_allow_any: bool,
}

impl QueryAuthorizer {
    pub fn new(whitelist: Whitelist, unsafely_allow_any: bool) -> Self {
        if unsafely_allow_any {
            warn!("unsafely_allow_any_query is set; every query will be forwarded");
        }
        Self {
            whitelist,
            unsafely_allow_any,
        }
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    pub fn unsafely_allows_any(&self) -> bool {
        self.unsafely_allow_any
    }

    /// Authorize a START query.
    ///
    /// Every entry is tried with fresh captures and variable bindings.
    /// Validators of all structurally matching entries run concurrently, and
    /// the query is allowed if any entry matches with all of its validators
    /// passing.
    pub async fn is_authorized(&self, query: &ParsedQuery, session: &Session) -> QueryDecision {
        debug!(query = %query.term, "evaluating query against whitelist");

        let mut candidates: Vec<(usize, Refs)> = Vec::new();
        for (index, pattern) in self.whitelist.iter().enumerate() {
            let mut ctx = MatchContext::new(session);
            let structural = ctx.matches(pattern.query(), &query.term).and_then(|ok| {
                if ok {
                    ctx.matches_map(pattern.options(), &query.options)
                } else {
                    Ok(false)
                }
            });
            match structural {
                Ok(true) => {
                    trace!(entry = %entry_label(pattern, index), "whitelist entry matched structurally");
                    candidates.push((index, ctx.into_refs()));
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        entry = %entry_label(pattern, index),
                        error = %err,
                        "whitelist entry failed to evaluate; treating as non-match"
                    );
                }
            }
        }

        let validated = join_all(candidates.into_iter().map(|(index, refs)| async move {
            let pattern = &self.whitelist.patterns[index];
            let results = join_all(pattern.validators().iter().map(|v| v.call(&refs, session))).await;
            (index, results.into_iter().all(|ok| ok))
        }))
        .await;

        let matched = validated.into_iter().find(|(_, ok)| *ok).map(|(index, _)| index);
        match matched {
            Some(index) => {
                let label = entry_label(&self.whitelist.patterns[index], index);
                let reason = format!("matched whitelist entry '{label}'");
                QueryDecision::allow(Some(label), reason)
            }
            None if self.unsafely_allow_any => {
                QueryDecision::allow(None, "not whitelisted; allowed by unsafely_allow_any_query")
            }
            None => QueryDecision::deny("no whitelist entry matched"),
        }
    }

    /// Authorize one raw query message: the JSON payload of a framed query,
    /// `[type, query?, options?]`.
    ///
    /// Control messages are allowed without consulting the whitelist.
    pub async fn authorize_command(
        &self,
        payload: &[u8],
        session: &Session,
    ) -> Result<CommandDecision, MalformedQuery> {
        let message: Value = serde_json::from_slice(payload)
            .map_err(|e| MalformedQuery::new(format!("invalid JSON: {e}")))?;
        let Value::Array(parts) = message else {
            return Err(MalformedQuery::new("query message must be an array"));
        };
        if parts.is_empty() || parts.len() > 3 {
            return Err(MalformedQuery::new(format!(
                "query message must have 1 to 3 elements, got {}",
                parts.len()
            )));
        }
        let query_type = parts[0]
            .as_i64()
            .and_then(QueryType::from_wire)
            .ok_or_else(|| MalformedQuery::new(format!("invalid query type {}", parts[0])))?;

        if query_type != QueryType::Start {
            if parts.len() > 1 {
                return Err(MalformedQuery::new(format!(
                    "{query_type} message must not carry a query"
                )));
            }
            return Ok(CommandDecision::control(query_type));
        }

        let query = parts
            .get(1)
            .ok_or_else(|| MalformedQuery::new("START message without a query"))?;
        let parsed = ParsedQuery::decode(query, parts.get(2))?;
        let decision = self.is_authorized(&parsed, session).await;
        Ok(CommandDecision {
            query_type,
            query: Some(parsed),
            decision,
        })
    }
}

fn entry_label(pattern: &QueryPattern, index: usize) -> String {
    match pattern.name() {
        Some(name) => name.to_string(),
        None => format!("#{index}"),
    }
}
