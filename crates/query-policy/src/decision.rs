use reql_term::{ParsedQuery, QueryType};

/// The outcome of authorizing one query against the whitelist.
#[derive(Debug, Clone)]
pub struct QueryDecision {
    pub action: DecisionAction,
    /// Name of the whitelist entry that matched, if any. Unnamed entries
    /// are reported by position, e.g. `#3`.
    pub matched_pattern: Option<String>,
    /// Human-readable reason explaining the decision.
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionAction {
    Allow,
    Deny,
}

impl DecisionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionAction::Allow => "allow",
            DecisionAction::Deny => "deny",
        }
    }
}

impl QueryDecision {
    pub fn allow(matched_pattern: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Allow,
            matched_pattern,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Deny,
            matched_pattern: None,
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.action == DecisionAction::Allow
    }
}

/// The decision for a whole query message, together with what was parsed
/// from it.
#[derive(Debug, Clone)]
pub struct CommandDecision {
    pub query_type: QueryType,
    /// The parsed query; present for START messages only.
    pub query: Option<ParsedQuery>,
    pub decision: QueryDecision,
}

impl CommandDecision {
    /// Control messages (CONTINUE, STOP, NOREPLY_WAIT) carry no query and
    /// are always forwarded.
    pub fn control(query_type: QueryType) -> Self {
        Self {
            query_type,
            query: None,
            decision: QueryDecision::allow(None, format!("{query_type} carries no query")),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_and_deny_constructors() {
        let d = QueryDecision::allow(Some("turtles".into()), "matched");
        assert!(d.is_allowed());
        assert_eq!(d.matched_pattern.as_deref(), Some("turtles"));

        let d = QueryDecision::deny("no whitelist entry matched");
        assert_eq!(d.action, DecisionAction::Deny);
        assert!(d.matched_pattern.is_none());
        assert_eq!(d.action.as_str(), "deny");
    }

    #[test]
    fn control_messages_are_allowed() {
        let d = CommandDecision::control(QueryType::Stop);
        assert!(d.is_allowed());
        assert!(d.query.is_none());
        assert_eq!(d.decision.reason, "STOP carries no query");
    }
}
