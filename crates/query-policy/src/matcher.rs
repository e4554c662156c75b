//! Structural matching of query terms against whitelist patterns.
//!
//! Drivers number function parameters from a client-side counter, so the
//! same query built twice rarely carries the same variable ids. Matching a
//! `FUNC` node binds each pattern id to the id found at the same position in
//! the query; a `VAR` node then matches only the id its pattern id was bound
//! to.

use std::collections::{BTreeMap, HashMap};

use reql_term::{proto, Operation, Term};

use crate::error::PatternError;
use crate::pattern::{param_ids, OpPattern, Pattern, Refs, Session};

/// State of a single match attempt of one whitelist entry.
///
/// Both the captures and the variable-id bindings start empty for every
/// entry tried, so nothing leaks between entries.
pub struct MatchContext<'s> {
    session: &'s Session,
    refs: Refs,
    var_ids: HashMap<i64, i64>,
}

impl<'s> MatchContext<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self {
            session,
            refs: Refs::new(),
            var_ids: HashMap::new(),
        }
    }

    pub fn refs(&self) -> &Refs {
        &self.refs
    }

    pub fn into_refs(self) -> Refs {
        self.refs
    }

    /// Whether `actual` is covered by `pattern`.
    ///
    /// Errors only when the pattern itself is unusable for this query, which
    /// callers treat as a non-match for the entry.
    pub fn matches(&mut self, pattern: &Pattern, actual: &Term) -> Result<bool, PatternError> {
        match (pattern, actual) {
            (Pattern::Check(check), _) => Ok(check.call(actual, &mut self.refs, self.session)),
            (Pattern::Op(pattern), Term::Op(actual)) => self.matches_op(pattern, actual),
            (Pattern::Object(pattern), Term::Object(actual)) => self.matches_map(pattern, actual),
            (Pattern::Scalar(expected), _) => Ok(expected.scalar_eq(actual)),
            _ => Ok(false),
        }
    }

    /// Match a map of option patterns against actual options: same key set,
    /// every value matching.
    pub fn matches_map(
        &mut self,
        pattern: &BTreeMap<String, Pattern>,
        actual: &BTreeMap<String, Term>,
    ) -> Result<bool, PatternError> {
        if pattern.len() != actual.len() || !pattern.keys().eq(actual.keys()) {
            return Ok(false);
        }
        for (key, expected) in pattern {
            if !self.matches(expected, &actual[key])? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn matches_seq(&mut self, pattern: &[Pattern], actual: &[Term]) -> Result<bool, PatternError> {
        if pattern.len() != actual.len() {
            return Ok(false);
        }
        for (expected, term) in pattern.iter().zip(actual) {
            if !self.matches(expected, term)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn matches_op(&mut self, pattern: &OpPattern, actual: &Operation) -> Result<bool, PatternError> {
        if pattern.term_id != actual.term_id {
            return Ok(false);
        }
        if !self.matches_map(&pattern.options, &actual.options)? {
            return Ok(false);
        }
        match pattern.term_id {
            proto::FUNC => self.matches_func(pattern, actual),
            proto::VAR => Ok(self.matches_var(pattern, actual)),
            _ => self.matches_seq(&pattern.args, &actual.args),
        }
    }

    fn matches_func(
        &mut self,
        pattern: &OpPattern,
        actual: &Operation,
    ) -> Result<bool, PatternError> {
        let Some(expected_ids) = pattern.args.first().and_then(param_ids) else {
            return Ok(false);
        };
        let Some(actual_ids) = actual.args.first().and_then(term_param_ids) else {
            return Ok(false);
        };
        if expected_ids.len() != actual_ids.len() {
            return Ok(false);
        }
        for (expected, found) in expected_ids.into_iter().zip(actual_ids) {
            if self.var_ids.insert(expected, found).is_some() {
                return Err(PatternError::DuplicateBinding(expected));
            }
        }
        self.matches_seq(&pattern.args[1..], &actual.args[1..])
    }

    fn matches_var(&self, pattern: &OpPattern, actual: &Operation) -> bool {
        if pattern.args.len() != actual.args.len() {
            return false;
        }
        pattern.args.iter().zip(&actual.args).all(|(expected, found)| {
            let Pattern::Scalar(expected) = expected else {
                return false;
            };
            match expected.as_i64().and_then(|id| self.var_ids.get(&id)) {
                Some(bound) => found.as_i64() == Some(*bound),
                None => false,
            }
        })
    }
}

fn term_param_ids(term: &Term) -> Option<Vec<i64>> {
    match term {
        Term::Op(op) if op.term_id == proto::MAKE_ARRAY && op.options.is_empty() => {
            op.args.iter().map(Term::as_i64).collect()
        }
        _ => None,
    }
}
