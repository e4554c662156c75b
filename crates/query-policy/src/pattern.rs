use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use reql_term::{proto, Term};

use crate::error::PatternError;

/// Per-connection state handed to checks and validators. Opaque to the
/// gateway; produced by the configured session creator.
pub type Session = serde_json::Value;

/// Terms captured during one match attempt, keyed by capture name.
pub type Refs = BTreeMap<String, Term>;

type PredicateFn = dyn Fn(&Term, &mut Refs, &Session) -> bool + Send + Sync;
type ValidateFn = dyn Fn(&Refs, &Session) -> BoxFuture<'static, bool> + Send + Sync;

/// A node of a whitelist pattern tree.
///
/// Literal variants mirror [`Term`] and match only an identical term;
/// [`Pattern::Check`] matches whatever its predicate accepts. Arrays are
/// written as `MAKE_ARRAY` operations, as on the wire.
#[derive(Clone, Debug)]
pub enum Pattern {
    Op(OpPattern),
    Object(BTreeMap<String, Pattern>),
    /// A scalar term: null, bool, number or string.
    Scalar(Term),
    Check(Check),
}

/// Literal operation node of a pattern.
#[derive(Clone, Debug)]
pub struct OpPattern {
    pub term_id: i64,
    pub args: Vec<Pattern>,
    pub options: BTreeMap<String, Pattern>,
}

impl OpPattern {
    pub fn new(term_id: i64, args: impl IntoIterator<Item = Pattern>) -> Self {
        Self {
            term_id,
            args: args.into_iter().collect(),
            options: BTreeMap::new(),
        }
    }

    /// Add an optional argument to the operation, e.g. `index` on `GET_ALL`.
    pub fn optarg(mut self, key: impl Into<String>, value: impl Into<Pattern>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

impl From<OpPattern> for Pattern {
    fn from(op: OpPattern) -> Self {
        Pattern::Op(op)
    }
}

/// A predicate node. The predicate receives the actual term, the capture
/// map of the current attempt and the session; it must be synchronous.
#[derive(Clone)]
pub struct Check {
    label: String,
    predicate: Arc<PredicateFn>,
}

impl Check {
    pub fn new<F>(label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Term, &mut Refs, &Session) -> bool + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn call(&self, actual: &Term, refs: &mut Refs, session: &Session) -> bool {
        (self.predicate)(actual, refs, session)
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Check({})", self.label)
    }
}

impl Pattern {
    pub fn op(term_id: i64, args: impl IntoIterator<Item = Pattern>) -> Self {
        Pattern::Op(OpPattern::new(term_id, args))
    }

    /// Build an operation by term-type name, e.g. `Pattern::term("TABLE", ...)`.
    pub fn term(name: &str, args: impl IntoIterator<Item = Pattern>) -> Result<Self, PatternError> {
        let term_id =
            proto::term_id(name).ok_or_else(|| PatternError::UnknownTerm(name.to_string()))?;
        Ok(Pattern::op(term_id, args))
    }

    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Pattern)>) -> Self {
        Pattern::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn db(name: &str) -> Self {
        Pattern::op(proto::DB, [Pattern::from(name)])
    }

    /// `TABLE(name)`.
    pub fn table(name: &str) -> Self {
        Pattern::op(proto::TABLE, [Pattern::from(name)])
    }

    /// An anonymous function declaring `var_ids`, as drivers encode it:
    /// `FUNC(MAKE_ARRAY(ids...), body)`.
    pub fn func(var_ids: impl IntoIterator<Item = i64>, body: Pattern) -> Self {
        let params = Pattern::op(
            proto::MAKE_ARRAY,
            var_ids.into_iter().map(|id| Pattern::Scalar(Term::int(id))),
        );
        Pattern::op(proto::FUNC, [params, body])
    }

    /// A read of a function parameter declared by an enclosing [`Pattern::func`].
    pub fn var(var_id: i64) -> Self {
        Pattern::op(proto::VAR, [Pattern::Scalar(Term::int(var_id))])
    }

    /// Match any term accepted by `predicate`.
    pub fn check<F>(predicate: F) -> Self
    where
        F: Fn(&Term, &mut Refs, &Session) -> bool + Send + Sync + 'static,
    {
        Pattern::Check(Check::new("check", predicate))
    }

    /// Match any term and record it in the refs under `name`.
    pub fn capture(name: impl Into<String>) -> Self {
        let name = name.into();
        let label = format!("ref:{name}");
        Pattern::Check(Check::new(label, move |actual: &Term, refs: &mut Refs, _: &Session| {
            refs.insert(name.clone(), actual.clone());
            true
        }))
    }

    /// The pattern that matches exactly `term`.
    pub fn literal(term: &Term) -> Self {
        match term {
            Term::Op(op) => Pattern::Op(OpPattern {
                term_id: op.term_id,
                args: op.args.iter().map(Pattern::literal).collect(),
                options: op
                    .options
                    .iter()
                    .map(|(k, v)| (k.clone(), Pattern::literal(v)))
                    .collect(),
            }),
            Term::Array(items) => Pattern::op(proto::MAKE_ARRAY, items.iter().map(Pattern::literal)),
            Term::Object(map) => Pattern::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Pattern::literal(v)))
                    .collect(),
            ),
            scalar => Pattern::Scalar(scalar.clone()),
        }
    }
}

impl From<&Term> for Pattern {
    fn from(term: &Term) -> Self {
        Pattern::literal(term)
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Pattern::Scalar(Term::string(s))
    }
}

impl From<i64> for Pattern {
    fn from(n: i64) -> Self {
        Pattern::Scalar(Term::int(n))
    }
}

impl From<bool> for Pattern {
    fn from(b: bool) -> Self {
        Pattern::Scalar(Term::Bool(b))
    }
}

/// A post-match validator, run with the captures of a successful match.
#[derive(Clone)]
pub struct Validator(Arc<ValidateFn>);

impl Validator {
    pub(crate) fn call(&self, refs: &Refs, session: &Session) -> BoxFuture<'static, bool> {
        (self.0)(refs, session)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Validator")
    }
}

/// One whitelist entry: a query pattern plus the global options it expects
/// and the validators that must all pass once it matches.
#[derive(Clone, Debug)]
pub struct QueryPattern {
    name: Option<String>,
    query: Pattern,
    options: BTreeMap<String, Pattern>,
    validators: Vec<Validator>,
}

impl QueryPattern {
    pub fn new(query: impl Into<Pattern>) -> Self {
        Self {
            name: None,
            query: query.into(),
            options: BTreeMap::new(),
            validators: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declare a global query option the incoming query must carry, e.g.
    /// `.opt("db", Pattern::db("test"))`.
    pub fn opt(mut self, key: impl Into<String>, value: impl Into<Pattern>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn validate<F>(mut self, validate: F) -> Self
    where
        F: Fn(&Refs, &Session) -> bool + Send + Sync + 'static,
    {
        self.validators.push(Validator(Arc::new(
            move |refs: &Refs, session: &Session| -> BoxFuture<'static, bool> {
                let ok = validate(refs, session);
                Box::pin(std::future::ready(ok))
            },
        )));
        self
    }

    /// Like [`validate`](Self::validate) for validators that need to await,
    /// e.g. on an external lookup. The closure gets owned copies of the refs
    /// and session.
    pub fn validate_async<F, Fut>(mut self, validate: F) -> Self
    where
        F: Fn(Refs, Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.validators.push(Validator(Arc::new(
            move |refs: &Refs, session: &Session| -> BoxFuture<'static, bool> {
                Box::pin(validate(refs.clone(), session.clone()))
            },
        )));
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn query(&self) -> &Pattern {
        &self.query
    }

    pub fn options(&self) -> &BTreeMap<String, Pattern> {
        &self.options
    }

    pub(crate) fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// Reject patterns that declare the same function variable id twice.
    /// Matching binds every declared id once per attempt, so such a pattern
    /// could never evaluate.
    pub fn check_bindings(&self) -> Result<(), PatternError> {
        let mut seen = HashSet::new();
        collect_bindings(&self.query, &mut seen)?;
        for value in self.options.values() {
            collect_bindings(value, &mut seen)?;
        }
        Ok(())
    }
}

impl From<Pattern> for QueryPattern {
    fn from(query: Pattern) -> Self {
        QueryPattern::new(query)
    }
}

fn collect_bindings(pattern: &Pattern, seen: &mut HashSet<i64>) -> Result<(), PatternError> {
    match pattern {
        Pattern::Op(op) => {
            if op.term_id == proto::FUNC {
                if let Some(ids) = op.args.first().and_then(param_ids) {
                    for id in ids {
                        if !seen.insert(id) {
                            return Err(PatternError::DuplicateBinding(id));
                        }
                    }
                }
            }
            for arg in &op.args {
                collect_bindings(arg, seen)?;
            }
            for value in op.options.values() {
                collect_bindings(value, seen)?;
            }
            Ok(())
        }
        Pattern::Object(map) => map.values().try_for_each(|p| collect_bindings(p, seen)),
        Pattern::Scalar(_) | Pattern::Check(_) => Ok(()),
    }
}

/// Variable ids of a `MAKE_ARRAY(int, ...)` parameter list, or `None` if
/// the node has any other shape.
pub(crate) fn param_ids(pattern: &Pattern) -> Option<Vec<i64>> {
    match pattern {
        Pattern::Op(op) if op.term_id == proto::MAKE_ARRAY && op.options.is_empty() => op
            .args
            .iter()
            .map(|arg| match arg {
                Pattern::Scalar(term) => term.as_i64(),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}
