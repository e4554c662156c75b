//! Compilation of a [`WhitelistConfig`] into matchable [`QueryPattern`]s.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use reql_term::{decode, encode, Term};
use serde_json::{Map, Value};

use crate::authorizer::Whitelist;
use crate::pattern::{Check, OpPattern, Pattern, QueryPattern, Refs, Session};
use crate::schema::{CheckSpec, PatternSpec, ValidatorSpec, WhitelistConfig};

const REF_KEY: &str = "$ref";
const CHECK_KEY: &str = "$check";

impl Whitelist {
    /// Compile every entry of a loaded whitelist file.
    ///
    /// Regular expressions are compiled eagerly; an invalid one, a malformed
    /// query term or an unusable function binding fails the whole file.
    pub fn from_config(config: &WhitelistConfig) -> Result<Self> {
        let patterns = config
            .patterns
            .iter()
            .map(|spec| {
                compile_entry(spec)
                    .with_context(|| format!("failed to compile whitelist entry '{}'", spec.name))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Whitelist::new(patterns)?)
    }
}

fn compile_entry(spec: &PatternSpec) -> Result<QueryPattern> {
    let mut pattern = QueryPattern::new(compile_term(&spec.query)?).named(&spec.name);
    for (key, value) in &spec.options {
        let option = compile_term(value).with_context(|| format!("in option '{key}'"))?;
        pattern = pattern.opt(key, option);
    }
    for validator in &spec.validate {
        pattern = add_validator(pattern, validator.clone());
    }
    Ok(pattern)
}

/// Compile one wire JSON term, honouring `$ref` and `$check` placeholders.
pub fn compile_term(value: &Value) -> Result<Pattern> {
    match value {
        Value::Array(items) => compile_operation(items).map(Pattern::Op),
        Value::Object(map) => {
            if let Some(placeholder) = compile_placeholder(map)? {
                return Ok(placeholder);
            }
            let entries = map
                .iter()
                .map(|(k, v)| Ok((k.clone(), compile_term(v)?)))
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok(Pattern::Object(entries))
        }
        scalar => Ok(Pattern::Scalar(decode(scalar)?)),
    }
}

fn compile_operation(items: &[Value]) -> Result<OpPattern> {
    if items.is_empty() || items.len() > 3 {
        bail!("operation must be [term_id, args?, options?]");
    }
    let term_id = items[0]
        .as_i64()
        .ok_or_else(|| anyhow!("term id must be an integer, got {}", items[0]))?;

    let args = match items.get(1) {
        None => Vec::new(),
        Some(Value::Array(args)) => args.iter().map(compile_term).collect::<Result<_>>()?,
        Some(other) => bail!("operation args must be an array, got {other}"),
    };
    let mut op = OpPattern::new(term_id, args);
    match items.get(2) {
        None => {}
        Some(Value::Object(options)) => {
            for (key, value) in options {
                op = op.optarg(key, compile_term(value)?);
            }
        }
        Some(other) => bail!("operation options must be an object, got {other}"),
    }
    Ok(op)
}

fn compile_placeholder(map: &Map<String, Value>) -> Result<Option<Pattern>> {
    if map.len() != 1 {
        return Ok(None);
    }
    if let Some(name) = map.get(REF_KEY) {
        let name = name
            .as_str()
            .ok_or_else(|| anyhow!("{REF_KEY} must name a capture"))?;
        return Ok(Some(Pattern::capture(name)));
    }
    if let Some(spec) = map.get(CHECK_KEY) {
        let spec: CheckSpec = serde_json::from_value(spec.clone())
            .with_context(|| format!("invalid {CHECK_KEY} placeholder: {spec}"))?;
        return compile_check(spec).map(|check| Some(Pattern::Check(check)));
    }
    Ok(None)
}

fn compile_check(spec: CheckSpec) -> Result<Check> {
    let check = match spec {
        CheckSpec::Any => Check::new("any", |_: &Term, _: &mut Refs, _: &Session| true),
        CheckSpec::String => Check::new("string", |t: &Term, _: &mut Refs, _: &Session| {
            matches!(t, Term::String(_))
        }),
        CheckSpec::Number => Check::new("number", |t: &Term, _: &mut Refs, _: &Session| {
            matches!(t, Term::Number(_))
        }),
        CheckSpec::Integer => Check::new("integer", |t: &Term, _: &mut Refs, _: &Session| {
            matches!(t, Term::Number(n) if n.is_i64() || n.is_u64())
        }),
        CheckSpec::Bool => Check::new("bool", |t: &Term, _: &mut Refs, _: &Session| {
            matches!(t, Term::Bool(_))
        }),
        CheckSpec::Regex(pattern) => {
            let regex = Regex::new(&pattern)
                .with_context(|| format!("invalid regex in $check: {pattern}"))?;
            Check::new(format!("regex:{pattern}"), move |t: &Term, _: &mut Refs, _: &Session| {
                t.as_str().is_some_and(|s| regex.is_match(s))
            })
        }
        CheckSpec::OneOf(values) => {
            Check::new("one_of", move |t: &Term, _: &mut Refs, _: &Session| {
                values.iter().any(|v| term_equals_json(t, v))
            })
        }
    };
    Ok(check)
}

fn add_validator(pattern: QueryPattern, spec: ValidatorSpec) -> QueryPattern {
    match spec {
        ValidatorSpec::RefEqualsSession {
            ref_name,
            session_key,
        } => pattern.validate(move |refs, session| {
            match (refs.get(&ref_name), session_value(session, &session_key)) {
                (Some(captured), Some(expected)) => term_equals_json(captured, expected),
                _ => false,
            }
        }),
        ValidatorSpec::RefInSession {
            ref_name,
            session_key,
        } => pattern.validate(move |refs, session| {
            let captured = refs.get(&ref_name);
            let allowed = session_value(session, &session_key).and_then(Value::as_array);
            match (captured, allowed) {
                (Some(captured), Some(allowed)) => {
                    allowed.iter().any(|v| term_equals_json(captured, v))
                }
                _ => false,
            }
        }),
    }
}

/// Look up a dotted path such as `user.herdId` in the session.
fn session_value<'a>(session: &'a Session, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(session, |value, part| value.get(part))
}

/// Compare a captured term with a plain JSON value. Scalars compare by value;
/// compound values compare by their wire encoding.
fn term_equals_json(term: &Term, value: &Value) -> bool {
    match value {
        Value::Array(_) | Value::Object(_) => encode(term) == *value,
        scalar => decode(scalar).is_ok_and(|expected| expected.scalar_eq(term)),
    }
}
