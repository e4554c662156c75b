//! Conversion between wire JSON and [`Term`].

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::proto;
use crate::term::{Operation, Term};

/// Operations are encoded as arrays of at most this many elements.
const MAX_TERM_ARITY: usize = 3;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed query: {0}")]
pub struct MalformedQuery(pub String);

impl MalformedQuery {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Decode a wire JSON term.
///
/// Every JSON array is an operation `[term_id, args?, options?]`; literal
/// arrays travel as `MAKE_ARRAY` operations and so never decode to
/// [`Term::Array`].
pub fn decode(value: &Value) -> Result<Term, MalformedQuery> {
    match value {
        Value::Array(items) => decode_operation(items).map(Term::Op),
        Value::Object(map) => decode_object(map).map(Term::Object),
        Value::Null => Ok(Term::Null),
        Value::Bool(b) => Ok(Term::Bool(*b)),
        Value::Number(n) => Ok(Term::Number(n.clone())),
        Value::String(s) => Ok(Term::String(s.clone())),
    }
}

fn decode_operation(items: &[Value]) -> Result<Operation, MalformedQuery> {
    if items.len() > MAX_TERM_ARITY {
        return Err(MalformedQuery::new("too many array elements"));
    }
    let term_id = items
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| MalformedQuery::new("term id must be an integer"))?;

    let args = match items.get(1) {
        None => Vec::new(),
        Some(Value::Array(args)) => args.iter().map(decode).collect::<Result<_, _>>()?,
        Some(_) => return Err(MalformedQuery::new("invalid args type")),
    };

    let options = match items.get(2) {
        None => BTreeMap::new(),
        Some(Value::Object(opts)) => decode_object(opts)?,
        Some(_) => return Err(MalformedQuery::new("invalid options type")),
    };

    Ok(Operation {
        term_id,
        args,
        options,
    })
}

fn decode_object(map: &Map<String, Value>) -> Result<BTreeMap<String, Term>, MalformedQuery> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), decode(v)?)))
        .collect()
}

/// Encode a term back into wire JSON.
pub fn encode(term: &Term) -> Value {
    match term {
        Term::Op(op) => encode_operation(op),
        Term::Array(items) => Value::Array(vec![
            Value::from(proto::MAKE_ARRAY),
            Value::Array(items.iter().map(encode).collect()),
        ]),
        Term::Object(map) => Value::Object(encode_object(map)),
        Term::Null => Value::Null,
        Term::Bool(b) => Value::Bool(*b),
        Term::Number(n) => Value::Number(n.clone()),
        Term::String(s) => Value::String(s.clone()),
    }
}

fn encode_operation(op: &Operation) -> Value {
    let mut parts = vec![
        Value::from(op.term_id),
        Value::Array(op.args.iter().map(encode).collect()),
    ];
    if !op.options.is_empty() {
        parts.push(Value::Object(encode_object(&op.options)));
    }
    Value::Array(parts)
}

fn encode_object(map: &BTreeMap<String, Term>) -> Map<String, Value> {
    map.iter().map(|(k, v)| (k.clone(), encode(v))).collect()
}

/// A START query split into its term and its global options.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub term: Term,
    pub options: BTreeMap<String, Term>,
}

impl ParsedQuery {
    /// Decode the `query` and `queryOptions` parts of a START message.
    pub fn decode(query: &Value, options: Option<&Value>) -> Result<Self, MalformedQuery> {
        let term = decode(query)?;
        let options = match options {
            None => BTreeMap::new(),
            Some(Value::Object(map)) => decode_object(map)?,
            Some(_) => return Err(MalformedQuery::new("invalid query options type")),
        };
        Ok(Self { term, options })
    }

    /// The query as a single synthetic `QUERY` operation carrying the global
    /// options.
    pub fn wrapped(&self) -> Term {
        Term::Op(Operation {
            term_id: proto::QUERY,
            args: vec![self.term.clone()],
            options: self.options.clone(),
        })
    }

    /// Wire JSON of the query term, as a client would send it.
    pub fn query_json(&self) -> Value {
        encode(&self.term)
    }

    /// Wire JSON of the global options.
    pub fn options_json(&self) -> Value {
        Value::Object(encode_object(&self.options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_table_scan() {
        let term = decode(&json!([15, ["turtles"]])).unwrap();
        assert_eq!(term, Term::op(proto::TABLE, vec![Term::string("turtles")]));
    }

    #[test]
    fn decode_nested_options_and_objects() {
        let term = decode(&json!([78, [[15, ["t"]], "x"], {"index": "by_herd"}])).unwrap();
        let op = term.as_op().unwrap();
        assert_eq!(op.term_id, 78);
        assert_eq!(op.args.len(), 2);
        assert_eq!(op.options["index"], Term::string("by_herd"));

        let obj = decode(&json!({"a": [2, [1, 2]], "b": null})).unwrap();
        match obj {
            Term::Object(map) => {
                assert_eq!(map.len(), 2);
                assert!(map["a"].as_op().is_some());
                assert_eq!(map["b"], Term::Null);
            }
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_too_many_elements() {
        let err = decode(&json!([15, ["t"], {}, 4])).unwrap_err();
        assert!(err.to_string().contains("too many"), "{err}");
    }

    #[test]
    fn decode_rejects_non_array_args() {
        assert!(decode(&json!([15, "turtles"])).is_err());
        assert!(decode(&json!({"nested": [15, {"a": 1}]})).is_err());
    }

    #[test]
    fn decode_rejects_non_object_options() {
        assert!(decode(&json!([15, ["t"], ["index"]])).is_err());
    }

    #[test]
    fn decode_rejects_bad_term_id() {
        assert!(decode(&json!([])).is_err());
        assert!(decode(&json!(["TABLE", ["t"]])).is_err());
    }

    #[test]
    fn absent_and_empty_options_decode_alike() {
        assert_eq!(
            decode(&json!([15, ["t"]])).unwrap(),
            decode(&json!([15, ["t"], {}])).unwrap()
        );
        assert_eq!(decode(&json!([59])).unwrap(), Term::op(59, vec![]));
    }

    #[test]
    fn encode_array_as_make_array() {
        let value = encode(&Term::Array(vec![Term::int(1), Term::Bool(true)]));
        assert_eq!(value, json!([2, [1, true]]));
    }

    #[test]
    fn parsed_query_with_options() {
        let parsed =
            ParsedQuery::decode(&json!([15, ["turtles"]]), Some(&json!({"db": [14, ["test"]]})))
                .unwrap();
        assert_eq!(parsed.options["db"], Term::op(proto::DB, vec![Term::string("test")]));
        assert_eq!(parsed.options_json(), json!({"db": [14, ["test"]]}));

        let wrapped = parsed.wrapped();
        let op = wrapped.as_op().unwrap();
        assert_eq!(op.term_id, proto::QUERY);
        assert_eq!(op.args, vec![parsed.term.clone()]);
    }

    #[test]
    fn parsed_query_rejects_bad_options() {
        assert!(ParsedQuery::decode(&json!([15, ["t"]]), Some(&json!([1]))).is_err());
        assert!(ParsedQuery::decode(&json!([15, ["t"]]), Some(&Value::Null)).is_err());
        assert!(ParsedQuery::decode(&json!([15, ["t"]]), None).is_ok());
    }
}
