use proptest::prelude::*;
use reql_term::{decode, encode};
use serde_json::{json, Map, Value};

fn wire_term() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 48, 4, |inner| {
        prop_oneof![
            (
                1i64..200,
                prop::collection::vec(inner.clone(), 0..4),
                prop::collection::btree_map("[a-z]{1,4}", inner.clone(), 0..3),
            )
                .prop_map(|(id, args, opts)| {
                    let mut parts = vec![json!(id), Value::Array(args)];
                    if !opts.is_empty() {
                        parts.push(Value::Object(opts.into_iter().collect::<Map<_, _>>()));
                    }
                    Value::Array(parts)
                }),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn decode_encode_roundtrip(wire in wire_term()) {
        let term = decode(&wire).unwrap();
        let again = decode(&encode(&term)).unwrap();
        prop_assert_eq!(term, again);
    }

    #[test]
    fn encode_reproduces_decodable_json(wire in wire_term()) {
        let term = decode(&wire).unwrap();
        prop_assert_eq!(encode(&term), wire);
    }
}
