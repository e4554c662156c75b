//! Constants of the RethinkDB JSON wire protocol.
//!
//! The term-type table is the single source of truth for mapping between
//! numeric term ids and their names. The lookup maps are built once on first
//! use and never mutated afterwards.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Handshake magic for protocol version V0_4.
pub const VERSION_V0_4: u32 = 0x400c_2d20;

/// Handshake magic selecting the JSON payload encoding.
pub const PROTOCOL_JSON: u32 = 0x7e69_70c7;

/// Synthetic term id for the wrapper that pairs an outermost query with its
/// global options. No real term type uses 0.
pub const QUERY: i64 = 0;

pub const MAKE_ARRAY: i64 = 2;
pub const VAR: i64 = 10;
pub const DB: i64 = 14;
pub const TABLE: i64 = 15;
pub const GET: i64 = 16;
pub const FILTER: i64 = 39;
pub const FUNC: i64 = 69;

/// The `type` field of a client query message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Start,
    Continue,
    Stop,
    NoreplyWait,
}

impl QueryType {
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            1 => Some(QueryType::Start),
            2 => Some(QueryType::Continue),
            3 => Some(QueryType::Stop),
            4 => Some(QueryType::NoreplyWait),
            _ => None,
        }
    }

    pub fn wire_value(self) -> i64 {
        match self {
            QueryType::Start => 1,
            QueryType::Continue => 2,
            QueryType::Stop => 3,
            QueryType::NoreplyWait => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Start => "START",
            QueryType::Continue => "CONTINUE",
            QueryType::Stop => "STOP",
            QueryType::NoreplyWait => "NOREPLY_WAIT",
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const TERM_TYPES: &[(&str, i64)] = &[
    ("QUERY", QUERY),
    ("DATUM", 1),
    ("MAKE_ARRAY", MAKE_ARRAY),
    ("MAKE_OBJ", 3),
    ("VAR", VAR),
    ("JAVASCRIPT", 11),
    ("ERROR", 12),
    ("IMPLICIT_VAR", 13),
    ("DB", DB),
    ("TABLE", TABLE),
    ("GET", GET),
    ("EQ", 17),
    ("NE", 18),
    ("LT", 19),
    ("LE", 20),
    ("GT", 21),
    ("GE", 22),
    ("NOT", 23),
    ("ADD", 24),
    ("SUB", 25),
    ("MUL", 26),
    ("DIV", 27),
    ("MOD", 28),
    ("APPEND", 29),
    ("SLICE", 30),
    ("GET_FIELD", 31),
    ("HAS_FIELDS", 32),
    ("PLUCK", 33),
    ("WITHOUT", 34),
    ("MERGE", 35),
    ("BETWEEN_DEPRECATED", 36),
    ("REDUCE", 37),
    ("MAP", 38),
    ("FILTER", FILTER),
    ("CONCAT_MAP", 40),
    ("ORDER_BY", 41),
    ("DISTINCT", 42),
    ("COUNT", 43),
    ("UNION", 44),
    ("NTH", 45),
    ("INNER_JOIN", 48),
    ("OUTER_JOIN", 49),
    ("EQ_JOIN", 50),
    ("COERCE_TO", 51),
    ("TYPE_OF", 52),
    ("UPDATE", 53),
    ("DELETE", 54),
    ("REPLACE", 55),
    ("INSERT", 56),
    ("DB_CREATE", 57),
    ("DB_DROP", 58),
    ("DB_LIST", 59),
    ("TABLE_CREATE", 60),
    ("TABLE_DROP", 61),
    ("TABLE_LIST", 62),
    ("FUNCALL", 64),
    ("BRANCH", 65),
    ("OR", 66),
    ("AND", 67),
    ("FOR_EACH", 68),
    ("FUNC", FUNC),
    ("SKIP", 70),
    ("LIMIT", 71),
    ("ZIP", 72),
    ("ASC", 73),
    ("DESC", 74),
    ("INDEX_CREATE", 75),
    ("INDEX_DROP", 76),
    ("INDEX_LIST", 77),
    ("GET_ALL", 78),
    ("INFO", 79),
    ("PREPEND", 80),
    ("SAMPLE", 81),
    ("INSERT_AT", 82),
    ("DELETE_AT", 83),
    ("CHANGE_AT", 84),
    ("SPLICE_AT", 85),
    ("IS_EMPTY", 86),
    ("OFFSETS_OF", 87),
    ("SET_INSERT", 88),
    ("SET_INTERSECTION", 89),
    ("SET_UNION", 90),
    ("SET_DIFFERENCE", 91),
    ("DEFAULT", 92),
    ("CONTAINS", 93),
    ("KEYS", 94),
    ("DIFFERENCE", 95),
    ("WITH_FIELDS", 96),
    ("MATCH", 97),
    ("JSON", 98),
    ("ISO8601", 99),
    ("TO_ISO8601", 100),
    ("EPOCH_TIME", 101),
    ("TO_EPOCH_TIME", 102),
    ("NOW", 103),
    ("IN_TIMEZONE", 104),
    ("DURING", 105),
    ("DATE", 106),
    ("MONDAY", 107),
    ("TUESDAY", 108),
    ("WEDNESDAY", 109),
    ("THURSDAY", 110),
    ("FRIDAY", 111),
    ("SATURDAY", 112),
    ("SUNDAY", 113),
    ("JANUARY", 114),
    ("FEBRUARY", 115),
    ("MARCH", 116),
    ("APRIL", 117),
    ("MAY", 118),
    ("JUNE", 119),
    ("JULY", 120),
    ("AUGUST", 121),
    ("SEPTEMBER", 122),
    ("OCTOBER", 123),
    ("NOVEMBER", 124),
    ("DECEMBER", 125),
    ("TIME_OF_DAY", 126),
    ("TIMEZONE", 127),
    ("YEAR", 128),
    ("MONTH", 129),
    ("DAY", 130),
    ("DAY_OF_WEEK", 131),
    ("DAY_OF_YEAR", 132),
    ("HOURS", 133),
    ("MINUTES", 134),
    ("SECONDS", 135),
    ("TIME", 136),
    ("LITERAL", 137),
    ("SYNC", 138),
    ("INDEX_STATUS", 139),
    ("INDEX_WAIT", 140),
    ("UPCASE", 141),
    ("DOWNCASE", 142),
    ("OBJECT", 143),
    ("GROUP", 144),
    ("SUM", 145),
    ("AVG", 146),
    ("MIN", 147),
    ("MAX", 148),
    ("SPLIT", 149),
    ("UNGROUP", 150),
    ("RANDOM", 151),
    ("CHANGES", 152),
    ("HTTP", 153),
    ("ARGS", 154),
    ("BINARY", 155),
    ("INDEX_RENAME", 156),
    ("GEOJSON", 157),
    ("TO_GEOJSON", 158),
    ("POINT", 159),
    ("LINE", 160),
    ("POLYGON", 161),
    ("DISTANCE", 162),
    ("INTERSECTS", 163),
    ("INCLUDES", 164),
    ("CIRCLE", 165),
    ("GET_INTERSECTING", 166),
    ("FILL", 167),
    ("GET_NEAREST", 168),
    ("UUID", 169),
    ("BRACKET", 170),
    ("POLYGON_SUB", 171),
    ("TO_JSON_STRING", 172),
    ("RANGE", 173),
    ("CONFIG", 174),
    ("STATUS", 175),
    ("RECONFIGURE", 176),
    ("WAIT", 177),
    ("REBALANCE", 179),
    ("MINVAL", 180),
    ("MAXVAL", 181),
    ("BETWEEN", 182),
    ("FLOOR", 183),
    ("CEIL", 184),
    ("ROUND", 185),
    ("VALUES", 186),
    ("FOLD", 187),
    ("GRANT", 188),
    ("SET_WRITE_HOOK", 189),
    ("GET_WRITE_HOOK", 190),
    ("BIT_AND", 191),
    ("BIT_OR", 192),
    ("BIT_XOR", 193),
    ("BIT_NOT", 194),
    ("BIT_SAL", 195),
    ("BIT_SAR", 196),
];

struct TermTable {
    by_id: HashMap<i64, &'static str>,
    by_name: HashMap<&'static str, i64>,
}

fn table() -> &'static TermTable {
    static TABLE_CELL: OnceLock<TermTable> = OnceLock::new();
    TABLE_CELL.get_or_init(|| TermTable {
        by_id: TERM_TYPES.iter().map(|&(name, id)| (id, name)).collect(),
        by_name: TERM_TYPES.iter().copied().collect(),
    })
}

/// Name of a term type, e.g. `TABLE` for 15.
pub fn term_name(term_id: i64) -> Option<&'static str> {
    table().by_id.get(&term_id).copied()
}

/// Numeric id of a term type by its name. Lookup is case-insensitive.
pub fn term_id(name: &str) -> Option<i64> {
    let upper = name.to_ascii_uppercase();
    table().by_name.get(upper.as_str()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_ids_are_inverse() {
        for &(name, id) in TERM_TYPES {
            assert_eq!(term_name(id), Some(name));
            assert_eq!(term_id(name), Some(id));
        }
    }

    #[test]
    fn ids_are_unique() {
        let mut ids: Vec<i64> = TERM_TYPES.iter().map(|&(_, id)| id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), TERM_TYPES.len());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(term_id("table"), Some(TABLE));
        assert_eq!(term_id("Func"), Some(FUNC));
        assert_eq!(term_id("no_such_term"), None);
    }

    #[test]
    fn query_type_wire_values() {
        assert_eq!(QueryType::from_wire(1), Some(QueryType::Start));
        assert_eq!(QueryType::from_wire(4), Some(QueryType::NoreplyWait));
        assert_eq!(QueryType::from_wire(5), None);
        assert_eq!(QueryType::Stop.wire_value(), 3);
        assert_eq!(QueryType::Continue.to_string(), "CONTINUE");
    }
}
