//! Query terms of the RethinkDB JSON wire protocol.
//!
//! [`Term`] is the canonical in-memory form of a query syntax tree. The
//! [`codec`] module converts between it and the wire JSON a driver sends,
//! rejecting malformed shapes before anything downstream sees them. The
//! [`proto`] module holds the protocol's fixed constants.

pub mod codec;
pub mod proto;
mod term;

pub use codec::{decode, encode, MalformedQuery, ParsedQuery};
pub use proto::QueryType;
pub use term::{numbers_equal, Operation, Term};
