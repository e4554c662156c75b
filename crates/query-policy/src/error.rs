use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatternError {
    /// A function variable id was bound twice within one match attempt.
    #[error("variable id {0} is bound more than once in the same pattern")]
    DuplicateBinding(i64),

    #[error("unknown term type '{0}'")]
    UnknownTerm(String),
}

/// A whitelist entry rejected while building a [`Whitelist`](crate::Whitelist).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("whitelist entry {index} ({}): {source}", .name.as_deref().unwrap_or("unnamed"))]
pub struct WhitelistError {
    pub index: usize,
    pub name: Option<String>,
    #[source]
    pub source: PatternError,
}
