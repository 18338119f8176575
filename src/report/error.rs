use super::schema::EntityKind;

/// Errors surfaced by the report layer. Engine errors cannot show up here:
/// reports only ever read immutable snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    UnknownModule(String),
    DuplicateModule(String),
    /// A query or filter names a field the entity does not have.
    UnknownField { entity: EntityKind, field: String },
    /// The query references a parameter the caller did not supply.
    MissingParam(String),
    /// A parameter exists but has an unusable type or value.
    BadParam(String),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::UnknownModule(id) => write!(f, "unknown report module: {id}"),
            QueryError::DuplicateModule(id) => {
                write!(f, "report module already registered: {id}")
            }
            QueryError::UnknownField { entity, field } => {
                write!(f, "unknown field {} for {}", field, entity.label())
            }
            QueryError::MissingParam(name) => write!(f, "missing parameter: {name}"),
            QueryError::BadParam(name) => write!(f, "bad parameter: {name}"),
            QueryError::LimitExceeded(what) => write!(f, "limit exceeded: {what}"),
        }
    }
}

impl std::error::Error for QueryError {}
