use ulid::Ulid;

use crate::model::{Conflict, Span};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The probe found at least one colliding assignment.
    Conflict(Vec<Conflict>),
    /// The span escapes the resource's availability window.
    OutsideWindow { resource_id: Ulid, window: Span },
    /// Deletion blocked until the dependents are removed.
    HasDependents {
        id: Ulid,
        dependents: &'static str,
        count: usize,
    },
    Validation(&'static str),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(conflicts) => {
                write!(f, "conflicts with {} assignment(s):", conflicts.len())?;
                for c in conflicts {
                    write!(
                        f,
                        " {} over [{}, {})",
                        c.assignment_id, c.overlap.start, c.overlap.end
                    )?;
                }
                Ok(())
            }
            EngineError::OutsideWindow {
                resource_id,
                window,
            } => {
                write!(
                    f,
                    "outside availability window [{}, {}) of resource {resource_id}",
                    window.start, window.end
                )
            }
            EngineError::HasDependents {
                id,
                dependents,
                count,
            } => {
                write!(f, "cannot delete {id}: {count} dependent {dependents}")
            }
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
