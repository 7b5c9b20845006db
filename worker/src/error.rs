use diesel::r2d2::PoolError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum WorkerError {
    #[error("error checking out a database connection")]
    PoolError(#[source] PoolError),

    #[error("database error projecting batch")]
    QueryError(#[source] graph_store::QueryError),
}

impl From<PoolError> for WorkerError {
    fn from(err: PoolError) -> Self {
        WorkerError::PoolError(err)
    }
}

impl From<graph_store::QueryError> for WorkerError {
    fn from(err: graph_store::QueryError) -> Self {
        WorkerError::QueryError(err)
    }
}
