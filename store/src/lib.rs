mod identity_cache;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod retry;
mod schema;
mod url;

pub mod db;

pub use identity_cache::IdentityCache;
pub use pool::{get_pool, ConnectionPool};
pub use url::database_url_from_environment;

pub use diesel::{Connection, PgConnection};

pub type QueryError = diesel::result::Error;
pub type QueryResult<T> = diesel::result::QueryResult<T>;
