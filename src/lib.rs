//! Solo SDK: declarative CRUD routes, a query-filtering DSL, schema synthesis
//! and nested request transactions over axum and SQLite.

pub mod case;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod migration;
pub mod model;
pub mod pagination;
pub mod params;
pub mod query;
pub mod routes;
pub mod schema;
pub mod settings;
pub mod state;

pub use db::blocking::{BlockingFactory, BlockingScope, BlockingSession};
pub use db::{Database, Record, Relation, Session, Transaction, TxHandle, TxState};
pub use error::{AppError, ConfigError};
pub use middleware::{root_transaction, Db};
pub use migration::{create_all, drop_all};
pub use model::{Column, ColumnType, FilterValue, Model, Registry, Relationship};
pub use pagination::{paginate_list, paginate_query, paginate_result, Paginated, PaginationMeta};
pub use params::{IncludeParams, JsonBody, ListParams};
pub use query::{Expr, FindParams, Fragment, PageSize, Select};
pub use routes::{common_routes, CrudOptions, CrudRouter};
pub use schema::{Extras, FieldSet, FieldType, Schema, SchemaSpec};
pub use settings::Settings;
pub use state::AppState;

/// Installs a `tracing` subscriber filtered by `RUST_LOG`, defaulting to `solo_sdk=info`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("solo_sdk=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
