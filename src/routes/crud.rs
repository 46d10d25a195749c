//! Generated CRUD resources.
//!
//! One [`CrudRouter`] serves one model. Nest it under a prefix and wrap the
//! outer router in [`root_transaction`](crate::middleware::root_transaction):
//!
//! ```ignore
//! let posts = CrudRouter::new(&registry)
//!     .generate_crud("Post", CrudOptions::default())?
//!     .into_router();
//! let app = Router::new()
//!     .nest("/posts", posts)
//!     .layer(axum::middleware::from_fn(root_transaction))
//!     .with_state(state);
//! ```

use crate::db::Session;
use crate::error::{AppError, ConfigError};
use crate::handlers::{parse_id, Create, Delete, Index, Show, Update};
use crate::middleware::Db;
use crate::model::{Registry, ScopeResult};
use crate::params::{IncludeParams, JsonBody, ListParams};
use crate::query::Select;
use crate::schema::{Schema, SchemaSpec};
use crate::state::AppState;
use axum::{
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, MethodRouter},
    Json, Router,
};
use serde_json::Value;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

/// Narrows every query a generated route runs, e.g. to the current tenant.
pub type BaseQuery = Arc<dyn Fn(Select) -> ScopeResult + Send + Sync>;

/// Which routes to mount and how to shape them.
#[derive(Clone)]
pub struct CrudOptions {
    pub index: bool,
    pub show: bool,
    pub create: bool,
    pub update: bool,
    pub delete: bool,
    /// Defaults to `response_schema(model, SchemaSpec::default())`.
    pub response_schema: Option<Arc<Schema>>,
    /// Defaults to `request_schema(model, SchemaSpec::request())`.
    pub create_schema: Option<Arc<Schema>>,
    /// Defaults to the create schema with every field optional.
    pub update_schema: Option<Arc<Schema>>,
    pub base_query: Option<BaseQuery>,
    /// Overrides `Settings::delete_status_code`.
    pub delete_status: Option<StatusCode>,
}

impl Default for CrudOptions {
    fn default() -> Self {
        CrudOptions {
            index: true,
            show: true,
            create: true,
            update: true,
            delete: true,
            response_schema: None,
            create_schema: None,
            update_schema: None,
            base_query: None,
            delete_status: None,
        }
    }
}

impl CrudOptions {
    /// Only the two read routes.
    pub fn read_only() -> Self {
        CrudOptions {
            create: false,
            update: false,
            delete: false,
            ..CrudOptions::default()
        }
    }

    pub fn response_schema(mut self, schema: Arc<Schema>) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn create_schema(mut self, schema: Arc<Schema>) -> Self {
        self.create_schema = Some(schema);
        self
    }

    pub fn update_schema(mut self, schema: Arc<Schema>) -> Self {
        self.update_schema = Some(schema);
        self
    }

    pub fn base_query<F>(mut self, f: F) -> Self
    where
        F: Fn(Select) -> ScopeResult + Send + Sync + 'static,
    {
        self.base_query = Some(Arc::new(f));
        self
    }

    pub fn delete_status(mut self, status: StatusCode) -> Self {
        self.delete_status = Some(status);
        self
    }
}

struct Resource {
    model: String,
    response: Arc<Schema>,
    create: Arc<Schema>,
    update: Arc<Schema>,
    base_query: Option<BaseQuery>,
    delete_status: Option<StatusCode>,
}

impl Resource {
    fn base(&self, session: &Session) -> Result<Select, AppError> {
        let q = session.select(&self.model)?;
        match &self.base_query {
            Some(f) => f(q),
            None => Ok(q),
        }
    }

    /// Requested paths plus what the response schema renders statically.
    fn includes(&self, requested: Vec<String>) -> Vec<String> {
        let mut out = requested;
        for path in self.response.eager_includes() {
            if !out.contains(&path) {
                out.push(path);
            }
        }
        out
    }

    fn id(&self, raw: &str) -> Result<Value, AppError> {
        parse_id(self.response.model(), raw)
    }

    fn delete_status(&self, session: &Session) -> StatusCode {
        self.delete_status.unwrap_or_else(|| {
            StatusCode::from_u16(session.settings().delete_status_code).unwrap_or(StatusCode::NO_CONTENT)
        })
    }

    async fn index(&self, mut db: Db, mut params: ListParams) -> Result<Response, AppError> {
        params.include = self.includes(params.include);
        let base = self.base(&db)?;
        let page = Index::new(params).execute(&mut db, base).await?;
        Ok(Json(page.render(&self.response)?).into_response())
    }

    async fn show(&self, mut db: Db, include: Vec<String>, id: String) -> Result<Response, AppError> {
        let id = self.id(&id)?;
        let base = self.base(&db)?;
        let record = Show::new(self.includes(include)).execute(&mut db, base, id).await?;
        Ok(Json(self.response.render_model(&record, false)?).into_response())
    }

    async fn create(&self, mut db: Db, include: Vec<String>, body: Value) -> Result<Response, AppError> {
        let data = self.create.parse_request(&body)?;
        let base = self.base(&db)?;
        let record = Create::new(self.includes(include)).execute(&mut db, base, data).await?;
        let body = self.response.render_model(&record, false)?;
        Ok((StatusCode::CREATED, Json(body)).into_response())
    }

    async fn update(&self, mut db: Db, include: Vec<String>, id: String, body: Value) -> Result<Response, AppError> {
        let id = self.id(&id)?;
        let patch = self.update.parse_request(&body)?;
        let base = self.base(&db)?;
        let record = Update::new(self.includes(include))
            .execute(&mut db, base, id, patch)
            .await?;
        Ok(Json(self.response.render_model(&record, false)?).into_response())
    }

    async fn delete(&self, mut db: Db, id: String) -> Result<Response, AppError> {
        let id = self.id(&id)?;
        let base = self.base(&db)?;
        Delete.execute(&mut db, base, id).await?;
        Ok(self.delete_status(&db).into_response())
    }
}

pub struct CrudRouter {
    registry: Arc<Registry>,
    router: Router<AppState>,
}

impl CrudRouter {
    pub fn new(registry: &Arc<Registry>) -> Self {
        CrudRouter {
            registry: registry.clone(),
            router: Router::new(),
        }
    }

    /// Mounts `GET /`, `POST /`, `GET /:id`, `PUT /:id` and `DELETE /:id` for
    /// `model`, skipping the ones switched off in `options`.
    pub fn generate_crud(mut self, model: &str, options: CrudOptions) -> Result<Self, ConfigError> {
        let m = self.registry.model(model)?.clone();
        m.single_pk()?;
        let response = match options.response_schema {
            Some(s) => s,
            None => self.registry.response_schema(model, &SchemaSpec::default())?,
        };
        let create = match options.create_schema {
            Some(s) => s,
            None => self.registry.request_schema(model, &SchemaSpec::request())?,
        };
        let update = match options.update_schema {
            Some(s) => s,
            None => self
                .registry
                .request_schema(model, &SchemaSpec::request().all_optional(true))?,
        };
        let resource = Arc::new(Resource {
            model: m.name.clone(),
            response,
            create,
            update,
            base_query: options.base_query,
            delete_status: options.delete_status,
        });

        let mut collection: Option<MethodRouter<AppState>> = None;
        let mut item: Option<MethodRouter<AppState>> = None;

        if options.index {
            let r = resource.clone();
            let route = get(move |db: Db, params: ListParams| async move { r.index(db, params).await });
            collection = Some(route);
        }
        if options.create {
            let r = resource.clone();
            let handler = move |db: Db, IncludeParams(include): IncludeParams, JsonBody(body): JsonBody| async move {
                r.create(db, include, body).await
            };
            collection = Some(match collection {
                Some(route) => route.post(handler),
                None => axum::routing::post(handler),
            });
        }
        if options.show {
            let r = resource.clone();
            let handler = move |db: Db, IncludeParams(include): IncludeParams, Path(id): Path<String>| async move {
                r.show(db, include, id).await
            };
            item = Some(get(handler));
        }
        if options.update {
            let r = resource.clone();
            let handler = move |db: Db,
                                IncludeParams(include): IncludeParams,
                                Path(id): Path<String>,
                                JsonBody(body): JsonBody| async move {
                r.update(db, include, id, body).await
            };
            item = Some(match item {
                Some(route) => route.put(handler),
                None => axum::routing::put(handler),
            });
        }
        if options.delete {
            let r = resource.clone();
            let handler = move |db: Db, Path(id): Path<String>| async move { r.delete(db, id).await };
            item = Some(match item {
                Some(route) => route.delete(handler),
                None => axum::routing::delete(handler),
            });
        }

        if let Some(route) = collection {
            self.router = self.router.route("/", route);
        }
        if let Some(route) = item {
            self.router = self.router.route("/:id", route);
        }
        tracing::debug!(model = %m.name, "generated crud routes");
        Ok(self)
    }

    /// Rejects request bodies larger than `bytes`.
    pub fn body_limit(mut self, bytes: usize) -> Self {
        self.router = self.router.layer(RequestBodyLimitLayer::new(bytes));
        self
    }

    pub fn into_router(self) -> Router<AppState> {
        self.router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::tests::blog;

    #[test]
    fn unknown_model_is_a_config_error() {
        let registry = blog();
        let err = CrudRouter::new(&registry)
            .generate_crud("Nope", CrudOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::UnknownModel(ref m) if m == "Nope"));
    }

    #[test]
    fn read_only_switches_off_writes() {
        let o = CrudOptions::read_only();
        assert!(o.index && o.show);
        assert!(!o.create && !o.update && !o.delete);
    }
}
