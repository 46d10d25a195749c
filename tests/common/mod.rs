#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    middleware::from_fn,
    Router,
};
use serde_json::{json, Value};
use solo_sdk::{
    create_all, root_transaction, AppState, Column, ColumnType, CrudOptions, CrudRouter, Database, Expr, Extras,
    FieldType, FilterValue, Model, Registry, Relationship, SchemaSpec, Select, Settings,
};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub fn registry() -> Arc<Registry> {
    let post = Model::define("Post", "post")
        .id()
        .column(Column::text("title"))
        .timestamps()
        .relationship(Relationship::has_many("messages", "Message", "post_id").back_populates("post"))
        .filter_scope("msg_txt", |q: Select, v: &FilterValue| {
            let txt = v.as_str().unwrap_or_default().to_string();
            Ok(q.join("messages")?.filter(Expr::column("message", "text").contains(&txt)))
        })
        .sort_scope("reverse_title", |q: Select, desc: bool| {
            let title = q.col("title");
            Ok(q.order_by(title.order(!desc)))
        })
        .queryable_all()
        .build();
    let message = Model::define("Message", "message")
        .id()
        .column(Column::text("text").nullable())
        .column(Column::integer("post_id").references("post", "id"))
        .relationship(Relationship::belongs_to("post", "Post", "post_id").back_populates("messages"))
        .relationship(
            Relationship::many_to_many("tags", "Tag", "message_tag", "message_id", "tag_id").back_populates("messages"),
        )
        .queryable_all()
        .build();
    let tag = Model::define("Tag", "tag")
        .id()
        .column(Column::text("name").nullable())
        .relationship(
            Relationship::many_to_many("messages", "Message", "message_tag", "tag_id", "message_id")
                .back_populates("tags"),
        )
        .queryable_all()
        .build();
    let user = Model::define("User", "user")
        .id()
        .column(Column::text("email"))
        .column(Column::text("password"))
        .build();
    let poly = Model::define("Poly", "poly")
        .id()
        .column(Column::text("type"))
        .polymorphic_on("type")
        .queryable_all()
        .build();
    let poly_a = Model::define("PolyA", "poly")
        .column(Column::text("a"))
        .inherits("Poly", "a")
        .queryable_all()
        .build();
    let poly_b = Model::define("PolyB", "poly")
        .column(Column::text("b"))
        .inherits("Poly", "b")
        .queryable_all()
        .build();
    Registry::build(vec![post, message, tag, user, poly, poly_a, poly_b]).unwrap()
}

pub struct TestApp {
    pub db: Database,
    pub router: Router,
    _dir: TempDir,
}

pub fn settings(dir: &TempDir) -> Settings {
    Settings {
        database_url: format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display()),
        pagination_size: 3,
        ..Settings::default()
    }
}

pub async fn database() -> (Database, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let db = Database::connect(settings(&dir), registry.clone()).await.unwrap();
    create_all(db.pool(), &registry).await.unwrap();
    (db, dir)
}

pub async fn app() -> TestApp {
    let (db, dir) = database().await;
    let registry = db.registry().clone();

    let message_create = registry
        .request_schema(
            "Message",
            &SchemaSpec::request().extras(Extras::new().field("tags", FieldType::list(ColumnType::Integer.into()))),
        )
        .unwrap();
    let message_response = registry
        .response_schema("Message", &SchemaSpec::default().relationships(["tags"]))
        .unwrap();
    let router = |model: &str, options: CrudOptions| {
        CrudRouter::new(&registry).generate_crud(model, options).unwrap().into_router()
    };

    let api = Router::new()
        .nest("/posts", router("Post", CrudOptions::default()))
        .nest(
            "/messages",
            router(
                "Message",
                CrudOptions::default()
                    .create_schema(message_create)
                    .response_schema(message_response),
            ),
        )
        .nest("/tags", router("Tag", CrudOptions::default()))
        .nest("/users", router("User", CrudOptions::read_only()))
        .nest("/polys", router("Poly", CrudOptions::read_only()))
        .nest(
            "/polys-a",
            router(
                "PolyA",
                CrudOptions::read_only().base_query(|q: Select| {
                    let a = q.col("a");
                    Ok(q.filter(a.contains("keep")))
                }),
            ),
        )
        .layer(from_fn(root_transaction))
        .with_state(AppState::new(db.clone()));

    TestApp { db, router: api, _dir: dir }
}

impl TestApp {
    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        match body {
            Some(b) => self.send_raw(method, uri, Some("application/json"), b.to_string()).await,
            None => self.send_raw(method, uri, None, String::new()).await,
        }
    }

    pub async fn send_raw(
        &self,
        method: Method,
        uri: &str,
        content_type: Option<&str>,
        body: String,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(ct) = content_type {
            builder = builder.header("content-type", ct);
        }
        let request = builder.body(Body::from(body)).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body)).await
    }

    /// Inserts through a session, outside any request.
    pub async fn insert(&self, model: &str, data: Value) -> Value {
        let mut session = self.db.session().await.unwrap();
        let Value::Object(map) = data else { panic!("object expected") };
        let record = session.create(model, map).await.unwrap();
        session.close().await.unwrap();
        record.get("id").cloned().unwrap_or(json!(null))
    }
}
