//! Example consumer: a blog API built on solo-sdk.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Or from this directory: `cargo run`

mod models;

use axum::{middleware::from_fn, Router};
use solo_sdk::{
    common_routes, create_all, root_transaction, AppState, ColumnType, CrudOptions, CrudRouter, Database, Extras,
    FieldSet, SchemaSpec, Settings,
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("solo_sdk=info")),
        )
        .init();

    let settings = Settings::from_dotenv()?;
    let registry = models::registry()?;
    let db = Database::connect(settings, registry.clone()).await?;
    create_all(db.pool(), &registry).await?;

    let post_response = registry.response_schema(
        "Post",
        &SchemaSpec::default()
            .relationships(FieldSet::new().nested("messages", ["tags"]))
            .extras(Extras::new().nested("messages", Extras::new().field("extra_field", ColumnType::Text))),
    )?;
    let posts = CrudRouter::new(&registry)
        .generate_crud("Post", CrudOptions::default().response_schema(post_response))?
        .body_limit(1024 * 1024)
        .into_router();
    let messages = CrudRouter::new(&registry)
        .generate_crud("Message", CrudOptions::default())?
        .into_router();
    let tags = CrudRouter::new(&registry)
        .generate_crud("Tag", CrudOptions::default())?
        .into_router();
    let polys = CrudRouter::new(&registry)
        .generate_crud("Poly", CrudOptions::read_only())?
        .into_router();
    let poly_a = CrudRouter::new(&registry)
        .generate_crud("PolyA", CrudOptions::default())?
        .into_router();

    let api = Router::new()
        .nest("/posts", posts)
        .nest("/messages", messages)
        .nest("/tags", tags)
        .nest("/polys", polys)
        .nest("/poly-a", poly_a)
        .layer(from_fn(root_transaction));

    let app = common_routes()
        .nest("/api", api)
        .with_state(AppState::new(db));

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    let port = listener.local_addr()?.port();
    tracing::info!("Example consumer listening on http://127.0.0.1:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}
