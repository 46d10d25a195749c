//! Blog models: posts with messages, tags on messages, and a polymorphic `Poly`.

use serde_json::json;
use solo_sdk::{AppError, Column, ColumnType, Expr, FilterValue, Model, Registry, Relationship, Select};
use std::sync::Arc;

fn term(value: &FilterValue) -> Result<&str, AppError> {
    value
        .as_str()
        .ok_or_else(|| AppError::Validation("expected a single value".to_string()))
}

fn post() -> Model {
    Model::define("Post", "post")
        .id()
        .column(Column::text("title"))
        .timestamps()
        .relationship(Relationship::has_many("messages", "Message", "post_id").back_populates("post"))
        .filter_scope("msg_txt", |q: Select, v: &FilterValue| {
            let txt = term(v)?;
            Ok(q.join("messages")?.filter(Expr::column("message", "text").contains(txt)))
        })
        .sort_scope("reverse_title", |q: Select, desc: bool| {
            let title = q.col("title");
            Ok(q.order_by(title.order(!desc)))
        })
        .queryable_all()
        .build()
}

fn message() -> Model {
    Model::define("Message", "message")
        .id()
        .column(Column::text("text").nullable())
        .column(Column::integer("post_id").references("post", "id"))
        .relationship(Relationship::belongs_to("post", "Post", "post_id").back_populates("messages"))
        .relationship(
            Relationship::many_to_many("tags", "Tag", "message_tag", "message_id", "tag_id").back_populates("messages"),
        )
        .filter_scope("post_title", |q: Select, v: &FilterValue| {
            let title = term(v)?;
            Ok(q.join("post")?.filter(Expr::column("post", "title").contains(title)))
        })
        .queryable_all()
        .build()
}

fn tag() -> Model {
    Model::define("Tag", "tag")
        .id()
        .column(Column::text("name").nullable())
        .relationship(
            Relationship::many_to_many("messages", "Message", "message_tag", "tag_id", "message_id")
                .back_populates("tags"),
        )
        .computed("asd", ColumnType::Integer, |_| json!(555))
        .expression("asd2", ColumnType::Text, "'asd2' || {table}.\"name\"")
        .queryable_all()
        .build()
}

fn polys() -> Vec<Model> {
    let base = Model::define("Poly", "poly")
        .id()
        .column(Column::text("type"))
        .polymorphic_on("type")
        .filter_scope("eqtype", |q: Select, v: &FilterValue| {
            let t = term(v)?;
            let col = q.col("type");
            Ok(q.filter(col.eq(t)))
        })
        .queryable_all()
        .build();
    let a = Model::define("PolyA", "poly")
        .column(Column::text("a"))
        .inherits("Poly", "a")
        .filter_scope("eqa", |q: Select, v: &FilterValue| {
            let t = term(v)?;
            let col = q.col("a");
            Ok(q.filter(col.eq(t)))
        })
        .queryable_all()
        .build();
    let b = Model::define("PolyB", "poly")
        .column(Column::text("b"))
        .inherits("Poly", "b")
        .filter_scope("eqb", |q: Select, v: &FilterValue| {
            let t = term(v)?;
            let col = q.col("b");
            Ok(q.filter(col.eq(t)))
        })
        .queryable_all()
        .build();
    vec![base, a, b]
}

pub fn registry() -> Result<Arc<Registry>, solo_sdk::ConfigError> {
    let mut models = vec![post(), message(), tag()];
    models.extend(polys());
    Registry::build(models)
}
