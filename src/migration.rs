//! DDL derived from the registry: one table per base model (variants share it)
//! and one association table per many-to-many link.

use crate::error::AppError;
use crate::model::{Column, ColumnDefault, ColumnType, Link, Model, Registry};
use crate::query::quoted;
use sqlx::SqlitePool;
use std::collections::HashSet;

fn column_def(c: &Column, inline_pk: bool) -> String {
    let mut def = format!("{} {}", quoted(&c.name), c.ty.sql_type());
    if inline_pk {
        def.push_str(" PRIMARY KEY AUTOINCREMENT");
        return def;
    }
    if !c.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(ColumnDefault::Server(sql)) = &c.default {
        def.push_str(&format!(" DEFAULT ({})", sql));
    }
    if let Some((table, column)) = &c.references {
        def.push_str(&format!(" REFERENCES {}({})", quoted(table), quoted(column)));
        if c.nullable {
            def.push_str(" ON DELETE SET NULL");
        }
    }
    def
}

fn table_statement(m: &Model) -> String {
    let pks = m.primary_keys();
    let inline = pks.len() == 1 && pks[0].ty == ColumnType::Integer;
    let mut defs: Vec<String> = m
        .columns
        .iter()
        .map(|c| column_def(c, inline && c.primary_key))
        .collect();
    for c in &m.variant_columns {
        let mut shared = c.clone();
        shared.nullable = true;
        defs.push(column_def(&shared, false));
    }
    if !inline {
        let cols: Vec<String> = pks.iter().map(|c| quoted(&c.name)).collect();
        defs.push(format!("PRIMARY KEY ({})", cols.join(", ")));
    }
    format!("CREATE TABLE IF NOT EXISTS {} (\n  {}\n)", quoted(&m.table), defs.join(",\n  "))
}

/// `(table, statement)` for every association table, each table once.
fn secondary_statements(registry: &Registry) -> Result<Vec<(String, String)>, AppError> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in registry.models() {
        for rel in &m.relationships {
            let Link::Secondary { table, local, remote } = &rel.link else { continue };
            if !seen.insert(table.clone()) {
                continue;
            }
            let target = registry.model(&rel.target)?;
            let local_pk = m.single_pk()?;
            let remote_pk = target.single_pk()?;
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {t} (\n  {l} {lt} NOT NULL REFERENCES {mt}({mp}) ON DELETE CASCADE,\n  {r} {rt} NOT NULL REFERENCES {tt}({tp}) ON DELETE CASCADE,\n  PRIMARY KEY ({l}, {r})\n)",
                t = quoted(table),
                l = quoted(local),
                lt = local_pk.ty.sql_type(),
                mt = quoted(&m.table),
                mp = quoted(&local_pk.name),
                r = quoted(remote),
                rt = remote_pk.ty.sql_type(),
                tt = quoted(&target.table),
                tp = quoted(&remote_pk.name),
            );
            out.push((table.clone(), sql));
        }
    }
    Ok(out)
}

/// `CREATE TABLE` statements in dependency order: model tables, then association tables.
pub fn create_statements(registry: &Registry) -> Result<Vec<String>, AppError> {
    let mut out: Vec<String> = registry
        .models()
        .filter(|m| m.inherits.is_none())
        .map(|m| table_statement(m))
        .collect();
    out.extend(secondary_statements(registry)?.into_iter().map(|(_, sql)| sql));
    Ok(out)
}

/// `DROP TABLE` statements, dependents first.
pub fn drop_statements(registry: &Registry) -> Result<Vec<String>, AppError> {
    let mut out: Vec<String> = secondary_statements(registry)?
        .into_iter()
        .map(|(table, _)| format!("DROP TABLE IF EXISTS {}", quoted(&table)))
        .collect();
    let tables: Vec<&str> = registry
        .models()
        .filter(|m| m.inherits.is_none())
        .map(|m| m.table.as_str())
        .collect();
    out.extend(tables.iter().rev().map(|t| format!("DROP TABLE IF EXISTS {}", quoted(t))));
    Ok(out)
}

/// Creates every missing table. Existing tables are left untouched.
pub async fn create_all(pool: &SqlitePool, registry: &Registry) -> Result<(), AppError> {
    for sql in create_statements(registry)? {
        tracing::debug!(%sql, "create table");
        sqlx::query(&sql).execute(pool).await?;
    }
    tracing::info!("schema created");
    Ok(())
}

pub async fn drop_all(pool: &SqlitePool, registry: &Registry) -> Result<(), AppError> {
    for sql in drop_statements(registry)? {
        tracing::debug!(%sql, "drop table");
        sqlx::query(&sql).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::tests::blog;

    #[test]
    fn integer_keys_autoincrement_and_fks_reference() {
        let registry = blog();
        let stmts = create_statements(&registry).unwrap();
        let post = stmts.iter().find(|s| s.contains("\"post\" (")).unwrap();
        assert!(post.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        let message = stmts.iter().find(|s| s.contains("\"message\" (")).unwrap();
        assert!(message.contains("REFERENCES \"post\"(\"id\")"));
    }

    #[test]
    fn variants_share_the_base_table() {
        use crate::model::{Column, Model};
        let base = Model::define("Poly", "poly")
            .id()
            .column(Column::text("type"))
            .polymorphic_on("type")
            .timestamps()
            .build();
        let a = Model::define("PolyA", "poly")
            .column(Column::integer("value"))
            .inherits("Poly", "a")
            .build();
        let registry = Registry::build(vec![base, a]).unwrap();
        let stmts = create_statements(&registry).unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].contains("\"value\" INTEGER\n"));
        assert!(stmts[0].contains("\"created_at\" TEXT NOT NULL DEFAULT (CURRENT_TIMESTAMP)"));
    }

    #[test]
    fn association_tables_come_last_and_drop_first() {
        let registry = blog();
        let create = create_statements(&registry).unwrap();
        assert!(create.last().unwrap().contains("PRIMARY KEY (\"message_id\", \"tag_id\")"));
        let drop = drop_statements(&registry).unwrap();
        assert_eq!(drop[0], "DROP TABLE IF EXISTS \"message_tag\"");
    }
}
