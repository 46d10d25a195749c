use crate::db::{Record, Session};
use crate::error::AppError;
use crate::model::{ColumnType, Model};
use crate::pagination::{paginate_query, Paginated};
use crate::params::ListParams;
use crate::query::{FindParams, Select};
use serde_json::{Map, Value};

/// Converts a path segment to a primary-key value of `model`.
pub fn parse_id(model: &Model, raw: &str) -> Result<Value, AppError> {
    let pk = model.single_pk()?;
    Ok(match pk.ty {
        ColumnType::Integer => {
            let n: i64 = raw
                .parse()
                .map_err(|_| AppError::BadRequest(format!("invalid {} id", model.name)))?;
            Value::from(n)
        }
        ColumnType::Uuid => {
            let u = uuid::Uuid::parse_str(raw)
                .map_err(|_| AppError::BadRequest(format!("invalid {} id", model.name)))?;
            Value::String(u.to_string())
        }
        _ => Value::String(raw.to_string()),
    })
}

fn not_found(model: &Model) -> AppError {
    AppError::NotFound(format!("{} not found", model.name))
}

/// The base query narrowed to one primary key, with includes.
async fn get_element(session: &mut Session, base: Select, id: Value, include: &[String]) -> Result<Option<Record>, AppError> {
    let q = base.find_id(id, include)?;
    session.one_or_none(&q).await
}

/// List endpoint: the find pipeline over the base query, paginated.
pub struct Index {
    pub params: ListParams,
}

impl Index {
    pub fn new(params: ListParams) -> Self {
        Index { params }
    }

    fn query(&self, base: Select, session: &Session) -> Result<Select, AppError> {
        let params = FindParams {
            page: None,
            size: None,
            ..self.params.find_params(session.settings())
        };
        base.find(&params, session.settings())
    }

    pub async fn execute(&self, session: &mut Session, base: Select) -> Result<Paginated<Record>, AppError> {
        let q = self.query(base, session)?;
        let size = self.params.page_size(session.settings());
        paginate_query(session, &q, self.params.page, size).await
    }

    /// Same query without pagination; the result carries no meta.
    pub async fn execute_all(&self, session: &mut Session, base: Select) -> Result<Paginated<Record>, AppError> {
        let q = self.query(base, session)?;
        let data = session.all(&q).await?;
        Ok(Paginated { data, meta: None })
    }
}

pub struct Show {
    pub include: Vec<String>,
}

impl Show {
    pub fn new(include: Vec<String>) -> Self {
        Show { include }
    }

    pub async fn execute(&self, session: &mut Session, base: Select, id: Value) -> Result<Record, AppError> {
        let model = base.model().clone();
        get_element(session, base, id, &self.include)
            .await?
            .ok_or_else(|| not_found(&model))
    }
}

pub struct Create {
    pub include: Vec<String>,
}

impl Create {
    pub fn new(include: Vec<String>) -> Self {
        Create { include }
    }

    /// Inserts `data`, then re-reads the row through the base query with includes.
    pub async fn execute(&self, session: &mut Session, base: Select, data: Map<String, Value>) -> Result<Record, AppError> {
        let model = base.model().clone();
        let pk = model.single_pk()?.name.clone();
        let created = session.create(&model.name, data).await?;
        let id = created.get(&pk).cloned().unwrap_or(Value::Null);
        get_element(session, base, id, &self.include)
            .await?
            .ok_or_else(|| not_found(&model))
    }
}

pub struct Update {
    pub include: Vec<String>,
}

impl Update {
    pub fn new(include: Vec<String>) -> Self {
        Update { include }
    }

    pub async fn execute(
        &self,
        session: &mut Session,
        base: Select,
        id: Value,
        patch: Map<String, Value>,
    ) -> Result<Record, AppError> {
        let model = base.model().clone();
        let mut record = get_element(session, base.clone(), id.clone(), &[])
            .await?
            .ok_or_else(|| not_found(&model))?;
        session.save(&mut record, patch).await?;
        get_element(session, base, id, &self.include)
            .await?
            .ok_or_else(|| not_found(&model))
    }
}

pub struct Delete;

impl Delete {
    pub async fn execute(&self, session: &mut Session, base: Select, id: Value) -> Result<(), AppError> {
        let model = base.model().clone();
        let record = get_element(session, base, id, &[])
            .await?
            .ok_or_else(|| not_found(&model))?;
        session.delete(&record).await
    }
}
