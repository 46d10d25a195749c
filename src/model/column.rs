use serde_json::Value;

/// Semantic column type. Drives DDL, row decoding, filter coercion and schema field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
    Date,
    DateTime,
    Json,
    Uuid,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "int",
            ColumnType::Float => "float",
            ColumnType::Boolean => "bool",
            ColumnType::Text => "str",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::Json => "json",
            ColumnType::Uuid => "uuid",
        }
    }

    /// SQLite storage type used in DDL.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "REAL",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Text
            | ColumnType::Date
            | ColumnType::DateTime
            | ColumnType::Json
            | ColumnType::Uuid => "TEXT",
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::DateTime)
    }
}

#[derive(Debug, Clone)]
pub enum ColumnDefault {
    /// Client-side value applied on insert when the column is absent.
    Value(Value),
    /// SQL expression placed in the DDL `DEFAULT` clause.
    Server(String),
    /// A fresh v4 uuid generated on insert.
    NewUuid,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub default: Option<ColumnDefault>,
    /// `(table, column)` referenced by this column.
    pub references: Option<(String, String)>,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Column {
            name: name.into(),
            ty,
            nullable: false,
            primary_key: false,
            default: None,
            references: None,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Column::new(name, ColumnType::Integer)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Column::new(name, ColumnType::Text)
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(ColumnDefault::Value(value));
        self
    }

    pub fn server_default(mut self, sql: impl Into<String>) -> Self {
        self.default = Some(ColumnDefault::Server(sql.into()));
        self
    }

    pub fn uuid_default(mut self) -> Self {
        self.default = Some(ColumnDefault::NewUuid);
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some((table.into(), column.into()));
        self
    }

    /// True when an insert may omit the column. Integer primary keys are rowid aliases.
    pub fn has_default(&self) -> bool {
        self.default.is_some() || (self.primary_key && self.ty == ColumnType::Integer)
    }
}
