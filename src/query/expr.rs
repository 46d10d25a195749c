//! SQL expression fragments with positional parameters.
//!
//! Fragments carry `?` placeholders; [`QueryBuf`] renumbers them to `?N` when a
//! statement is assembled so fragments compose without tracking offsets.

use serde_json::Value;

/// Quote identifier for SQLite (identifiers come from model metadata only).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub fn qualified(table: &str, column: &str) -> String {
    format!("{}.{}", quoted(table), quoted(column))
}

/// A boolean condition or an ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Fragment {
    /// Raw SQL using `?` for each entry of `params`.
    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Fragment { sql: sql.into(), params }
    }

    pub fn and(parts: Vec<Fragment>) -> Fragment {
        Self::join(parts, " AND ", "1 = 1")
    }

    pub fn or(parts: Vec<Fragment>) -> Fragment {
        Self::join(parts, " OR ", "1 = 0")
    }

    pub fn not(self) -> Fragment {
        Fragment {
            sql: format!("NOT ({})", self.sql),
            params: self.params,
        }
    }

    fn join(parts: Vec<Fragment>, sep: &str, empty: &str) -> Fragment {
        if parts.is_empty() {
            return Fragment::raw(empty, Vec::new());
        }
        let mut sql = Vec::with_capacity(parts.len());
        let mut params = Vec::new();
        for p in parts {
            sql.push(format!("({})", p.sql));
            params.extend(p.params);
        }
        Fragment {
            sql: sql.join(sep),
            params,
        }
    }
}

/// A value expression, usually a qualified column.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Expr {
    pub fn column(table: &str, name: &str) -> Self {
        Expr {
            sql: qualified(table, name),
            params: Vec::new(),
        }
    }

    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Expr { sql: sql.into(), params }
    }

    /// Member `key` of a JSON column.
    pub fn json(self, key: &str) -> Expr {
        let mut params = self.params;
        params.push(Value::String(format!("$.\"{}\"", key.replace('"', "\\\""))));
        Expr {
            sql: format!("json_extract({}, ?)", self.sql),
            params,
        }
    }

    /// Day part of a date or datetime.
    pub fn date(self) -> Expr {
        Expr {
            sql: format!("date({})", self.sql),
            params: self.params,
        }
    }

    fn compare(self, op: &str, value: Value) -> Fragment {
        let mut params = self.params;
        params.push(value);
        Fragment {
            sql: format!("{} {} ?", self.sql, op),
            params,
        }
    }

    /// Equality; a JSON null compares with `IS NULL`.
    pub fn eq(self, value: impl Into<Value>) -> Fragment {
        match value.into() {
            Value::Null => self.is_null(),
            v => self.compare("=", v),
        }
    }

    pub fn ne(self, value: impl Into<Value>) -> Fragment {
        match value.into() {
            Value::Null => self.is_not_null(),
            v => self.compare("<>", v),
        }
    }

    pub fn gt(self, value: impl Into<Value>) -> Fragment {
        self.compare(">", value.into())
    }

    pub fn ge(self, value: impl Into<Value>) -> Fragment {
        self.compare(">=", value.into())
    }

    pub fn lt(self, value: impl Into<Value>) -> Fragment {
        self.compare("<", value.into())
    }

    pub fn le(self, value: impl Into<Value>) -> Fragment {
        self.compare("<=", value.into())
    }

    pub fn like(self, pattern: impl Into<String>) -> Fragment {
        self.compare("LIKE", Value::String(pattern.into()))
    }

    /// Case-sensitive substring match.
    pub fn contains(self, needle: &str) -> Fragment {
        let mut params = self.params;
        params.push(Value::String(needle.to_string()));
        Fragment {
            sql: format!("instr({}, ?) > 0", self.sql),
            params,
        }
    }

    pub fn icontains(self, needle: &str) -> Fragment {
        let mut params = self.params;
        params.push(Value::String(format!("%{}%", needle)));
        Fragment {
            sql: format!("LOWER({}) LIKE LOWER(?)", self.sql),
            params,
        }
    }

    pub fn is_null(self) -> Fragment {
        Fragment {
            sql: format!("{} IS NULL", self.sql),
            params: self.params,
        }
    }

    pub fn is_not_null(self) -> Fragment {
        Fragment {
            sql: format!("{} IS NOT NULL", self.sql),
            params: self.params,
        }
    }

    /// `IN (...)`; an empty list matches nothing.
    pub fn in_list(self, values: Vec<Value>) -> Fragment {
        if values.is_empty() {
            return Fragment::raw("1 = 0", Vec::new());
        }
        let marks = vec!["?"; values.len()].join(", ");
        let mut params = self.params;
        params.extend(values);
        Fragment {
            sql: format!("{} IN ({})", self.sql, marks),
            params,
        }
    }

    pub fn between(self, low: impl Into<Value>, high: impl Into<Value>) -> Fragment {
        let mut params = self.params;
        params.push(low.into());
        params.push(high.into());
        Fragment {
            sql: format!("{} BETWEEN ? AND ?", self.sql),
            params,
        }
    }

    pub fn asc(self) -> Fragment {
        Fragment {
            sql: format!("{} ASC", self.sql),
            params: self.params,
        }
    }

    pub fn desc(self) -> Fragment {
        Fragment {
            sql: format!("{} DESC", self.sql),
            params: self.params,
        }
    }

    pub fn order(self, desc: bool) -> Fragment {
        if desc {
            self.desc()
        } else {
            self.asc()
        }
    }
}

/// Statement under construction: SQL text plus the flattened parameter list.
#[derive(Debug, Default, Clone)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    pub fn new() -> Self {
        QueryBuf::default()
    }

    pub fn push_str(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    pub fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Appends `sql`, numbering each `?` outside string literals from `params`.
    pub fn push_sql(&mut self, sql: &str, params: &[Value]) {
        let mut next = params.iter();
        let mut in_literal = false;
        for c in sql.chars() {
            match c {
                '\'' => {
                    in_literal = !in_literal;
                    self.sql.push(c);
                }
                '?' if !in_literal => {
                    let n = self.push_param(next.next().cloned().unwrap_or(Value::Null));
                    self.sql.push('?');
                    self.sql.push_str(&n.to_string());
                }
                _ => self.sql.push(c),
            }
        }
    }

    pub fn push(&mut self, f: &Fragment) {
        self.push_sql(&f.sql, &f.params);
    }

    pub fn push_expr(&mut self, e: &Expr) {
        self.push_sql(&e.sql, &e.params);
    }
}
