use super::filter::bracket_key;
use super::{Expr, Select};
use crate::error::AppError;
use crate::model::{Attr, SortScope, VirtualSource};

impl Select {
    /// Appends ORDER BY terms for each token, in order. A leading `-` sorts descending.
    ///
    /// `col[json_key]` goes to the json sort scope `col`, then a sort scope named
    /// like the token, then a column or SQL-expression virtual. Anything else is skipped.
    pub fn sort<S: AsRef<str>>(mut self, tokens: &[S]) -> Result<Self, AppError> {
        let registry = self.registry().clone();
        let model = self.model().name.clone();
        for token in tokens {
            let token = token.as_ref().trim();
            if token.is_empty() {
                continue;
            }
            let (desc, key) = match token.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, token),
            };
            if let Some((col, json_key)) = bracket_key(key) {
                match registry.sort_scope(&model, col) {
                    Some(SortScope::Json(scope)) => self = scope(self, json_key, desc)?,
                    _ => tracing::debug!(model = %model, key = %key, "no json sort scope, skipped"),
                }
                continue;
            }
            if let Some(SortScope::Value(scope)) = registry.sort_scope(&model, key) {
                self = scope(self, desc)?;
                continue;
            }
            let term = match registry.resolve(&model, key) {
                Some(Attr::Column(c)) => self.col(&c.name).order(desc),
                Some(Attr::Virtual(v)) => match &v.source {
                    VirtualSource::Expression(sql) => {
                        let table = super::quoted(self.table());
                        Expr::raw(format!("({})", sql.replace("{table}", &table)), Vec::new()).order(desc)
                    }
                    VirtualSource::Computed(_) => {
                        tracing::debug!(model = %model, key = %key, "computed field is not sortable, skipped");
                        continue;
                    }
                },
                _ => {
                    tracing::debug!(model = %model, key = %key, "sort key not found, skipped");
                    continue;
                }
            };
            self = self.order_by(term);
        }
        Ok(self)
    }
}
