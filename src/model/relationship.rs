#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// How the two tables of a relationship are connected.
#[derive(Debug, Clone)]
pub enum Link {
    /// This model holds `fk`, pointing at the target primary key.
    BelongsTo { fk: String },
    /// The target holds `fk`, pointing at this model's primary key.
    HasForeign { fk: String },
    /// Association table: `local` points at this model, `remote` at the target.
    Secondary {
        table: String,
        local: String,
        remote: String,
    },
}

#[derive(Debug, Clone)]
pub struct Relationship {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub back_populates: Option<String>,
    pub link: Link,
}

impl Relationship {
    pub fn belongs_to(name: impl Into<String>, target: impl Into<String>, fk: impl Into<String>) -> Self {
        Relationship {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::One,
            back_populates: None,
            link: Link::BelongsTo { fk: fk.into() },
        }
    }

    pub fn has_many(name: impl Into<String>, target: impl Into<String>, fk: impl Into<String>) -> Self {
        Relationship {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::Many,
            back_populates: None,
            link: Link::HasForeign { fk: fk.into() },
        }
    }

    pub fn has_one(name: impl Into<String>, target: impl Into<String>, fk: impl Into<String>) -> Self {
        Relationship {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::One,
            back_populates: None,
            link: Link::HasForeign { fk: fk.into() },
        }
    }

    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        table: impl Into<String>,
        local: impl Into<String>,
        remote: impl Into<String>,
    ) -> Self {
        Relationship {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::Many,
            back_populates: None,
            link: Link::Secondary {
                table: table.into(),
                local: local.into(),
                remote: remote.into(),
            },
        }
    }

    pub fn back_populates(mut self, name: impl Into<String>) -> Self {
        self.back_populates = Some(name.into());
        self
    }

    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}
