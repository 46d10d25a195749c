//! Request handlers behind the generated CRUD routes, usable from custom routes too.

mod crud;

pub use crud::{parse_id, Create, Delete, Index, Show, Update};
