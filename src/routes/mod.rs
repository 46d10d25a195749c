//! Routers: generated CRUD resources and common service routes.

mod common;
mod crud;

pub use common::common_routes;
pub use crud::{BaseQuery, CrudOptions, CrudRouter};
