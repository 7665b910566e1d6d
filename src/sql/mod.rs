//! SQL text handling: statement splitting and lightweight introspection.

pub mod introspect;
pub mod splitter;

pub use introspect::{
    ViewName, contains_view_creation, extract_view_name, is_create_materialized_view,
    is_select_only, references_identifier, requires_autocommit,
};
pub use splitter::split_statements;
