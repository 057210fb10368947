/// Output naming
///
/// This module handles:
/// - Placeholder values per image (context.rs)
/// - The naming schema grammar (schema.rs)
/// - Absolute output paths (path.rs)

pub mod context;
pub mod path;
pub mod schema;

pub use context::PlaceholderContext;
pub use path::PathBuilder;
pub use schema::{Evaluation, SchemaEngine, SchemaIssue};
