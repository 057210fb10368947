/// State management module
///
/// This module handles all working-set state, including:
/// - Folder scanning and supported formats (library.rs)
/// - Image records and their status (data.rs, images.rs)
/// - Group membership and chart assignment (groups.rs)
/// - Per-run adjustments and output settings (edit.rs)
/// - The session tying them together (session.rs)

pub mod data;
pub mod edit;
pub mod groups;
pub mod images;
pub mod library;
pub mod session;

pub use session::Session;
