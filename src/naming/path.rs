/// Output path construction
///
/// Joins an evaluated schema onto the output directory and makes up a file
/// name when the schema did not produce one.

use std::path::{Path, PathBuf};

use super::context::PlaceholderContext;
use super::schema::{Evaluation, SchemaEngine};
use crate::state::groups::DEFAULT_GROUP;

/// Builds absolute output paths from schemas
#[derive(Debug, Default, Clone, Copy)]
pub struct PathBuilder {
    engine: SchemaEngine,
}

impl PathBuilder {
    pub fn new() -> Self {
        Self {
            engine: SchemaEngine::new(),
        }
    }

    /// Build the output path for one image from a naming schema.
    ///
    /// A file name produced by the schema is used as-is. When the schema gives
    /// none, `<stem>_<nnnn><ext>` is synthesized in whatever directory it did give.
    pub fn build(&self, schema: &str, context: &PlaceholderContext, base_output_dir: &Path) -> PathBuf {
        let evaluation = self.engine.evaluate(schema, context);

        let mut path = base_output_dir.to_path_buf();
        for segment in evaluation.directory().split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }

        match evaluation {
            Evaluation::Path { filename, .. } => path.join(filename),
            Evaluation::DirectoryOnly { .. } | Evaluation::Invalid => {
                path.join(Self::fallback_filename(context, 4))
            }
        }
    }

    /// Output path used when schema naming is turned off.
    ///
    /// `<custom or stem>_<number padded to width><ext>`, placed in a folder
    /// named after the group unless the image is in the default group.
    pub fn build_sequential(
        &self,
        context: &PlaceholderContext,
        base_output_dir: &Path,
        padding: usize,
    ) -> PathBuf {
        let mut path = base_output_dir.to_path_buf();
        if !context.subfolder.is_empty() && context.subfolder != DEFAULT_GROUP {
            path.push(&context.subfolder);
        }

        let stem = if context.custom.is_empty() {
            &context.original
        } else {
            &context.custom
        };
        path.join(format!(
            "{stem}_{number:0>padding$}{ext}",
            number = context.number,
            ext = context.extension
        ))
    }

    fn fallback_filename(context: &PlaceholderContext, padding: usize) -> String {
        format!(
            "{stem}_{number:0>padding$}{ext}",
            stem = context.original,
            number = context.number,
            ext = context.extension
        )
    }
}
