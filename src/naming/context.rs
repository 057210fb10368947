/// Placeholder values for one image
///
/// A context is built once per image and then only read by the schema engine.
/// Keys follow the schema grammar: `r`, `s`, `e`, `oc`, `c`, `o`, `n`.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Values substituted into a naming schema
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderContext {
    /// `[r]` - name of the selected input folder
    pub root: String,
    /// `[s]` - group name
    pub subfolder: String,
    /// `[e]` - output extension including the dot (e.g. ".jpg")
    pub extension: String,
    /// `[oc]` - original file stem with trailing digits removed
    pub original_clean: String,
    /// `[c]` - custom name typed by the operator
    pub custom: String,
    /// `[o]` - original file stem
    pub original: String,
    /// `[n]` - sequence number
    pub number: u32,
}

/// Matches a trailing run of digits, optionally preceded by one underscore
fn trailing_digits() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_?\d+$").expect("static regex"))
}

impl PlaceholderContext {
    /// Build the context for one input image
    ///
    /// `root_folder` may be a full path; only its last component is used.
    /// An empty extension defaults to ".jpg".
    pub fn for_image(
        input_path: &Path,
        root_folder: &str,
        group_name: &str,
        custom_name: &str,
        number: u32,
        extension: &str,
    ) -> Self {
        let original = input_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let original_clean = trailing_digits().replace(&original, "").to_string();

        let root = Path::new(root_folder)
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let extension = if extension.is_empty() {
            ".jpg".to_string()
        } else {
            extension.to_string()
        };

        Self {
            root,
            subfolder: group_name.to_string(),
            extension,
            original_clean,
            custom: custom_name.to_string(),
            original,
            number,
        }
    }

    /// Same context with a different sequence number
    pub fn with_number(&self, number: u32) -> Self {
        Self {
            number,
            ..self.clone()
        }
    }

    /// Look up a placeholder key. `n` is rendered unpadded.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "r" => self.root.clone(),
            "s" => self.subfolder.clone(),
            "e" => self.extension.clone(),
            "oc" => self.original_clean.clone(),
            "c" => self.custom.clone(),
            "o" => self.original.clone(),
            "n" => self.number.to_string(),
            _ => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_image_strips_trailing_numbers() {
        let ctx = PlaceholderContext::for_image(
            Path::new("/shots/chineseVase05/CAM01_IMG001.NEF"),
            "/shots/chineseVase05",
            "crossPolarized",
            "",
            3,
            ".jpg",
        );

        assert_eq!(ctx.root, "chineseVase05");
        assert_eq!(ctx.subfolder, "crossPolarized");
        assert_eq!(ctx.original, "CAM01_IMG001");
        assert_eq!(ctx.original_clean, "CAM01_IMG");
        assert_eq!(ctx.get("n").as_deref(), Some("3"));
    }

    #[test]
    fn test_underscore_before_digits_is_removed() {
        let ctx = PlaceholderContext::for_image(Path::new("IMG_0042.dng"), "", "", "", 1, ".png");
        assert_eq!(ctx.original_clean, "IMG");
        assert_eq!(ctx.root, "");
        assert_eq!(ctx.extension, ".png");
    }

    #[test]
    fn test_empty_extension_defaults_to_jpg() {
        let ctx = PlaceholderContext::for_image(Path::new("a.nef"), "", "", "", 1, "");
        assert_eq!(ctx.extension, ".jpg");
        assert_eq!(ctx.get("x"), None);
    }
}
