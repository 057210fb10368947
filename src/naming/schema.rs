//! Naming schema parser and evaluator
//!
//! A schema is literal text mixed with bracketed placeholders, for example
//! `[r]/[s]/[r]_[s]_[n4][e]`. Evaluation runs three substitution passes in a
//! fixed order:
//!
//! 1. separator tokens `[K-"SEP"]` / `[K+"SEP"]` for `K` in `r o oc s`
//! 2. numbered tokens `[n]` / `[nD]`
//! 3. plain tokens `[r] [s] [e] [oc] [c] [o] [/]`
//!
//! Each pass only scans text that is still literal. Output produced by an
//! earlier pass is never re-matched by a later one, so a folder called
//! `[o]` stays `[o]`.

use regex::{Captures, Regex};
use std::sync::OnceLock;
use thiserror::Error;

use super::context::PlaceholderContext;

/// Longest separator accepted by validation
pub const MAX_SEPARATOR_LEN: usize = 10;

/// Widest zero padding accepted for `[nD]`; u32 numbers never need more
pub const MAX_NUMBER_WIDTH: usize = 10;

/// Characters that cannot appear in file names on every platform
pub const RESERVED_CHARS: [char; 6] = ['<', '>', ':', '|', '?', '*'];

/// Plain placeholders and their descriptions, in help-text order
pub const BASE_PLACEHOLDERS: [(&str, &str); 8] = [
    ("r", "Root folder name"),
    ("s", "Sub folder name (group)"),
    ("e", "File name extension"),
    ("oc", "Original file name without numbers"),
    ("c", "Custom name"),
    ("o", "Original file name"),
    ("n", "Image number"),
    ("/", "New folder layer"),
];

/// A single validation problem
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaIssue {
    #[error("Schema cannot be empty")]
    Empty,

    #[error("Unmatched brackets in schema")]
    UnmatchedBrackets,

    #[error("Unknown placeholder: [{0}]")]
    UnknownPlaceholder(String),

    #[error("Empty separator in [{0}]")]
    EmptySeparator(String),

    #[error("Separator too long in [{0}] (max {MAX_SEPARATOR_LEN} chars)")]
    SeparatorTooLong(String),

    #[error("Number padding too wide in [{0}] (max {MAX_NUMBER_WIDTH} digits)")]
    NumberWidthTooLarge(String),

    #[error("Invalid character '{0}' in schema")]
    ReservedCharacter(char),
}

/// Result of evaluating a schema against one context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Both parts resolved. `directory` may be empty.
    Path { directory: String, filename: String },
    /// The schema produced folders but no file name; the caller must make one up
    DirectoryOnly { directory: String },
    /// Nothing usable came out of the schema
    Invalid,
}

impl Evaluation {
    /// Flatten into `(directory, filename)`, empty strings where absent
    pub fn parts(&self) -> (String, String) {
        match self {
            Evaluation::Path {
                directory,
                filename,
            } => (directory.clone(), filename.clone()),
            Evaluation::DirectoryOnly { directory } => (directory.clone(), String::new()),
            Evaluation::Invalid => (String::new(), String::new()),
        }
    }

    pub fn directory(&self) -> &str {
        match self {
            Evaluation::Path { directory, .. } | Evaluation::DirectoryOnly { directory } => {
                directory
            }
            Evaluation::Invalid => "",
        }
    }

    pub fn filename(&self) -> Option<&str> {
        match self {
            Evaluation::Path { filename, .. } => Some(filename),
            _ => None,
        }
    }
}

/// Either schema text still waiting for substitution, or finished output
#[derive(Debug)]
enum Piece {
    Literal(String),
    Resolved(String),
}

struct Patterns {
    separator: Regex,
    numbered: Regex,
    plain: Regex,
    bracket_body: Regex,
    separator_body: Regex,
    quoted: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        separator: Regex::new(r#"\[(oc|r|o|s)([+-])"([^"]+)"\]"#).expect("static regex"),
        numbered: Regex::new(r"\[n(\d*)\]").expect("static regex"),
        plain: Regex::new(r"\[(oc|r|s|e|c|o|/)\]").expect("static regex"),
        bracket_body: Regex::new(r"\[([^\]]+)\]").expect("static regex"),
        separator_body: Regex::new(r#"^(oc|r|o|s)([+-])"([^"]*)"$"#).expect("static regex"),
        quoted: Regex::new(r#""[^"]*""#).expect("static regex"),
    })
}

/// Run one substitution pass over the literal pieces only
fn substitute<F>(pieces: Vec<Piece>, re: &Regex, mut replace: F) -> Vec<Piece>
where
    F: FnMut(&Captures) -> String,
{
    let mut out = Vec::with_capacity(pieces.len());
    for piece in pieces {
        let text = match piece {
            Piece::Literal(text) => text,
            resolved => {
                out.push(resolved);
                continue;
            }
        };

        let mut last = 0;
        for caps in re.captures_iter(&text) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > last {
                out.push(Piece::Literal(text[last..whole.start()].to_string()));
            }
            out.push(Piece::Resolved(replace(&caps)));
            last = whole.end();
        }
        if last < text.len() {
            out.push(Piece::Literal(text[last..].to_string()));
        }
    }
    out
}

/// `-` keeps the text before the first separator, `+` the text after it
fn split_on_separator(value: &str, operation: &str, separator: &str) -> String {
    match (operation, value.split_once(separator)) {
        ("-", Some((before, _))) => before.to_string(),
        ("-", None) => value.to_string(),
        (_, Some((_, after))) => after.to_string(),
        (_, None) => String::new(),
    }
}

/// Parser and evaluator for naming schemas
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaEngine;

impl SchemaEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `schema` into a directory and a file name.
    ///
    /// Pure: the same schema and context always give the same result.
    /// Never fails; use [`SchemaEngine::validate`] to find problems.
    pub fn evaluate(&self, schema: &str, context: &PlaceholderContext) -> Evaluation {
        if schema.is_empty() {
            return Evaluation::Invalid;
        }

        let p = patterns();
        let pieces = vec![Piece::Literal(schema.to_string())];

        let pieces = substitute(pieces, &p.separator, |caps| {
            let value = context.get(&caps[1]).unwrap_or_default();
            split_on_separator(&value, &caps[2], &caps[3])
        });

        let pieces = substitute(pieces, &p.numbered, |caps| {
            let number = context.number.to_string();
            // Widths past the limit would only pad with zeros
            match caps[1].parse::<usize>() {
                Ok(width) => format!("{number:0>width$}", width = width.min(MAX_NUMBER_WIDTH)),
                Err(_) if caps[1].is_empty() => number,
                Err(_) => format!("{number:0>MAX_NUMBER_WIDTH$}"),
            }
        });

        let pieces = substitute(pieces, &p.plain, |caps| match &caps[1] {
            "/" => "/".to_string(),
            key => context.get(key).unwrap_or_default(),
        });

        let rendered: String = pieces
            .into_iter()
            .map(|piece| match piece {
                Piece::Literal(text) | Piece::Resolved(text) => text,
            })
            .collect();

        let has_extension = schema.contains("[e]");

        let mut segments: Vec<&str> = rendered.split('/').collect();
        let last = segments.pop().unwrap_or_default();
        let directory = segments
            .into_iter()
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");

        let mut filename = last.to_string();
        if !has_extension && !filename.is_empty() {
            filename.push_str(&context.extension);
        }

        match (directory.is_empty(), filename.is_empty()) {
            (true, true) => Evaluation::Invalid,
            (false, true) => Evaluation::DirectoryOnly { directory },
            _ => Evaluation::Path {
                directory,
                filename,
            },
        }
    }

    /// Check a schema without evaluating it. Returns every problem found.
    pub fn validate(&self, schema: &str) -> Vec<SchemaIssue> {
        let mut issues = Vec::new();

        if schema.is_empty() {
            issues.push(SchemaIssue::Empty);
            return issues;
        }

        if schema.matches('[').count() != schema.matches(']').count() {
            issues.push(SchemaIssue::UnmatchedBrackets);
        }

        let p = patterns();
        for caps in p.bracket_body.captures_iter(schema) {
            let body = &caps[1];

            if let Some(sep) = p.separator_body.captures(body) {
                let separator = &sep[3];
                if separator.is_empty() {
                    issues.push(SchemaIssue::EmptySeparator(body.to_string()));
                } else if separator.chars().count() > MAX_SEPARATOR_LEN {
                    issues.push(SchemaIssue::SeparatorTooLong(body.to_string()));
                }
                continue;
            }

            let digits = body
                .strip_prefix('n')
                .filter(|digits| digits.chars().all(|c| c.is_ascii_digit()));
            if let Some(digits) = digits {
                let too_wide = !digits.is_empty()
                    && digits
                        .parse::<usize>()
                        .map_or(true, |width| width > MAX_NUMBER_WIDTH);
                if too_wide {
                    issues.push(SchemaIssue::NumberWidthTooLarge(body.to_string()));
                }
                continue;
            }

            let known = BASE_PLACEHOLDERS.iter().any(|(key, _)| *key == body);
            if !known {
                issues.push(SchemaIssue::UnknownPlaceholder(body.to_string()));
            }
        }

        // Quoted separator bodies may contain anything
        let unquoted = p.quoted.replace_all(schema, "\"\"");
        for c in RESERVED_CHARS {
            if unquoted.contains(c) {
                issues.push(SchemaIssue::ReservedCharacter(c));
            }
        }

        issues
    }

    /// `(ok, issues)` form of [`SchemaEngine::validate`]
    pub fn check(&self, schema: &str) -> (bool, Vec<SchemaIssue>) {
        let issues = self.validate(schema);
        (issues.is_empty(), issues)
    }

    /// Relative output path shown to the operator before a run
    pub fn preview(&self, schema: &str, context: &PlaceholderContext) -> String {
        match self.evaluate(schema, context) {
            Evaluation::Path {
                directory,
                filename,
            } if directory.is_empty() => filename,
            Evaluation::Path {
                directory,
                filename,
            } => format!("{directory}/{filename}"),
            Evaluation::DirectoryOnly { directory } => format!("{directory}/[filename_needed]"),
            Evaluation::Invalid => "[invalid_schema]".to_string(),
        }
    }

    /// Help text listing every placeholder form
    pub fn placeholder_help(&self) -> String {
        let mut help = String::from("Available placeholders:\n");
        for (key, description) in BASE_PLACEHOLDERS {
            help.push_str(&format!("  [{key}]: {description}\n"));
        }

        help.push_str("\nSeparator patterns (K is one of r, o, oc, s):\n");
        help.push_str("  [K-\"sep\"]: text before the first separator\n");
        help.push_str("  [K+\"sep\"]: text after the first separator\n");
        help.push_str("    Example: [oc+\"_\"] from 'CAM01_IMG001' = 'IMG'\n");

        help.push_str("\nNumber padding:\n");
        help.push_str("  [n4]: image number padded to 4 digits (0001, 0002, ...)\n");

        help.push_str("\nExamples:\n");
        help.push_str("  [r]/[s]/[r]_[s]_[n4][e]\n");
        help.push_str("  [oc-\"_\"][n4][e]  # CAM01_IMG001 -> CAM010001.jpg\n");
        help.push_str("  [r-\"_\"]/[r+\"_\"]_[n4][e]  # Split root folder name\n");
        help
    }
}
