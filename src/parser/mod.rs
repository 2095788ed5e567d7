//! Parser for tagged AI output.
//!
//! ```text
//! <explanation>...</explanation>
//! <package>name</package>
//! <packages>name1, name2
//! name3</packages>
//! <file path="src/App.jsx">...</file>
//! <command>npm run build</command>
//! <structure>...</structure>
//! ```
//!
//! Output may be cut off mid-stream, so `<file>` tags are accepted without a
//! closing tag. When a path occurs more than once, one version wins:
//!
//! 1. the first occurrence is stored;
//! 2. a closed version replaces an unterminated one;
//! 3. between two closed versions the longer wins;
//! 4. between two unterminated versions the longer wins.
//!
//! This is a heuristic. Completeness outranks recency, and more content is
//! assumed to be more complete.

pub mod scanner;

use scanner::{TagScanner, Termination};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFile {
    pub path: String,
    pub content: String,
    pub is_complete: bool,
}

/// Non-fatal findings. The affected content is still used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ParseWarning {
    /// The file tag was never closed.
    Truncated { path: String },
    /// Content contains a bare `...` placeholder.
    SuspectEllipsis { path: String },
    /// A file tag carried no `path` attribute and was skipped.
    MissingPath,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseWarning::Truncated { path } => write!(f, "{path} appears truncated (no closing tag)"),
            ParseWarning::SuspectEllipsis { path } => {
                write!(f, "{path} contains an ellipsis placeholder and may be incomplete")
            }
            ParseWarning::MissingPath => write!(f, "file tag without a path attribute was skipped"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedResponse {
    pub files: Vec<ParsedFile>,
    /// Singular-tag packages first, then bulk-block packages. Not deduplicated.
    pub packages: Vec<String>,
    pub commands: Vec<String>,
    pub structure: Option<String>,
    pub explanation: String,
    pub warnings: Vec<ParseWarning>,
}

impl ParsedResponse {
    pub fn file_paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

/// Parse a (possibly truncated) AI response. Never fails.
pub fn parse(text: &str) -> ParsedResponse {
    let mut warnings = Vec::new();
    let files = extract_files(text, &mut warnings);

    for file in &files {
        if !file.is_complete {
            warnings.push(ParseWarning::Truncated {
                path: file.path.clone(),
            });
        }
        if has_bare_ellipsis(&file.content) {
            warnings.push(ParseWarning::SuspectEllipsis {
                path: file.path.clone(),
            });
        }
    }

    ParsedResponse {
        files,
        packages: extract_packages(text),
        commands: closed_bodies(text, "command"),
        structure: first_body(text, "structure"),
        explanation: first_body(text, "explanation").unwrap_or_default(),
        warnings,
    }
}

fn extract_files(text: &str, warnings: &mut Vec<ParseWarning>) -> Vec<ParsedFile> {
    let mut files: Vec<ParsedFile> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for tag in TagScanner::new(text, "file", Termination::AllowUnterminated) {
        let path = tag.attr("path").map(str::trim).unwrap_or_default();
        if path.is_empty() {
            warnings.push(ParseWarning::MissingPath);
            continue;
        }

        let candidate = ParsedFile {
            path: path.to_string(),
            content: tag.body.trim().to_string(),
            is_complete: tag.closed,
        };

        match index.get(path) {
            None => {
                index.insert(candidate.path.clone(), files.len());
                files.push(candidate);
            }
            Some(&i) => {
                if supersedes(&candidate, &files[i]) {
                    tracing::debug!(
                        "Replacing {} ({} bytes, complete={}) with {} bytes, complete={}",
                        path,
                        files[i].content.len(),
                        files[i].is_complete,
                        candidate.content.len(),
                        candidate.is_complete
                    );
                    files[i] = candidate;
                }
            }
        }
    }

    files
}

fn supersedes(candidate: &ParsedFile, current: &ParsedFile) -> bool {
    match (current.is_complete, candidate.is_complete) {
        (false, true) => true,
        (true, false) => false,
        _ => candidate.content.len() > current.content.len(),
    }
}

fn extract_packages(text: &str) -> Vec<String> {
    let mut packages = closed_bodies(text, "package");

    for block in TagScanner::new(text, "packages", Termination::Closed) {
        packages.extend(
            block
                .body
                .split(['\n', ','])
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        );
    }

    packages
}

fn closed_bodies(text: &str, name: &str) -> Vec<String> {
    TagScanner::new(text, name, Termination::Closed)
        .map(|tag| tag.body.trim().to_string())
        .filter(|body| !body.is_empty())
        .collect()
}

fn first_body(text: &str, name: &str) -> Option<String> {
    TagScanner::new(text, name, Termination::Closed)
        .next()
        .map(|tag| tag.body.trim().to_string())
}

/// `...` not followed by an identifier or bracket (so not a spread), or `…`.
fn has_bare_ellipsis(content: &str) -> bool {
    if content.contains('…') {
        return true;
    }
    content.match_indices("...").any(|(i, _)| {
        let next = content[i + 3..].chars().next();
        !matches!(next, Some(c) if c.is_alphanumeric() || matches!(c, '_' | '$' | '[' | '{' | '(' | '.'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_response_sections() {
        let text = r#"<explanation>
Built a landing page.
</explanation>
<package>framer-motion</package>
<file path="src/App.jsx">export default function App() { return null }</file>
<command>npm run build</command>
<structure>src/App.jsx</structure>"#;

        let parsed = parse(text);
        assert_eq!(parsed.explanation, "Built a landing page.");
        assert_eq!(parsed.packages, vec!["framer-motion"]);
        assert_eq!(parsed.commands, vec!["npm run build"]);
        assert_eq!(parsed.structure.as_deref(), Some("src/App.jsx"));
        assert_eq!(parsed.files.len(), 1);
        assert!(parsed.files[0].is_complete);
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn closed_version_replaces_unterminated_one() {
        let text = r#"<file path="src/App.jsx">export default function App() { return <div>very long partial
<file path="src/App.jsx">export default () => null</file>"#;

        let parsed = parse(text);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].content, "export default () => null");
        assert!(parsed.files[0].is_complete);
    }

    #[test]
    fn unterminated_never_replaces_closed() {
        let text = r#"<file path="a.js">short</file><file path="a.js">much longer but cut off"#;
        let parsed = parse(text);
        assert_eq!(parsed.files[0].content, "short");
        assert!(parsed.files[0].is_complete);
    }

    #[test]
    fn longer_closed_version_wins() {
        let text = r#"<file path="a.js">long content here</file><file path="a.js">short</file>"#;
        assert_eq!(parse(text).files[0].content, "long content here");

        let text = r#"<file path="a.js">short</file><file path="a.js">long content here</file>"#;
        assert_eq!(parse(text).files[0].content, "long content here");
    }

    #[test]
    fn longer_unterminated_version_wins() {
        let text = r#"<file path="a.js">abc<file path="a.js">abcdef"#;
        let parsed = parse(text);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].content, "abcdef");
        assert!(!parsed.files[0].is_complete);
        assert_eq!(
            parsed.warnings,
            vec![ParseWarning::Truncated { path: "a.js".into() }]
        );
    }

    #[test]
    fn truncated_tail_is_captured() {
        let text = r#"<file path="src/index.css">body { margin: 0; }</file>
<file path="src/App.jsx">function App() {
  return <main>"#;
        let parsed = parse(text);
        assert_eq!(parsed.file_paths(), vec!["src/index.css", "src/App.jsx"]);
        assert_eq!(parsed.files[1].content, "function App() {\n  return <main>");
        assert!(!parsed.files[1].is_complete);
    }

    #[test]
    fn packages_from_both_forms_in_order() {
        let text = "<package>three</package><packages>axios, lodash\n@heroicons/react</packages>";
        assert_eq!(
            parse(text).packages,
            vec!["three", "axios", "lodash", "@heroicons/react"]
        );
    }

    #[test]
    fn package_block_drops_empty_entries() {
        let text = "<packages>\n  react-icons,\n\n , zustand ,\n</packages>";
        assert_eq!(parse(text).packages, vec!["react-icons", "zustand"]);
    }

    #[test]
    fn duplicate_packages_are_kept_by_parser() {
        let text = "<package>axios</package><packages>axios</packages>";
        assert_eq!(parse(text).packages, vec!["axios", "axios"]);
    }

    #[test]
    fn ellipsis_placeholder_is_flagged_but_kept() {
        let text = r#"<file path="src/App.jsx">function App() {
  // ... rest of the component
}</file>"#;
        let parsed = parse(text);
        assert_eq!(parsed.files.len(), 1);
        assert!(parsed
            .warnings
            .contains(&ParseWarning::SuspectEllipsis { path: "src/App.jsx".into() }));
    }

    #[test]
    fn spread_operator_is_not_an_ellipsis() {
        assert!(!has_bare_ellipsis("const next = { ...prev, open: true }; f(...args); [...items]"));
        assert!(has_bare_ellipsis("<div>...</div>"));
        assert!(has_bare_ellipsis("Loading…"));
    }

    #[test]
    fn empty_file_content_is_kept() {
        let parsed = parse(r#"<file path="src/empty.css">   </file>"#);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].content, "");
    }

    #[test]
    fn file_without_path_is_skipped_with_warning() {
        let parsed = parse("<file>orphan</file>");
        assert!(parsed.files.is_empty());
        assert_eq!(parsed.warnings, vec![ParseWarning::MissingPath]);
    }

    #[test]
    fn missing_sections_default() {
        let parsed = parse("just prose, no tags");
        assert_eq!(parsed, ParsedResponse::default());
    }
}
