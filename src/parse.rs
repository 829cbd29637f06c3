//! Import reference extraction.
//!
//! A registry of per-file-type parsers turns raw module text into an ordered
//! list of import refs with their source positions. Positions point at the
//! ref text itself, not the surrounding quote or call syntax, so the joiner
//! can splice module identifiers in place later.
//!
//! A file type with no registered parser yields no imports; such modules are
//! leaves, not errors.

use regex::Regex;
use smallvec::SmallVec;

/// One import reference found in module text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedImport {
    /// The textual ref, e.g. `./util` or `left-pad/map`.
    pub source: String,
    /// Zero-based line of the ref.
    pub line: u32,
    /// Byte index of the ref text within the module body.
    pub index: usize,
}

/// Which comment syntax to skip refs inside of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// Line `//` and block `/* */` comments.
    Code,
    /// Block comments only, as in CSS.
    Block,
}

/// How a parser claims file types.
#[derive(Debug)]
enum TypeMatch {
    /// Exact file type, e.g. `.sass`. Preferred over patterns.
    Exact(String),
    /// Matches against the file type string, e.g. `\.s?css$`.
    Pattern(Regex),
}

pub struct ImportParser {
    matcher: TypeMatch,
    /// Every pattern must expose the ref as capture group 1. A ref matched
    /// by two patterns at the same position is counted once.
    patterns: SmallVec<[Regex; 2]>,
    comments: CommentStyle,
}

impl ImportParser {
    pub fn exact(file_type: &str, patterns: &[&str], comments: CommentStyle) -> Self {
        Self {
            matcher: TypeMatch::Exact(file_type.to_string()),
            patterns: compile(patterns),
            comments,
        }
    }

    pub fn pattern(file_type_re: &str, patterns: &[&str], comments: CommentStyle) -> Self {
        Self {
            matcher: TypeMatch::Pattern(Regex::new(file_type_re).expect("invalid file type regex")),
            patterns: compile(patterns),
            comments,
        }
    }

    fn matches_exact(&self, file_type: &str) -> bool {
        matches!(&self.matcher, TypeMatch::Exact(ty) if ty == file_type)
    }

    fn matches_pattern(&self, file_type: &str) -> bool {
        matches!(&self.matcher, TypeMatch::Pattern(re) if re.is_match(file_type))
    }

    fn parse(&self, code: &str) -> Vec<ParsedImport> {
        let comments = comment_spans(code, self.comments);
        let line_starts = line_starts(code);

        let mut seen = rustc_hash::FxHashSet::default();
        let mut imports = Vec::new();
        for pattern in &self.patterns {
            for caps in pattern.captures_iter(code) {
                let Some(m) = caps.get(1) else { continue };
                let index = m.start();
                if in_comment(&comments, index) || !seen.insert(index) {
                    continue;
                }
                imports.push(ParsedImport {
                    source: m.as_str().to_string(),
                    line: line_of(&line_starts, index),
                    index,
                });
            }
        }
        imports.sort_by_key(|imp| imp.index);
        imports
    }
}

fn compile(patterns: &[&str]) -> SmallVec<[Regex; 2]> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("invalid import pattern"))
        .collect()
}

/// Per-file-type parser registry. An exact type match wins over a pattern
/// match when both apply.
pub struct ParserRegistry {
    parsers: Vec<ImportParser>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ParserRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// Registry with the stock `.js`, `.css`/`.scss` and `.sass` parsers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.add(ImportParser::pattern(
            r"\.js$",
            &[
                r#"\brequire\(\s*['"]([^'"\n]+)['"]\s*\)"#,
                r#"\bimport\s+(?:[\w$*{},\s]+?\s+from\s+)?['"]([^'"\n]+)['"]"#,
            ],
            CommentStyle::Code,
        ));
        registry.add(ImportParser::pattern(
            r"\.s?css$",
            &[r#"@import\s+['"]([^'"\n]+)['"]\s*;"#],
            CommentStyle::Block,
        ));
        registry.add(ImportParser::exact(
            ".sass",
            &[r#"@import\s+['"]?([^'"\n]+)"#],
            CommentStyle::Block,
        ));
        registry
    }

    pub fn add(&mut self, parser: ImportParser) {
        self.parsers.push(parser);
    }

    /// Parse imports for the given file type, or `None` when no parser
    /// claims the type.
    pub fn parse(&self, file_type: &str, code: &str) -> Option<Vec<ParsedImport>> {
        let parser = self
            .parsers
            .iter()
            .find(|p| p.matches_exact(file_type))
            .or_else(|| self.parsers.iter().find(|p| p.matches_pattern(file_type)))?;
        Some(parser.parse(code))
    }
}

// =============================================================================
// Position Helpers
// =============================================================================

/// Byte offsets where each line begins.
fn line_starts(code: &str) -> Vec<usize> {
    let mut starts = vec![0];
    starts.extend(code.match_indices('\n').map(|(i, _)| i + 1));
    starts
}

fn line_of(starts: &[usize], index: usize) -> u32 {
    (starts.partition_point(|&s| s <= index) - 1) as u32
}

/// Byte ranges covered by comments. String literals are not tracked; an
/// import-looking token inside a string is a pathological case the original
/// grammar ignores as well.
fn comment_spans(code: &str, style: CommentStyle) -> Vec<(usize, usize)> {
    let bytes = code.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'/' && bytes[i + 1] == b'*' {
            let end = code[i + 2..]
                .find("*/")
                .map(|off| i + 2 + off + 2)
                .unwrap_or(bytes.len());
            spans.push((i, end));
            i = end;
        } else if style == CommentStyle::Code && bytes[i] == b'/' && bytes[i + 1] == b'/' {
            let end = code[i..]
                .find('\n')
                .map(|off| i + off)
                .unwrap_or(bytes.len());
            spans.push((i, end));
            i = end;
        } else {
            i += 1;
        }
    }
    spans
}

fn in_comment(spans: &[(usize, usize)], index: usize) -> bool {
    spans.iter().any(|&(start, end)| index >= start && index < end)
}
