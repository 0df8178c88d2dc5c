//! Lexical view of DAML source
//!
//! This is not a parser. It splits source into template blocks and pulls out
//! the authorization clauses by keyword position, which is enough for the
//! structural compile check, the pattern detectors and the pattern strategy.
//! Anything that needs real semantics goes to the reasoning collaborator.

use regex::Regex;
use std::sync::LazyLock;

static LINE_COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"--[^\n]*").unwrap());

static BLOCK_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{-[\s\S]*?-\}").unwrap());

static TEMPLATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\btemplate\b").unwrap());

static KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(with|where|signatory|observer|controller|choice|nonconsuming|preconsuming|postconsuming|do|ensure|key|maintainer|agreement|can)\b",
    )
    .unwrap()
});

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_']*)").unwrap());

static FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-z_][A-Za-z0-9_']*)\s*:\s*(\[\s*[A-Z][A-Za-z0-9_.]*\s*\]|[A-Z][A-Za-z0-9_.]*)")
        .unwrap()
});

/// Authorization-relevant clause kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    Signatory,
    Observer,
    Controller,
}

/// One `signatory`/`observer`/`controller` clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    /// Clause keyword
    pub kind: ClauseKind,
    /// Raw text after the keyword, up to the next keyword
    pub text: String,
    /// Choice the clause belongs to, for controllers declared inside a choice
    pub choice: Option<String>,
    /// 1-based line of the clause keyword
    pub line: usize,
}

impl Clause {
    /// Party expressions named by the clause, whitespace-normalized
    pub fn parties(&self) -> Vec<String> {
        self.text
            .split(',')
            .map(|part| part.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|part| !part.is_empty())
            .collect()
    }
}

/// A `name : Type` field from a template's `with` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: String,
}

impl Field {
    /// Whether the field holds a list, e.g. `[Party]`
    pub fn is_list(&self) -> bool {
        self.ty.starts_with('[')
    }

    /// Element type with list brackets removed
    pub fn base_type(&self) -> &str {
        self.ty.trim_matches(|c| c == '[' || c == ']').trim()
    }
}

/// One template block
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSource {
    /// Declared name; empty when the declaration has none
    pub name: String,
    /// 1-based line of the `template` keyword
    pub line: usize,
    /// Whether a `where` block follows the header
    pub has_where: bool,
    /// Fields from the header's `with` block
    pub fields: Vec<Field>,
    /// Authorization clauses from the body, in source order
    pub clauses: Vec<Clause>,
    /// Declared choice names, in source order
    pub choices: Vec<String>,
    /// Whether the body has an `ensure` clause
    pub has_ensure: bool,
}

impl TemplateSource {
    /// Clauses of one kind
    pub fn clauses_of(&self, kind: ClauseKind) -> impl Iterator<Item = &Clause> {
        self.clauses.iter().filter(move |c| c.kind == kind)
    }

    /// Whether the template declares a clause of this kind
    pub fn has_clause(&self, kind: ClauseKind) -> bool {
        self.clauses_of(kind).next().is_some()
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Replace comments with whitespace, keeping line numbers intact
pub fn strip_comments(source: &str) -> String {
    let without_blocks = BLOCK_COMMENT_RE.replace_all(source, |caps: &regex::Captures| {
        caps[0].chars().filter(|c| *c == '\n').collect::<String>()
    });
    LINE_COMMENT_RE.replace_all(&without_blocks, "").into_owned()
}

/// 1-based line number of a byte offset
pub fn line_of(text: &str, offset: usize) -> usize {
    text[..offset.min(text.len())].matches('\n').count() + 1
}

/// Split comment-stripped source into template blocks
pub fn templates(source: &str) -> Vec<TemplateSource> {
    let starts: Vec<(usize, usize)> = TEMPLATE_RE
        .find_iter(source)
        .map(|m| (m.start(), m.end()))
        .collect();

    starts
        .iter()
        .enumerate()
        .map(|(i, (start, end))| {
            let stop = starts.get(i + 1).map(|(s, _)| *s).unwrap_or(source.len());
            scan_template(&source[*end..stop], line_of(source, *start))
        })
        .collect()
}

fn scan_template(text: &str, line: usize) -> TemplateSource {
    let name = IDENT_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|name| !KEYWORD_RE.is_match(name))
        .unwrap_or_default();

    let keywords: Vec<regex::Match<'_>> = KEYWORD_RE.find_iter(text).collect();
    let where_idx = keywords.iter().position(|m| m.as_str() == "where");

    let header_end = where_idx.map(|i| keywords[i].start()).unwrap_or(text.len());
    let header = &text[..header_end];
    let with_end = keywords
        .iter()
        .take_while(|m| m.start() < header_end)
        .find(|m| m.as_str() == "with")
        .map(|m| m.end());
    let fields = match with_end {
        Some(pos) => FIELD_RE
            .captures_iter(&header[pos..])
            .map(|caps| Field {
                name: caps[1].to_string(),
                ty: caps[2].split_whitespace().collect::<String>(),
            })
            .collect(),
        None => Vec::new(),
    };

    let mut template = TemplateSource {
        name,
        line,
        has_where: where_idx.is_some(),
        fields,
        clauses: Vec::new(),
        choices: Vec::new(),
        has_ensure: false,
    };

    let Some(where_idx) = where_idx else {
        return template;
    };

    let body = &keywords[where_idx + 1..];
    let mut current_choice: Option<String> = None;

    for (i, keyword) in body.iter().enumerate() {
        let clause_end = body.get(i + 1).map(|m| m.start()).unwrap_or(text.len());
        let clause_text = &text[keyword.end()..clause_end];
        let clause_line = line + line_of(text, keyword.start()) - 1;

        match keyword.as_str() {
            "choice" => {
                if let Some(caps) = IDENT_RE.captures(clause_text) {
                    let choice = caps[1].to_string();
                    template.choices.push(choice.clone());
                    current_choice = Some(choice);
                }
            }
            "signatory" => template.clauses.push(Clause {
                kind: ClauseKind::Signatory,
                text: clause_text.trim().to_string(),
                choice: None,
                line: clause_line,
            }),
            "observer" => template.clauses.push(Clause {
                kind: ClauseKind::Observer,
                text: clause_text.trim().to_string(),
                choice: None,
                line: clause_line,
            }),
            "controller" => template.clauses.push(Clause {
                kind: ClauseKind::Controller,
                text: clause_text.trim().to_string(),
                choice: current_choice.clone(),
                line: clause_line,
            }),
            "ensure" => template.has_ensure = true,
            _ => {}
        }
    }

    template
}
