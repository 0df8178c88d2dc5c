//! Source compiler collaborator
//!
//! The compile gate only needs `compile(source) -> CompileResult`. Real
//! deployments can wire the DAML SDK behind [`SourceCompiler`]; the built-in
//! [`StructuralCompiler`] catches the structural errors that make a source
//! impossible to reason about.

use crate::daml;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of compiling one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileResult {
    /// Whether the source compiled
    pub ok: bool,
    /// Compiler diagnostics, verbatim
    pub diagnostics: Vec<String>,
}

impl CompileResult {
    /// Successful compilation with no diagnostics
    pub fn success() -> Self {
        Self {
            ok: true,
            diagnostics: Vec::new(),
        }
    }

    /// Failed compilation
    pub fn failure(diagnostics: Vec<String>) -> Self {
        Self {
            ok: false,
            diagnostics,
        }
    }
}

/// External compiler contract
///
/// Implementations must be side-effect free and deterministic for identical
/// input.
#[async_trait]
pub trait SourceCompiler: Send + Sync {
    /// Compile one source
    async fn compile(&self, source: &str) -> CompileResult;
}

/// Deterministic structural checker
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralCompiler;

impl StructuralCompiler {
    /// Create a new structural compiler
    pub fn new() -> Self {
        Self
    }

    /// Run every structural check and collect diagnostics
    pub fn check(&self, source: &str) -> CompileResult {
        let stripped = daml::strip_comments(source);
        if stripped.trim().is_empty() {
            return CompileResult::failure(vec!["source is empty".to_string()]);
        }

        let mut diagnostics = bracket_diagnostics(&stripped);

        for template in daml::templates(&stripped) {
            if template.name.is_empty() {
                diagnostics.push(format!(
                    "line {}: template declaration is missing a name",
                    template.line
                ));
                continue;
            }
            if !template.name.starts_with(|c: char| c.is_ascii_uppercase()) {
                diagnostics.push(format!(
                    "line {}: template name '{}' must start with an uppercase letter",
                    template.line, template.name
                ));
            }
            if !template.has_where {
                diagnostics.push(format!(
                    "line {}: template '{}' has no where block",
                    template.line, template.name
                ));
            }
        }

        if diagnostics.is_empty() {
            CompileResult::success()
        } else {
            CompileResult::failure(diagnostics)
        }
    }
}

#[async_trait]
impl SourceCompiler for StructuralCompiler {
    async fn compile(&self, source: &str) -> CompileResult {
        self.check(source)
    }
}

/// Report unmatched `()`, `[]` and `{}` outside string literals
fn bracket_diagnostics(source: &str) -> Vec<String> {
    let mut diagnostics = Vec::new();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut in_string = false;
    let mut escaped = false;

    for c in source.chars() {
        if c == '\n' {
            line += 1;
        }
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => diagnostics.push(format!(
                        "line {}: '{}' does not close '{}' opened on line {}",
                        line, c, open, open_line
                    )),
                    None => diagnostics.push(format!("line {}: unexpected '{}'", line, c)),
                }
            }
            _ => {}
        }
    }

    if in_string {
        diagnostics.push(format!("line {}: unterminated string literal", line));
    }
    for (open, open_line) in stack {
        diagnostics.push(format!("line {}: unclosed '{}'", open_line, open));
    }
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_well_formed_source_compiles() {
        let result = StructuralCompiler::new()
            .compile("template Limited with owner: Party where signatory owner")
            .await;
        assert_eq!(result, CompileResult::success());
    }

    #[test]
    fn test_unbalanced_block_is_rejected() {
        let result = StructuralCompiler::new().check(
            "template Broken\n  with owner: Party\n  where\n    signatory (owner\n",
        );
        assert!(!result.ok);
        assert_eq!(result.diagnostics, vec!["line 4: unclosed '('"]);
    }

    #[test]
    fn test_mismatched_and_stray_brackets() {
        let result = StructuralCompiler::new()
            .check("template T with p: Party where signatory [p)\nx = ]");
        assert!(!result.ok);
        assert!(result.diagnostics[0].contains("')' does not close '['"));
        assert!(result.diagnostics[1].contains("unexpected ']'"));
    }

    #[test]
    fn test_brackets_in_strings_and_comments_are_ignored() {
        let result = StructuralCompiler::new().check(
            "-- (\ntemplate T with p: Party where signatory p\n  agreement \"([\"",
        );
        assert!(result.ok, "{:?}", result.diagnostics);
    }

    #[test]
    fn test_template_structure_checks() {
        let compiler = StructuralCompiler::new();

        let missing_where = compiler.check("template Draft with owner: Party");
        assert_eq!(
            missing_where.diagnostics,
            vec!["line 1: template 'Draft' has no where block"]
        );

        let lowercase = compiler.check("template draft with owner: Party where signatory owner");
        assert!(lowercase.diagnostics[0].contains("must start with an uppercase letter"));

        let unnamed = compiler.check("template with owner: Party where signatory owner");
        assert!(unnamed.diagnostics[0].contains("missing a name"));
    }

    #[test]
    fn test_empty_source() {
        let result = StructuralCompiler::new().check("  -- only a comment\n");
        assert_eq!(result.diagnostics, vec!["source is empty"]);
    }
}
