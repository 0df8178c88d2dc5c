//! Deterministic anti-pattern detectors for the pattern gate
//!
//! Findings are advisory. They never stop the pipeline; they ride along as
//! warnings on the final verdict.

use crate::daml::{self, ClauseKind, TemplateSource};
use serde::{Deserialize, Serialize};

/// Numeric field types that should be bounded by an `ensure` clause
const NUMERIC_TYPES: &[&str] = &["Decimal", "Int", "Numeric"];

/// Which detector produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detector {
    MissingSignatory,
    MissingController,
    BroadController,
    UnvalidatedNumeric,
}

/// One detector hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Detector that fired
    pub detector: Detector,
    /// Template the finding refers to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Human-readable explanation
    pub message: String,
}

impl Finding {
    fn new(detector: Detector, template: Option<&str>, message: String) -> Self {
        Self {
            detector,
            template: template.map(str::to_string),
            message,
        }
    }
}

/// Run every detector over the source
pub fn detect(source: &str) -> Vec<Finding> {
    let templates = daml::templates(&daml::strip_comments(source));

    if templates.is_empty() {
        return vec![Finding::new(
            Detector::MissingSignatory,
            None,
            "No signatories defined: the source declares no templates".to_string(),
        )];
    }

    let mut findings = Vec::new();
    for template in &templates {
        missing_signatory(template, &mut findings);
        missing_controller(template, &mut findings);
        broad_controller(template, &mut findings);
        unvalidated_numeric(template, &mut findings);
    }
    findings
}

fn missing_signatory(template: &TemplateSource, findings: &mut Vec<Finding>) {
    if !template.has_clause(ClauseKind::Signatory) {
        findings.push(Finding::new(
            Detector::MissingSignatory,
            Some(&template.name),
            format!(
                "No signatories defined for template '{}'; the contract might be unauthorized",
                template.name
            ),
        ));
    }
}

fn missing_controller(template: &TemplateSource, findings: &mut Vec<Finding>) {
    for choice in &template.choices {
        let controlled = template
            .clauses_of(ClauseKind::Controller)
            .any(|c| c.choice.as_deref() == Some(choice.as_str()));
        if !controlled {
            findings.push(Finding::new(
                Detector::MissingController,
                Some(&template.name),
                format!(
                    "No controllers defined for choice '{}' in template '{}'; the choice may be unusable",
                    choice, template.name
                ),
            ));
        }
    }
}

fn broad_controller(template: &TemplateSource, findings: &mut Vec<Finding>) {
    for clause in template.clauses_of(ClauseKind::Controller) {
        let parties = clause.parties();
        let list_fields: Vec<&str> = parties
            .iter()
            .filter_map(|p| template.field(p))
            .filter(|f| f.is_list())
            .map(|f| f.name.as_str())
            .collect();

        if parties.len() > 1 || !list_fields.is_empty() {
            let scope = match &clause.choice {
                Some(choice) => format!("choice '{}'", choice),
                None => format!("template '{}'", template.name),
            };
            findings.push(Finding::new(
                Detector::BroadController,
                Some(&template.name),
                format!(
                    "Overly broad controller set for {}: {}",
                    scope,
                    parties.join(", ")
                ),
            ));
        }
    }
}

fn unvalidated_numeric(template: &TemplateSource, findings: &mut Vec<Finding>) {
    if template.has_ensure {
        return;
    }

    let numeric: Vec<&str> = template
        .fields
        .iter()
        .filter(|f| NUMERIC_TYPES.contains(&f.base_type()))
        .map(|f| f.name.as_str())
        .collect();

    if !numeric.is_empty() {
        findings.push(Finding::new(
            Detector::UnvalidatedNumeric,
            Some(&template.name),
            format!(
                "Numeric fields without an ensure clause in template '{}': {}",
                template.name,
                numeric.join(", ")
            ),
        ));
    }
}
