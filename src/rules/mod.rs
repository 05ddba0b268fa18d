//! Business rules: boolean correlation over host and service states
//!
//! A rule is parsed once into a [`RuleNode`] tree whose leaves are arena
//! ids, then evaluated against a [`StateSnapshot`] every time the owning
//! entity is checked.

pub mod evaluator;
pub mod node;
pub mod parser;
pub mod selector;

pub use evaluator::{evaluate, LeafState, StateSnapshot};
pub use node::{NofThresholds, RuleNode, Threshold};
pub use parser::{expand_macros, BusinessRuleParser, ParsedRule, RuleError};
pub use selector::Selector;

use std::collections::HashMap;

use crate::model::{Registry, Status};

/// Rule attached to an entity whose check is the rule itself
#[derive(Debug, Clone)]
pub struct BusinessRule {
    /// Source text, possibly containing `$MACRO$`s
    pub expression: String,
    pub root: RuleNode,
    /// Configuration-time problems found while parsing
    pub diagnostics: Vec<RuleError>,
    /// Re-expand macros and reparse strictly on every check
    pub rebuild_each_check: bool,
}

impl BusinessRule {
    /// Lenient compile used at configuration time
    pub fn compile(
        expression: &str,
        vars: &HashMap<String, String>,
        registry: &Registry,
        rebuild_each_check: bool,
    ) -> Self {
        let parser = BusinessRuleParser::new(registry);
        let (root, diagnostics) = match expand_macros(expression, vars) {
            Ok(text) => {
                let parsed = parser.parse(&text);
                (parsed.root, parsed.diagnostics)
            }
            Err(error) => (RuleNode::and(Vec::new()), vec![error]),
        };

        for diagnostic in &diagnostics {
            tracing::warn!(rule = %expression, error = %diagnostic, "Business rule diagnostic");
        }

        Self {
            expression: expression.to_string(),
            root,
            diagnostics,
            rebuild_each_check,
        }
    }

    /// Evaluate for one check cycle.
    ///
    /// Rules flagged `rebuild_each_check` are re-expanded and parsed
    /// strictly; any failure is returned for the caller to report as
    /// UNKNOWN for this cycle only.
    pub fn evaluate_cycle(
        &self,
        vars: &HashMap<String, String>,
        registry: &Registry,
    ) -> Result<Status, RuleError> {
        if !self.rebuild_each_check {
            return Ok(evaluate(&self.root, registry));
        }
        let text = expand_macros(&self.expression, vars)?;
        let root = BusinessRuleParser::new(registry).parse_strict(&text)?;
        Ok(evaluate(&root, registry))
    }
}
