//! Business-rule expression parser
//!
//! ```text
//! rule      := [ threshold "of:" ] expr
//! expr      := term { ("|" | ",") term }
//! term      := factor { ("&" | "+") factor }
//! factor    := "!" factor | "(" rule ")" | leaf
//! leaf      := selector [ "," selector ]
//! threshold := count [ "," count [ "," count ] ]
//! count     := [ "-" ] digits [ "%" ]
//! ```
//!
//! Under `of:`, the operands of the top-level `|` (or `&`) become the X-of-Y
//! children. Mixed operators keep their usual precedence, so `2 of: a & b | c`
//! has the two children `a & b` and `c`. Parenthesize to group differently.
//!
//! Parsing is lenient: unresolvable selectors, stray or missing parentheses
//! and bad thresholds are collected as diagnostics and the parser keeps
//! going, producing the best tree it can. [`BusinessRuleParser::parse_strict`]
//! turns the first diagnostic into an error instead.

use std::sync::OnceLock;

use regex::Regex;

use super::node::{NofThresholds, RuleNode, Threshold};
use super::selector::{expand_hosts, expand_services, Selector};
use crate::model::{EntityKind, Registry};

/// Characters that end a selector
const OPERATORS: &[char] = &['(', ')', '&', '+', '|', ',', '!'];

fn threshold_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(-?\d+%?)\s*(?:,\s*(-?\d+%?)\s*)?(?:,\s*(-?\d+%?)\s*)?of:\s*")
            .expect("threshold regex is valid")
    })
}

/// Result of a lenient parse
#[derive(Debug, Clone)]
pub struct ParsedRule {
    pub root: RuleNode,
    pub diagnostics: Vec<RuleError>,
}

impl ParsedRule {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Parses rule text against the entities of a registry
pub struct BusinessRuleParser<'a> {
    registry: &'a Registry,
}

impl<'a> BusinessRuleParser<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Best-effort parse; never fails
    pub fn parse(&self, text: &str) -> ParsedRule {
        let mut cursor = Cursor::new(text, self.registry);
        let root = cursor.parse_rule();
        cursor.skip_ws();
        while let Some(ch) = cursor.peek() {
            if ch != ')' {
                cursor.diagnostics.push(RuleError::UnexpectedChar {
                    ch,
                    offset: cursor.pos,
                });
                break;
            }
            cursor.diagnostics.push(RuleError::UnbalancedParenthesis {
                offset: cursor.pos,
            });
            cursor.bump();
            cursor.skip_ws();
        }

        let root = root.unwrap_or_else(|| {
            if cursor.diagnostics.is_empty() {
                cursor.diagnostics.push(RuleError::Empty);
            }
            RuleNode::and(Vec::new())
        });

        ParsedRule {
            root,
            diagnostics: cursor.diagnostics,
        }
    }

    /// Parse or fail on the first diagnostic
    pub fn parse_strict(&self, text: &str) -> Result<RuleNode, RuleError> {
        let parsed = self.parse(text);
        match parsed.diagnostics.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(parsed.root),
        }
    }
}

struct Cursor<'s> {
    src: &'s str,
    pos: usize,
    registry: &'s Registry,
    diagnostics: Vec<RuleError>,
}

impl<'s> Cursor<'s> {
    fn new(src: &'s str, registry: &'s Registry) -> Self {
        Self {
            src,
            pos: 0,
            registry,
            diagnostics: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(ch) if ch.is_whitespace()) {
            self.bump();
        }
    }

    fn eat(&mut self, expected: &[char]) -> bool {
        self.skip_ws();
        match self.peek() {
            Some(ch) if expected.contains(&ch) => {
                self.bump();
                true
            }
            _ => false,
        }
    }

    fn parse_rule(&mut self) -> Option<RuleNode> {
        let thresholds = self.parse_threshold();
        let node = self.parse_expr();

        let Some(thresholds) = thresholds else {
            return node;
        };

        // The X-of-Y children are the top-level operands of the expression
        let children = match node {
            Some(RuleNode::And {
                children,
                negated: false,
            })
            | Some(RuleNode::Or {
                children,
                negated: false,
            }) => children,
            Some(other) => vec![other],
            None => Vec::new(),
        };
        Some(RuleNode::nof(children, thresholds))
    }

    fn parse_threshold(&mut self) -> Option<NofThresholds> {
        let rest = &self.src[self.pos..];
        let captures = threshold_regex().captures(rest)?;
        let consumed = captures.get(0).map_or(0, |m| m.end());

        let mut values = Vec::with_capacity(3);
        for group in captures.iter().skip(1).flatten() {
            match Threshold::parse(group.as_str()) {
                Some(value) if value.is_in_range() => values.push(value),
                _ => {
                    self.diagnostics
                        .push(RuleError::InvalidThreshold(group.as_str().to_string()));
                    values.push(Threshold::Count(0));
                }
            }
        }
        self.pos += consumed;

        match values.as_slice() {
            [ok, warn, crit] => Some(NofThresholds::multi(*ok, *warn, *crit)),
            [ok, warn] => Some(NofThresholds::partial(*ok, *warn)),
            [ok] => Some(NofThresholds::single(*ok)),
            _ => None,
        }
    }

    fn parse_expr(&mut self) -> Option<RuleNode> {
        let mut terms = Vec::new();
        terms.extend(self.parse_term());
        while self.eat(&['|', ',']) {
            let reported = self.diagnostics.len();
            match self.parse_term() {
                Some(term) => terms.push(term),
                None if self.diagnostics.len() == reported => self.missing_operand(),
                None => {}
            }
        }
        collapse(terms, RuleNode::or)
    }

    fn parse_term(&mut self) -> Option<RuleNode> {
        let mut factors = Vec::new();
        factors.extend(self.parse_factor());
        while self.eat(&['&', '+']) {
            let reported = self.diagnostics.len();
            match self.parse_factor() {
                Some(factor) => factors.push(factor),
                None if self.diagnostics.len() == reported => self.missing_operand(),
                None => {}
            }
        }
        collapse(factors, RuleNode::and)
    }

    fn parse_factor(&mut self) -> Option<RuleNode> {
        self.skip_ws();
        match self.peek()? {
            '!' => {
                self.bump();
                self.parse_factor().map(RuleNode::negate)
            }
            '(' => {
                let open = self.pos;
                self.bump();
                let node = self.parse_rule();
                if !self.eat(&[')']) {
                    self.diagnostics
                        .push(RuleError::UnbalancedParenthesis { offset: open });
                }
                node
            }
            _ => self.parse_leaf(),
        }
    }

    fn parse_leaf(&mut self) -> Option<RuleNode> {
        let host_text = self.read_selector();
        if host_text.is_empty() {
            return None;
        }

        // `host,service`: the comma binds to the leaf before it can be read
        // as an OR
        let service_text = if self.eat(&[',']) {
            let text = self.read_selector();
            if text.is_empty() {
                self.missing_operand();
                None
            } else {
                Some(text)
            }
        } else {
            None
        };

        let host_selector = match Selector::parse_host(&host_text) {
            Ok(selector) => selector,
            Err(error) => {
                self.diagnostics.push(error);
                return None;
            }
        };

        let leaves: Vec<RuleNode> = match service_text {
            None => {
                let hosts = expand_hosts(self.registry, &host_selector);
                if hosts.is_empty() {
                    self.diagnostics.push(RuleError::UnknownHost(host_text));
                    return None;
                }
                hosts.into_iter().map(RuleNode::host).collect()
            }
            Some(service_text) => {
                let service_selector = match Selector::parse_service(&service_text) {
                    Ok(selector) => selector,
                    Err(error) => {
                        self.diagnostics.push(error);
                        return None;
                    }
                };
                let services = expand_services(self.registry, &host_selector, &service_selector);
                if services.is_empty() {
                    self.diagnostics.push(RuleError::UnknownService {
                        host: host_text,
                        service: service_text,
                    });
                    return None;
                }
                services.into_iter().map(RuleNode::service).collect()
            }
        };

        collapse(leaves, RuleNode::and)
    }

    /// Read selector text up to the next operator or whitespace; `\x`
    /// escapes an operator character.
    fn read_selector(&mut self) -> String {
        self.skip_ws();
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            if ch == '\\' {
                self.bump();
                if let Some(escaped) = self.bump() {
                    text.push(escaped);
                }
                continue;
            }
            if ch.is_whitespace() || OPERATORS.contains(&ch) {
                break;
            }
            text.push(ch);
            self.bump();
        }
        text
    }

    fn missing_operand(&mut self) {
        self.diagnostics
            .push(RuleError::MissingOperand { offset: self.pos });
    }
}

fn collapse(mut nodes: Vec<RuleNode>, build: fn(Vec<RuleNode>) -> RuleNode) -> Option<RuleNode> {
    match nodes.len() {
        0 => None,
        1 => nodes.pop(),
        _ => Some(build(nodes)),
    }
}

/// Replace `$NAME$` macros with custom variables
pub fn expand_macros(
    text: &str,
    vars: &std::collections::HashMap<String, String>,
) -> Result<String, RuleError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('$') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &after[..end];
        match vars.get(name) {
            Some(value) => out.push_str(value),
            None => return Err(RuleError::UnresolvedMacro(name.to_string())),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Rule parsing diagnostics
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    #[error("Empty rule expression")]
    Empty,

    #[error("Empty selector")]
    EmptySelector,

    #[error("Unbalanced parenthesis at offset {offset}")]
    UnbalancedParenthesis { offset: usize },

    #[error("Unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("Missing operand at offset {offset}")]
    MissingOperand { offset: usize },

    #[error("Unknown {kind} selector flag '{flag}' in '{selector}'")]
    UnknownFlag {
        flag: char,
        kind: EntityKind,
        selector: String,
    },

    #[error("Invalid regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("No host matches '{0}'")]
    UnknownHost(String),

    #[error("No service matches '{host},{service}'")]
    UnknownService { host: String, service: String },

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Unresolved macro ${0}$")]
    UnresolvedMacro(String),
}
