//! Plan description
//!
//! Every operator describes itself as a [`PlanNode`]; a statement's nodes
//! form an [`ExplainPlan`] that renders as deterministic indented text or
//! as JSON.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::errors::{ExecError, ExecResult};

/// One operator in a plan description
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanNode {
    pub operator: String,
    /// Ordered so the rendering is deterministic
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_child(mut self, child: PlanNode) -> Self {
        self.children.push(child);
        self
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        writeln!(f, "{}-> {}", indent, self.operator)?;
        for (key, value) in &self.attributes {
            writeln!(f, "{}     {}: {}", indent, key, value)?;
        }
        for child in &self.children {
            child.render(f, depth + 1)?;
        }
        Ok(())
    }
}

/// Description of a whole statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExplainPlan {
    pub root: PlanNode,
    pub streams: usize,
}

impl ExplainPlan {
    pub fn new(root: PlanNode, streams: usize) -> Self {
        Self { root, streams }
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> ExecResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ExecError::execution_failed(format!("Failed to serialize plan: {}", e)))
    }
}

impl fmt::Display for ExplainPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== EXPLAIN PLAN ===")?;
        writeln!(f, "Streams: {}", self.streams)?;
        self.root.render(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ExplainPlan {
        let scan = PlanNode::new("Table Full Scan").with_attribute("table", "ORDERS");
        let root = PlanNode::new("First N Records")
            .with_attribute("count", "10")
            .with_child(scan);
        ExplainPlan::new(root, 1)
    }

    #[test]
    fn test_display_indents_children() {
        let text = sample().to_string();
        assert!(text.starts_with("=== EXPLAIN PLAN ==="));
        assert!(text.contains("-> First N Records\n     count: 10\n"));
        assert!(text.contains("  -> Table Full Scan\n"));
        assert!(text.contains("table: ORDERS"));
    }

    #[test]
    fn test_display_is_deterministic() {
        let node = PlanNode::new("X")
            .with_attribute("b", "2")
            .with_attribute("a", "1");
        let plan = ExplainPlan::new(node, 0);
        let text = plan.to_string();
        assert!(text.find("a: 1").unwrap() < text.find("b: 2").unwrap());
        assert_eq!(text, plan.clone().to_string());
    }

    #[test]
    fn test_to_json() {
        let json = sample().to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["root"]["operator"], "First N Records");
        assert_eq!(parsed["root"]["children"][0]["attributes"]["table"], "ORDERS");
        assert_eq!(parsed["streams"], 1);
    }
}
