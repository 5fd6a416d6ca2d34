//! Label-based node selectors.
//!
//! A [`NodeSelector`] is an OR of [`NodeSelectorTerm`]s; each term is an
//! AND of [`Requirement`]s. A term with no requirements matches nothing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

/// A single `key <op> values` requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    #[serde(default)]
    pub values: Vec<String>,
}

impl Requirement {
    pub fn new(key: impl Into<String>, operator: Operator, values: Vec<String>) -> Self {
        Self {
            key: key.into(),
            operator,
            values,
        }
    }

    pub fn is_in(key: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(key, Operator::In, values.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => value.is_none_or(|v| !self.values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
            Operator::Gt | Operator::Lt => {
                let (Some(actual), Some(bound)) = (
                    value.and_then(|v| v.parse::<i64>().ok()),
                    self.single_integer(),
                ) else {
                    return false;
                };
                if self.operator == Operator::Gt {
                    actual > bound
                } else {
                    actual < bound
                }
            }
        }
    }

    fn single_integer(&self) -> Option<i64> {
        match self.values.as_slice() {
            [v] => v.parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSelectorTerm {
    #[serde(default)]
    pub match_expressions: Vec<Requirement>,
}

impl NodeSelectorTerm {
    pub fn new(match_expressions: Vec<Requirement>) -> Self {
        Self { match_expressions }
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        !self.match_expressions.is_empty()
            && self.match_expressions.iter().all(|r| r.matches(labels))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSelector {
    #[serde(default)]
    pub terms: Vec<NodeSelectorTerm>,
}

impl NodeSelector {
    pub fn new(terms: Vec<NodeSelectorTerm>) -> Self {
        Self { terms }
    }

    /// A selector with a single term holding `requirements`.
    pub fn from_requirements(requirements: Vec<Requirement>) -> Self {
        Self::new(vec![NodeSelectorTerm::new(requirements)])
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.terms.iter().any(|t| t.matches(labels))
    }

    /// Add `requirement` to every term.
    pub fn require(&mut self, requirement: Requirement) {
        if self.terms.is_empty() {
            self.terms.push(NodeSelectorTerm::default());
        }
        for term in &mut self.terms {
            term.match_expressions.push(requirement.clone());
        }
    }
}

/// A weighted soft-affinity term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredTerm {
    pub weight: i64,
    pub preference: NodeSelectorTerm,
}
