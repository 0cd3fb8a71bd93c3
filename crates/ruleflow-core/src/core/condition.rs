// ruleflow-core/src/core/condition.rs
// ============================================================================
// Module: Ruleflow Conditions
// Description: Condition tree, sources, and the closed operator set.
// Purpose: Define the Boolean algebra evaluated against binding contexts.
// Dependencies: crate::core, serde, smallvec
// ============================================================================

//! ## Overview
//! Conditions form a tree: leaves pair a value source with an operator, and
//! groups combine children with `and`/`or`/`not`. The operator set is closed;
//! unary operators forbid a comparison value while all others require one.
//! Comparison values may be literals or `{ref}` references resolved against
//! the binding context at evaluation time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;

// ============================================================================
// SECTION: Condition Tree
// ============================================================================

/// One node of a rule's condition tree.
///
/// Groups deserialize first so that leaf operators never shadow the
/// combinator grammar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    /// Combinator over child conditions.
    Group(ConditionGroup),
    /// Source/operator/value leaf.
    Leaf(ConditionLeaf),
}

/// Combinator node joining child conditions.
///
/// # Invariants
/// - `not` requires exactly one child; validation enforces this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionGroup {
    /// Combinator applied to the children, in listed order.
    pub operator: GroupOperator,
    /// Child conditions.
    pub conditions: SmallVec<[Box<Condition>; 4]>,
}

/// Boolean combinators for condition groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupOperator {
    /// All children must hold; short-circuits on the first failure.
    And,
    /// At least one child must hold; short-circuits on the first success.
    Or,
    /// Inverts the single child.
    Not,
}

/// Leaf condition pairing a source with an operator and optional value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionLeaf {
    /// Where the left-hand value comes from.
    pub source: ConditionSource,
    /// Comparison operator.
    pub operator: Operator,
    /// Right-hand value; forbidden for unary operators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ConditionValue>,
}

// ============================================================================
// SECTION: Condition Sources
// ============================================================================

/// Baseline comparison modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BaselineComparison {
    /// Live value is above the rolling baseline by the sensitivity ratio.
    Above,
    /// Live value is below the rolling baseline by the sensitivity ratio.
    Below,
    /// Live value deviates from the mean by sensitivity standard deviations.
    Deviates,
}

/// Left-hand value source for a leaf condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConditionSource {
    /// Value of the first fact matching the pattern.
    Fact {
        /// Colon-segmented key pattern; exact key when it has no wildcard.
        pattern: String,
    },
    /// Dotted-path field of the triggering event data.
    Event {
        /// Dotted field path.
        field: String,
    },
    /// Ambient binding-context scope entry.
    Context {
        /// Scope key.
        key: String,
    },
    /// Named lookup invocation.
    Lookup {
        /// Registered lookup name.
        name: String,
        /// Optional field selected from the lookup result.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    /// Live metric compared against its rolling baseline.
    Baseline {
        /// Metric name.
        metric: String,
        /// Comparison mode.
        comparison: BaselineComparison,
        /// Sensitivity; defaults to 2.0.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sensitivity: Option<f64>,
    },
}

// ============================================================================
// SECTION: Operators
// ============================================================================

/// Closed comparison operator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    /// Equality with numeric coercion.
    Eq,
    /// Negated equality.
    Ne,
    /// Strictly greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Membership in an array value.
    In,
    /// Non-membership in an array value; vacuously true when absent.
    NotIn,
    /// Substring, subset, or array membership containment.
    Contains,
    /// String prefix test.
    StartsWith,
    /// String suffix test.
    EndsWith,
    /// Regular-expression match; the pattern compiles once per rule.
    Matches,
    /// Source resolved to a present value.
    Exists,
    /// Source resolved to nothing; vacuously true when absent.
    NotExists,
    /// Source is absent or JSON null.
    IsNull,
    /// Source is present and not JSON null.
    IsNotNull,
    /// Inclusive `[lo, hi]` range test.
    Between,
}

impl Operator {
    /// Returns true for operators that forbid a comparison value.
    #[must_use]
    pub const fn is_unary(self) -> bool {
        matches!(
            self,
            Self::Exists | Self::NotExists | Self::IsNull | Self::IsNotNull
        )
    }
}

// ============================================================================
// SECTION: Condition Values
// ============================================================================

/// Right-hand value of a leaf condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    /// Reference resolved against the binding context.
    Reference(ValueReference),
    /// Literal JSON value.
    Literal(Value),
}

/// Binding-context reference wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueReference {
    /// Dotted path into the binding scope.
    #[serde(rename = "ref")]
    pub path: String,
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        reason = "Test-only assertions are permitted."
    )]

    use serde_json::json;

    use super::Condition;
    use super::ConditionValue;
    use super::GroupOperator;
    use super::Operator;

    #[test]
    fn leaf_condition_round_trips() {
        let doc = json!({
            "source": {"kind": "event", "field": "value"},
            "operator": "gt",
            "value": 700
        });
        let condition: Condition = serde_json::from_value(doc.clone()).unwrap();
        let Condition::Leaf(leaf) = &condition else {
            panic!("expected leaf");
        };
        assert_eq!(leaf.operator, Operator::Gt);
        assert_eq!(serde_json::to_value(&condition).unwrap(), doc);
    }

    #[test]
    fn group_condition_parses_before_leaf() {
        let doc = json!({
            "operator": "and",
            "conditions": [
                {"source": {"kind": "context", "key": "a"}, "operator": "exists"},
                {"source": {"kind": "context", "key": "b"}, "operator": "notExists"}
            ]
        });
        let condition: Condition = serde_json::from_value(doc).unwrap();
        let Condition::Group(group) = condition else {
            panic!("expected group");
        };
        assert_eq!(group.operator, GroupOperator::And);
        assert_eq!(group.conditions.len(), 2);
    }

    #[test]
    fn reference_values_win_over_literal_objects() {
        let doc = json!({
            "source": {"kind": "event", "field": "total"},
            "operator": "gte",
            "value": {"ref": "context.threshold"}
        });
        let condition: Condition = serde_json::from_value(doc).unwrap();
        let Condition::Leaf(leaf) = condition else {
            panic!("expected leaf");
        };
        let Some(ConditionValue::Reference(reference)) = leaf.value else {
            panic!("expected reference value");
        };
        assert_eq!(reference.path, "context.threshold");
    }

    #[test]
    fn unary_operators_are_flagged() {
        assert!(Operator::Exists.is_unary());
        assert!(Operator::IsNotNull.is_unary());
        assert!(!Operator::Between.is_unary());
        assert!(!Operator::Matches.is_unary());
    }
}
