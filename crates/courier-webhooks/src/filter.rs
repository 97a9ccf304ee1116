//! Subscription filter evaluation.
//!
//! A [`FilterConfiguration`] accepts an event when its type is listed (or the
//! list is empty or holds `"*"`) and, if a payload expression is configured,
//! the JSON payload satisfies it.
//!
//! Expressions are JSON objects. Keys are dot paths into the payload; values
//! are either a literal (equality) or an operator object:
//!
//! ```json
//! {
//!   "order.status": "paid",
//!   "order.total": { "$gte": 100 },
//!   "customer.tier": { "$in": ["gold", "platinum"] },
//!   "$or": [ { "region": "eu" }, { "region": "uk" } ]
//! }
//! ```

use serde_json::Value as JsonValue;

use crate::error::WebhookError;
use crate::models::FilterConfiguration;

/// Event type wildcard.
pub const WILDCARD: &str = "*";

const OPERATORS: &[&str] = &[
    "$eq", "$neq", "$in", "$nin", "$exists", "$gt", "$gte", "$lt", "$lte",
];

impl FilterConfiguration {
    /// Returns true when the event type and payload pass this filter.
    pub fn accepts(&self, event_type: &str, payload: Option<&JsonValue>) -> bool {
        if !self.accepts_type(event_type) {
            return false;
        }

        match &self.filter {
            None => true,
            Some(expression) if is_empty_expression(expression) => true,
            Some(expression) => payload.is_some_and(|body| matches_expression(expression, body)),
        }
    }

    pub fn accepts_type(&self, event_type: &str) -> bool {
        self.event_types.is_empty()
            || self
                .event_types
                .iter()
                .any(|t| t == WILDCARD || t == event_type)
    }

    /// Reject malformed expressions before they are attached to a subscription.
    pub fn validate(&self) -> Result<(), WebhookError> {
        if self.event_types.iter().any(|t| t.trim().is_empty()) {
            return Err(WebhookError::Validation(
                "Event types must not be blank".to_string(),
            ));
        }
        match &self.filter {
            None => Ok(()),
            Some(expression) => validate_expression(expression),
        }
    }
}

fn is_empty_expression(expression: &JsonValue) -> bool {
    match expression {
        JsonValue::Null => true,
        JsonValue::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Evaluate an expression object against a payload.
pub fn matches_expression(expression: &JsonValue, payload: &JsonValue) -> bool {
    let Some(clauses) = expression.as_object() else {
        return false;
    };

    clauses.iter().all(|(key, expected)| match key.as_str() {
        "$or" => expected
            .as_array()
            .is_some_and(|branches| branches.iter().any(|b| matches_expression(b, payload))),
        "$and" => expected
            .as_array()
            .is_some_and(|branches| branches.iter().all(|b| matches_expression(b, payload))),
        path => matches_clause(lookup(payload, path), expected),
    })
}

/// Resolve a dot path such as `order.items.0.sku`.
fn lookup<'a>(payload: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(payload, |current, segment| match current {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn matches_clause(actual: Option<&JsonValue>, expected: &JsonValue) -> bool {
    match expected {
        JsonValue::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => ops
            .iter()
            .all(|(op, operand)| apply_operator(op, actual, operand)),
        literal => actual == Some(literal),
    }
}

fn apply_operator(op: &str, actual: Option<&JsonValue>, operand: &JsonValue) -> bool {
    match op {
        "$eq" => actual == Some(operand),
        "$neq" => actual != Some(operand),
        "$in" => operand
            .as_array()
            .is_some_and(|set| actual.is_some_and(|a| set.contains(a))),
        "$nin" => operand
            .as_array()
            .is_some_and(|set| actual.map_or(true, |a| !set.contains(a))),
        "$exists" => operand.as_bool() == Some(actual.is_some()),
        "$gt" => compare(actual, operand).is_some_and(|o| o.is_gt()),
        "$gte" => compare(actual, operand).is_some_and(|o| o.is_ge()),
        "$lt" => compare(actual, operand).is_some_and(|o| o.is_lt()),
        "$lte" => compare(actual, operand).is_some_and(|o| o.is_le()),
        _ => false,
    }
}

fn compare(actual: Option<&JsonValue>, operand: &JsonValue) -> Option<std::cmp::Ordering> {
    match (actual?, operand) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn validate_expression(expression: &JsonValue) -> Result<(), WebhookError> {
    let clauses = match expression {
        JsonValue::Null => return Ok(()),
        JsonValue::Object(map) => map,
        _ => {
            return Err(WebhookError::Validation(
                "Filter expression must be a JSON object".to_string(),
            ))
        }
    };

    for (key, value) in clauses {
        match key.as_str() {
            "$or" | "$and" => {
                let branches = value.as_array().ok_or_else(|| {
                    WebhookError::Validation(format!("{key} expects an array of expressions"))
                })?;
                for branch in branches {
                    validate_expression(branch)?;
                }
            }
            k if k.starts_with('$') => {
                return Err(WebhookError::Validation(format!(
                    "Unknown top-level operator: {k}"
                )));
            }
            _ => {
                if let JsonValue::Object(ops) = value {
                    for op in ops.keys().filter(|k| k.starts_with('$')) {
                        if !OPERATORS.contains(&op.as_str()) {
                            return Err(WebhookError::Validation(format!(
                                "Unknown filter operator: {op}"
                            )));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> JsonValue {
        json!({
            "order": { "status": "paid", "total": 250, "items": [ { "sku": "A-1" } ] },
            "customer": { "tier": "gold" },
            "region": "eu"
        })
    }

    #[test]
    fn test_wildcard_accepts_any_type() {
        let filter = FilterConfiguration::default();
        assert!(filter.accepts("order.created", None));
        assert!(filter.accepts("anything", None));
    }

    #[test]
    fn test_empty_type_list_accepts_any_type() {
        let filter = FilterConfiguration::for_types(Vec::<String>::new());
        assert!(filter.accepts("user.deleted", None));
    }

    #[test]
    fn test_explicit_list_requires_exact_match() {
        let filter = FilterConfiguration::for_types(["order.created", "order.paid"]);
        assert!(filter.accepts("order.paid", None));
        assert!(!filter.accepts("order.refunded", None));
        assert!(!filter.accepts("order", None));
    }

    #[test]
    fn test_literal_equality_on_nested_path() {
        let body = payload();
        assert!(matches_expression(&json!({"order.status": "paid"}), &body));
        assert!(!matches_expression(&json!({"order.status": "open"}), &body));
        assert!(matches_expression(&json!({"order.items.0.sku": "A-1"}), &body));
    }

    #[test]
    fn test_operators() {
        let body = payload();
        assert!(matches_expression(&json!({"order.total": {"$gte": 100}}), &body));
        assert!(!matches_expression(&json!({"order.total": {"$lt": 100}}), &body));
        assert!(matches_expression(
            &json!({"customer.tier": {"$in": ["gold", "platinum"]}}),
            &body
        ));
        assert!(matches_expression(&json!({"customer.tier": {"$neq": "silver"}}), &body));
        assert!(matches_expression(&json!({"coupon": {"$exists": false}}), &body));
        assert!(matches_expression(&json!({"coupon": {"$nin": ["X"]}}), &body));
    }

    #[test]
    fn test_or_and_combinators() {
        let body = payload();
        assert!(matches_expression(
            &json!({"$or": [{"region": "us"}, {"region": "eu"}]}),
            &body
        ));
        assert!(!matches_expression(
            &json!({"$and": [{"region": "eu"}, {"customer.tier": "silver"}]}),
            &body
        ));
    }

    #[test]
    fn test_expression_needs_json_payload() {
        let filter =
            FilterConfiguration::default().with_expression(json!({"order.status": "paid"}));
        assert!(filter.accepts("order.created", Some(&payload())));
        assert!(!filter.accepts("order.created", None));
    }

    #[test]
    fn test_empty_expression_behaves_as_absent() {
        let filter = FilterConfiguration::default().with_expression(json!({}));
        assert!(filter.accepts("order.created", None));
    }

    #[test]
    fn test_validate_rejects_unknown_operator() {
        let filter =
            FilterConfiguration::default().with_expression(json!({"total": {"$regex": "x"}}));
        assert!(matches!(filter.validate(), Err(WebhookError::Validation(_))));

        let filter = FilterConfiguration::default().with_expression(json!(["not", "object"]));
        assert!(filter.validate().is_err());

        let filter = FilterConfiguration::default()
            .with_expression(json!({"$or": [{"a": 1}, {"b": {"$in": [1, 2]}}]}));
        assert!(filter.validate().is_ok());
    }
}
