//! Condition evaluation.
//!
//! [`evaluate`] never fails. Missing facts, malformed expected values and
//! unsupported operators all degrade to a failed condition; the latter two
//! also carry a warning in the returned trace.
//!
//! Missing-fact policy: a condition on an absent key is `false` for every
//! operator except `not_equals` and `not_in`, for which absence satisfies
//! "not equal" / "not in".

use serde::{Deserialize, Serialize};

use crate::{
  fact::{FactSet, Scalar, Value},
  rule::{Condition, Operator},
};

/// The outcome of one condition, kept for explainability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionTrace {
  pub fact_key: String,
  pub operator: Operator,
  pub expected: Value,
  /// The fact value that was compared, if the key was present.
  pub actual:   Option<Value>,
  pub passed:   bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub warning:  Option<String>,
}

/// Evaluate `condition` against `facts`.
pub fn evaluate(condition: &Condition, facts: &FactSet) -> ConditionTrace {
  let actual = facts.get(&condition.fact_key);
  let (passed, warning) = match check_shape(&condition.operator, &condition.value) {
    Err(warning) => (false, Some(warning)),
    Ok(()) => (compare(&condition.operator, &condition.value, actual), None),
  };

  ConditionTrace {
    fact_key: condition.fact_key.clone(),
    operator: condition.operator.clone(),
    expected: condition.value.clone(),
    actual: actual.cloned(),
    passed,
    warning,
  }
}

fn check_shape(operator: &Operator, expected: &Value) -> Result<(), String> {
  let ok = match operator {
    Operator::Unknown(raw) => return Err(format!("unsupported operator {raw:?}")),
    Operator::Equals | Operator::NotEquals => true,
    Operator::In | Operator::NotIn => expected.as_array().is_some(),
    Operator::GreaterThan | Operator::LessThan => {
      expected.as_scalar().and_then(Scalar::as_number).is_some()
    }
    Operator::Contains => expected.as_scalar().is_some(),
  };
  if ok {
    Ok(())
  } else {
    Err(format!("expected value {expected} is not valid for operator {operator}"))
  }
}

/// Apply `operator` once the expected value's shape is known to be valid.
fn compare(operator: &Operator, expected: &Value, actual: Option<&Value>) -> bool {
  let Some(actual) = actual else {
    return matches!(operator, Operator::NotEquals | Operator::NotIn);
  };

  match operator {
    Operator::Equals => actual == expected,
    Operator::NotEquals => actual != expected,
    Operator::In => intersects(actual, expected),
    Operator::NotIn => !intersects(actual, expected),
    Operator::GreaterThan => ordered(actual, expected, |a, e| a > e),
    Operator::LessThan => ordered(actual, expected, |a, e| a < e),
    Operator::Contains => contains(actual, expected),
    Operator::Unknown(_) => false,
  }
}

/// Scalar fact: membership. Array fact: non-empty intersection.
fn intersects(actual: &Value, expected: &Value) -> bool {
  let Some(allowed) = expected.as_array() else {
    return false;
  };
  match actual {
    Value::Scalar(s) => allowed.contains(s),
    Value::Array(items) => items.iter().any(|item| allowed.contains(item)),
  }
}

fn ordered(actual: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
  let lhs = actual.as_scalar().and_then(Scalar::as_number);
  let rhs = expected.as_scalar().and_then(Scalar::as_number);
  match (lhs, rhs) {
    (Some(a), Some(e)) => cmp(a, e),
    _ => false,
  }
}

/// Text fact: substring. Array fact: membership.
fn contains(actual: &Value, expected: &Value) -> bool {
  let Some(needle) = expected.as_scalar() else {
    return false;
  };
  match actual {
    Value::Scalar(Scalar::Text(haystack)) => haystack.contains(&needle.to_string()),
    Value::Scalar(_) => false,
    Value::Array(items) => items.contains(needle),
  }
}
