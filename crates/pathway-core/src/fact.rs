//! Fact types — the evaluator's input.
//!
//! A fact set is a flat mapping of normalized keys to scalar or array values,
//! produced upstream from questionnaire answers. It is owned by the caller and
//! never mutated during an evaluation.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

// ─── Scalar ──────────────────────────────────────────────────────────────────

/// A single typed datum. Equality is type-aware: `Number(5.0)` never equals
/// `Text("5")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
  Bool(bool),
  Number(f64),
  Text(String),
}

impl Scalar {
  /// Numeric coercion used by the ordering operators. Text coerces when it
  /// parses as a finite number after trimming; booleans never coerce.
  pub fn as_number(&self) -> Option<f64> {
    match self {
      Self::Number(n) if n.is_finite() => Some(*n),
      Self::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
      _ => None,
    }
  }

  fn from_json(value: &serde_json::Value) -> Option<Self> {
    match value {
      serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
      serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
      serde_json::Value::String(s) => Some(Self::Text(s.clone())),
      _ => None,
    }
  }
}

impl fmt::Display for Scalar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Bool(b) => write!(f, "{b}"),
      Self::Number(n) => write!(f, "{n}"),
      Self::Text(s) => f.write_str(s),
    }
  }
}

impl From<&str> for Scalar {
  fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for Scalar {
  fn from(s: String) -> Self { Self::Text(s) }
}

impl From<f64> for Scalar {
  fn from(n: f64) -> Self { Self::Number(n) }
}

impl From<i32> for Scalar {
  fn from(n: i32) -> Self { Self::Number(f64::from(n)) }
}

impl From<bool> for Scalar {
  fn from(b: bool) -> Self { Self::Bool(b) }
}

// ─── Value ───────────────────────────────────────────────────────────────────

/// A fact value or a condition's expected value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  Scalar(Scalar),
  Array(Vec<Scalar>),
}

impl Value {
  pub fn array<I, T>(items: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<Scalar>,
  {
    Self::Array(items.into_iter().map(Into::into).collect())
  }

  pub fn as_scalar(&self) -> Option<&Scalar> {
    match self {
      Self::Scalar(s) => Some(s),
      Self::Array(_) => None,
    }
  }

  pub fn as_array(&self) -> Option<&[Scalar]> {
    match self {
      Self::Array(items) => Some(items),
      Self::Scalar(_) => None,
    }
  }

  /// Convert a JSON value. `null`, nested objects and arrays containing
  /// anything but scalars yield `None`.
  pub fn from_json(value: &serde_json::Value) -> Option<Self> {
    match value {
      serde_json::Value::Array(items) => items
        .iter()
        .map(Scalar::from_json)
        .collect::<Option<Vec<_>>>()
        .map(Self::Array),
      other => Scalar::from_json(other).map(Self::Scalar),
    }
  }
}

impl From<Scalar> for Value {
  fn from(s: Scalar) -> Self { Self::Scalar(s) }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self { Self::Scalar(s.into()) }
}

impl From<String> for Value {
  fn from(s: String) -> Self { Self::Scalar(s.into()) }
}

impl From<f64> for Value {
  fn from(n: f64) -> Self { Self::Scalar(n.into()) }
}

impl From<i32> for Value {
  fn from(n: i32) -> Self { Self::Scalar(n.into()) }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self { Self::Scalar(b.into()) }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Scalar(s) => write!(f, "{s}"),
      Self::Array(items) => {
        f.write_str("[")?;
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            f.write_str(", ")?;
          }
          write!(f, "{item}")?;
        }
        f.write_str("]")
      }
    }
  }
}

// ─── FactSet ─────────────────────────────────────────────────────────────────

/// Normalized key → value facts for one evaluation. Ordered so traces and
/// serialised output are deterministic.
///
/// Deserializing goes through [`FactSet::from_json`], so stored profiles and
/// API input share its `null` handling.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FactSet(BTreeMap<String, Value>);

impl FactSet {
  pub fn new() -> Self { Self::default() }

  /// Builder-style insert.
  pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.insert(key, value);
    self
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
    self.0.insert(key.into(), value.into());
  }

  pub fn get(&self, key: &str) -> Option<&Value> { self.0.get(key) }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  /// Build a fact set from a JSON object such as the output of the answer
  /// normalizer. `null` members are dropped; nested objects are rejected.
  pub fn from_json(value: &serde_json::Value) -> Result<Self> {
    let object = value.as_object().ok_or_else(|| {
      Error::Validation(vec!["facts must be a JSON object".into()])
    })?;

    let mut facts = Self::new();
    let mut issues = Vec::new();
    for (key, raw) in object {
      if raw.is_null() {
        continue;
      }
      match Value::from_json(raw) {
        Some(v) => facts.insert(key.clone(), v),
        None => issues.push(format!(
          "fact {key:?} must be a scalar or an array of scalars"
        )),
      }
    }

    if issues.is_empty() {
      Ok(facts)
    } else {
      Err(Error::Validation(issues))
    }
  }
}

impl<'de> Deserialize<'de> for FactSet {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = serde_json::Value::deserialize(deserializer)?;
    Self::from_json(&raw).map_err(serde::de::Error::custom)
  }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for FactSet {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn from_json_drops_nulls_and_keeps_arrays() {
    let facts = FactSet::from_json(&json!({
      "experience": "beginner",
      "years": 2,
      "goals": ["frontend", "design"],
      "mentor": null,
    }))
    .unwrap();

    assert_eq!(facts.len(), 3);
    assert_eq!(facts.get("experience"), Some(&Value::from("beginner")));
    assert_eq!(facts.get("years"), Some(&Value::from(2)));
    assert_eq!(
      facts.get("goals"),
      Some(&Value::array(["frontend", "design"]))
    );
    assert!(facts.get("mentor").is_none());
  }

  #[test]
  fn from_json_rejects_nested_objects() {
    let err = FactSet::from_json(&json!({ "profile": { "age": 30 } }))
      .unwrap_err();
    assert!(matches!(err, Error::Validation(ref issues) if issues.len() == 1));
  }

  #[test]
  fn deserialize_treats_null_as_missing() {
    let facts: FactSet = serde_json::from_value(json!({
      "experience": "beginner",
      "mentor": null,
    }))
    .unwrap();
    assert_eq!(facts.len(), 1);
    assert!(facts.get("mentor").is_none());

    let err = serde_json::from_value::<FactSet>(json!({ "profile": { "age": 30 } }))
      .unwrap_err();
    assert!(err.to_string().contains("profile"));
  }

  #[test]
  fn numeric_coercion() {
    assert_eq!(Scalar::from(" 4.5 ").as_number(), Some(4.5));
    assert_eq!(Scalar::from("five").as_number(), None);
    assert_eq!(Scalar::from(true).as_number(), None);
    assert_eq!(Scalar::Number(f64::NAN).as_number(), None);
  }

  #[test]
  fn equality_is_type_aware() {
    assert_ne!(Value::from(5), Value::from("5"));
    assert_eq!(Value::from(5), Value::from(5.0));
  }
}
