//! Equality and comparison predicates shared by the remote and the mirror.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{Document, ID_KEY};
use crate::schema::is_identifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl FilterOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
        }
    }
}

/// One `field op value` predicate. A list of filters is a conjunction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Evaluates the predicate against a document. A missing field is null.
    pub fn matches(&self, doc: &Document) -> bool {
        let actual = doc.get(&self.field).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::Eq => values_equal(actual, &self.value),
            FilterOp::Ne => !values_equal(actual, &self.value),
            FilterOp::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }

    /// Field names end up in SQL, so they must be plain identifiers.
    pub fn validate(&self) -> Result<(), String> {
        if !is_identifier(&self.field) {
            return Err(format!("'{}' is not a valid field name", self.field));
        }
        if self.value.is_null() && !matches!(self.op, FilterOp::Eq | FilterOp::Ne) {
            return Err(format!(
                "'{}' cannot compare against null with {}",
                self.field,
                self.op.symbol()
            ));
        }
        if self.value.is_array() || self.value.is_object() {
            return Err(format!("'{}' must compare against a scalar", self.field));
        }
        Ok(())
    }

    /// True when the filter targets the record id.
    pub fn is_id(&self) -> bool {
        self.field == ID_KEY
    }
}

/// Applies every filter; an empty list matches everything.
pub fn matches_all(filters: &[Filter], doc: &Document) -> bool {
    filters.iter().all(|f| f.matches(doc))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.field, self.op.symbol(), self.value)
    }
}

impl FromStr for Filter {
    type Err = String;

    /// Parses `field=value`, `field!=value`, `field<value`, `field<=value`,
    /// `field>value` or `field>=value`. The value is read as JSON when it
    /// parses, otherwise as a plain string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pos = s
            .find(['=', '!', '<', '>'])
            .ok_or_else(|| format!("Invalid filter '{}'. Expected field<op>value", s))?;
        let (field, rest) = s.split_at(pos);

        let (op, value) = if let Some(v) = rest.strip_prefix("!=") {
            (FilterOp::Ne, v)
        } else if let Some(v) = rest.strip_prefix("<=") {
            (FilterOp::Lte, v)
        } else if let Some(v) = rest.strip_prefix(">=") {
            (FilterOp::Gte, v)
        } else if let Some(v) = rest.strip_prefix('=') {
            (FilterOp::Eq, v)
        } else if let Some(v) = rest.strip_prefix('<') {
            (FilterOp::Lt, v)
        } else if let Some(v) = rest.strip_prefix('>') {
            (FilterOp::Gt, v)
        } else {
            return Err(format!("Invalid operator in filter '{}'", s));
        };

        let field = field.trim();
        if field.is_empty() {
            return Err(format!("Filter '{}' has no field name", s));
        }

        let value = value.trim();
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));

        Ok(Filter::new(field, op, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_parse_operators() {
        let cases = [
            ("name=Leg Day", FilterOp::Eq, json!("Leg Day")),
            ("reps!=5", FilterOp::Ne, json!(5)),
            ("calories<500", FilterOp::Lt, json!(500)),
            ("calories<=500.5", FilterOp::Lte, json!(500.5)),
            ("date>2025-01-01", FilterOp::Gt, json!("2025-01-01")),
            ("completed>=true", FilterOp::Gte, json!(true)),
        ];
        for (input, op, value) in cases {
            let filter: Filter = input.parse().unwrap();
            assert_eq!(filter.op, op, "{input}");
            assert_eq!(filter.value, value, "{input}");
        }
    }

    #[test]
    fn test_parse_rejects_missing_parts() {
        assert!("nooperator".parse::<Filter>().is_err());
        assert!("=5".parse::<Filter>().is_err());
    }

    #[test]
    fn test_matches_numbers_and_strings() {
        let d = doc(json!({"calories": 450, "mealType": "lunch"}));
        assert!(Filter::new("calories", FilterOp::Lt, 500).matches(&d));
        assert!(Filter::new("calories", FilterOp::Gte, 450.0).matches(&d));
        assert!(!Filter::new("calories", FilterOp::Gt, 450).matches(&d));
        assert!(Filter::eq("mealType", "lunch").matches(&d));
        assert!(Filter::new("mealType", FilterOp::Ne, "dinner").matches(&d));
    }

    #[test]
    fn test_missing_field_is_null() {
        let d = doc(json!({"name": "Run"}));
        assert!(Filter::eq("notes", Value::Null).matches(&d));
        assert!(!Filter::new("distance", FilterOp::Gt, 1).matches(&d));
    }

    #[test]
    fn test_mixed_types_never_order() {
        let d = doc(json!({"reps": "ten"}));
        assert!(!Filter::new("reps", FilterOp::Lt, 20).matches(&d));
        assert!(!Filter::new("reps", FilterOp::Gt, 20).matches(&d));
    }

    #[test]
    fn test_validate() {
        assert!(Filter::eq("mealType", "lunch").validate().is_ok());
        assert!(Filter::eq("a'; --", 1).validate().is_err());
        assert!(Filter::new("calories", FilterOp::Lt, Value::Null)
            .validate()
            .is_err());
        assert!(Filter::eq("tags", json!(["a"])).validate().is_err());
    }

    #[test]
    fn test_matches_all() {
        let d = doc(json!({"memberId": "m1", "classType": "yoga"}));
        let filters = vec![Filter::eq("memberId", "m1"), Filter::eq("classType", "yoga")];
        assert!(matches_all(&filters, &d));
        assert!(matches_all(&[], &d));
        assert!(!matches_all(&[Filter::eq("memberId", "m2")], &d));
    }
}
