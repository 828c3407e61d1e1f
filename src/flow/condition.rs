use crate::state::{StateValue, Variables, lookup_path};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum CmpOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "contains")]
    Contains,
}

/// A declared branch condition: `variable <op> literal`. Evaluation is a
/// total function over any variable map; see `evaluate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Condition {
    /// Dotted path into the session variables, e.g. `age` or `api.status`.
    pub variable: String,
    pub op: CmpOp,
    pub value: Value,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid condition expression `{0}`")]
pub struct ConditionParseError(pub String);

static EXPR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_.]*)\s*(==|!=|>=|<=|>|<|contains)\s*(.+?)\s*$")
        .expect("condition grammar regex")
});

impl Condition {
    /// Parses the text form, e.g. `age >= 18`, `name == "Ada"`,
    /// `api.status contains ok`. Unquoted literals are tried as JSON first
    /// (number/bool/null) and fall back to a bare string.
    pub fn parse(expr: &str) -> Result<Self, ConditionParseError> {
        let caps = EXPR_RE
            .captures(expr)
            .ok_or_else(|| ConditionParseError(expr.to_string()))?;
        let op = match &caps[2] {
            "==" => CmpOp::Eq,
            "!=" => CmpOp::Ne,
            ">" => CmpOp::Gt,
            "<" => CmpOp::Lt,
            ">=" => CmpOp::Ge,
            "<=" => CmpOp::Le,
            "contains" => CmpOp::Contains,
            _ => return Err(ConditionParseError(expr.to_string())),
        };
        Ok(Self {
            variable: caps[1].to_string(),
            op,
            value: parse_literal(&caps[3]),
        })
    }

    /// Total evaluation policy: a missing variable compares as the empty
    /// value of the literal's type ("" / 0 / false), and any cross-type
    /// comparison is `false`. No input raises.
    pub fn evaluate(&self, vars: &Variables) -> bool {
        let actual = lookup_path(vars, &self.variable);
        match &self.value {
            Value::Number(n) => match n.as_f64() {
                Some(rhs) => eval_number(actual, rhs, self.op),
                None => false,
            },
            Value::String(rhs) => eval_string(actual, rhs, self.op),
            Value::Bool(rhs) => eval_bool(actual, *rhs, self.op),
            Value::Null => match self.op {
                CmpOp::Eq => actual.is_none_or(StateValue::is_null),
                CmpOp::Ne => !actual.is_none_or(StateValue::is_null),
                _ => false,
            },
            // non-scalar literals only support list membership
            _ => false,
        }
    }
}

fn eval_number(actual: Option<&StateValue>, rhs: f64, op: CmpOp) -> bool {
    let lhs = match actual {
        None | Some(StateValue::Null) => 0.0,
        Some(StateValue::Number(n)) => *n,
        Some(StateValue::List(items)) => {
            // membership is the only meaningful list-vs-number comparison
            return op == CmpOp::Contains
                && items.iter().any(|v| v.as_number() == Some(rhs));
        }
        Some(_) => return false,
    };
    match op {
        CmpOp::Eq => lhs == rhs,
        CmpOp::Ne => lhs != rhs,
        CmpOp::Gt => lhs > rhs,
        CmpOp::Lt => lhs < rhs,
        CmpOp::Ge => lhs >= rhs,
        CmpOp::Le => lhs <= rhs,
        CmpOp::Contains => false,
    }
}

fn eval_string(actual: Option<&StateValue>, rhs: &str, op: CmpOp) -> bool {
    let lhs = match actual {
        None | Some(StateValue::Null) => "",
        Some(StateValue::String(s)) => s.as_str(),
        Some(StateValue::List(items)) => {
            return op == CmpOp::Contains
                && items.iter().any(|v| v.as_str() == Some(rhs));
        }
        Some(_) => return false,
    };
    match op {
        CmpOp::Eq => lhs == rhs,
        CmpOp::Ne => lhs != rhs,
        CmpOp::Gt => lhs > rhs,
        CmpOp::Lt => lhs < rhs,
        CmpOp::Ge => lhs >= rhs,
        CmpOp::Le => lhs <= rhs,
        CmpOp::Contains => lhs.contains(rhs),
    }
}

fn eval_bool(actual: Option<&StateValue>, rhs: bool, op: CmpOp) -> bool {
    let lhs = match actual {
        None | Some(StateValue::Null) => false,
        Some(StateValue::Boolean(b)) => *b,
        Some(_) => return false,
    };
    match op {
        CmpOp::Eq => lhs == rhs,
        CmpOp::Ne => lhs != rhs,
        _ => false,
    }
}

fn parse_literal(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 {
        let bytes = trimmed.as_bytes();
        if (bytes[0] == b'"' && bytes[trimmed.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[trimmed.len() - 1] == b'\'')
        {
            return Value::String(trimmed[1..trimmed.len() - 1].to_string());
        }
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => v,
        _ => Value::String(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateValue;
    use serde_json::json;

    fn vars(pairs: Vec<(&str, StateValue)>) -> Variables {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_parse_text_forms() {
        let cond = Condition::parse("age >= 18").unwrap();
        assert_eq!(cond.variable, "age");
        assert_eq!(cond.op, CmpOp::Ge);
        assert_eq!(cond.value, json!(18));

        let cond = Condition::parse("name == \"Ada\"").unwrap();
        assert_eq!(cond.value, json!("Ada"));

        let cond = Condition::parse("api.status contains ok").unwrap();
        assert_eq!(cond.variable, "api.status");
        assert_eq!(cond.op, CmpOp::Contains);
        assert_eq!(cond.value, json!("ok"));

        assert!(Condition::parse("not an expression").is_err());
        assert!(Condition::parse("").is_err());
    }

    #[test]
    fn test_numeric_comparisons() {
        let v = vars(vec![("age", StateValue::Number(20.0))]);
        assert!(Condition::parse("age >= 18").unwrap().evaluate(&v));
        assert!(Condition::parse("age > 19").unwrap().evaluate(&v));
        assert!(!Condition::parse("age < 18").unwrap().evaluate(&v));
        assert!(Condition::parse("age == 20").unwrap().evaluate(&v));
        assert!(Condition::parse("age != 21").unwrap().evaluate(&v));
    }

    #[test]
    fn test_missing_variable_defaults_by_literal_type() {
        let v = Variables::new();
        // missing vs number: compares as 0
        assert!(!Condition::parse("age >= 18").unwrap().evaluate(&v));
        assert!(Condition::parse("age < 18").unwrap().evaluate(&v));
        // missing vs string: compares as ""
        assert!(Condition::parse("name == \"\"").unwrap().evaluate(&v));
        assert!(Condition::parse("name != \"Ada\"").unwrap().evaluate(&v));
        // missing vs bool: compares as false
        assert!(Condition::parse("optin == false").unwrap().evaluate(&v));
    }

    #[test]
    fn test_cross_type_comparison_is_false() {
        let v = vars(vec![("age", StateValue::String("twenty".into()))]);
        // string vs number literal: false for every operator, never an error
        for expr in ["age >= 18", "age < 18", "age == 18", "age != 18"] {
            assert!(!Condition::parse(expr).unwrap().evaluate(&v), "{expr}");
        }

        let v = vars(vec![("flag", StateValue::Boolean(true))]);
        assert!(!Condition::parse("flag > 0").unwrap().evaluate(&v));
        assert!(!Condition::parse("flag == \"true\"").unwrap().evaluate(&v));
    }

    #[test]
    fn test_contains() {
        let v = vars(vec![("greeting", StateValue::String("hello there".into()))]);
        assert!(Condition::parse("greeting contains hello").unwrap().evaluate(&v));
        assert!(!Condition::parse("greeting contains bye").unwrap().evaluate(&v));

        let v = vars(vec![(
            "tags",
            StateValue::List(vec![
                StateValue::String("vip".into()),
                StateValue::Number(7.0),
            ]),
        )]);
        assert!(Condition::parse("tags contains vip").unwrap().evaluate(&v));
        assert!(Condition::parse("tags contains 7").unwrap().evaluate(&v));
        assert!(!Condition::parse("tags contains 8").unwrap().evaluate(&v));
    }

    #[test]
    fn test_dotted_path_into_api_result() {
        let mut v = Variables::new();
        v.insert(
            "api".into(),
            StateValue::try_from(json!({"status": "ok"})).unwrap(),
        );
        assert!(Condition::parse("api.status == \"ok\"").unwrap().evaluate(&v));
    }

    #[test]
    fn test_null_literal() {
        let v = Variables::new();
        assert!(Condition::parse("age == null").unwrap().evaluate(&v));
        let v = vars(vec![("age", StateValue::Number(1.0))]);
        assert!(Condition::parse("age != null").unwrap().evaluate(&v));
    }

    #[test]
    fn test_structured_form_deserializes() {
        let cond: Condition =
            serde_json::from_value(json!({"variable": "age", "op": ">=", "value": 18})).unwrap();
        let v = vars(vec![("age", StateValue::Number(20.0))]);
        assert!(cond.evaluate(&v));
    }
}
