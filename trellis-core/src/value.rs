//! Dynamic Values
//!
//! Session state is stored as [`Value`]s. A value is dynamically typed so
//! one store can hold counters, labels, selections, and lists side by side,
//! and so derived expressions can combine them at evaluation time.
//!
//! # Operator Semantics
//!
//! The arithmetic helpers follow the rules common to dynamic languages:
//!
//! - `add` concatenates display forms as soon as either side is a string.
//! - `mul` repeats a string or list when the other side is an int or a
//!   bool. Results longer than [`MAX_REPEAT_LEN`] are an overflow error.
//! - Integers stay integers until a float or a true division is involved;
//!   booleans count as `0`/`1`.
//! - Integer overflow is an error rather than a silent wrap.

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ExprError;

/// Upper bound on the length (bytes or items) produced by repetition.
pub const MAX_REPEAT_LEN: usize = 1 << 24;

/// A dynamically typed state value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

/// Numeric view of a value used by the arithmetic helpers.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn to_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Num::Int(i) => i == 0,
            Num::Float(f) => f == 0.0,
        }
    }
}

impl Value {
    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Truthiness: null, false, zero, and empty containers are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value as a float, accepting ints and bools.
    pub fn as_f64(&self) -> Option<f64> {
        self.as_num().map(Num::to_f64)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    fn as_num(&self) -> Option<Num> {
        match self {
            Value::Bool(b) => Some(Num::Int(i64::from(*b))),
            Value::Int(i) => Some(Num::Int(*i)),
            Value::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Arithmetic
    // ------------------------------------------------------------------------

    pub fn add(&self, rhs: &Value) -> Result<Value, ExprError> {
        match (self, rhs) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::Str(format!("{self}{rhs}"))),
            (Value::List(a), Value::List(b)) => {
                Ok(Value::List(a.iter().chain(b.iter()).cloned().collect()))
            }
            _ => arith("+", self, rhs, i64::checked_add, |a, b| a + b),
        }
    }

    pub fn sub(&self, rhs: &Value) -> Result<Value, ExprError> {
        arith("-", self, rhs, i64::checked_sub, |a, b| a - b)
    }

    pub fn mul(&self, rhs: &Value) -> Result<Value, ExprError> {
        if let Some((sequence, n)) = repetition(self, rhs) {
            return repeat(sequence, n);
        }
        match (self, rhs) {
            (Value::Str(_) | Value::List(_), _) | (_, Value::Str(_) | Value::List(_)) => {
                Err(ExprError::Repetition {
                    lhs: self.type_name(),
                    rhs: rhs.type_name(),
                })
            }
            _ => arith("*", self, rhs, i64::checked_mul, |a, b| a * b),
        }
    }

    /// True division: always produces a float.
    pub fn div(&self, rhs: &Value) -> Result<Value, ExprError> {
        let (a, b) = numeric_pair("/", self, rhs)?;
        if b.is_zero() {
            return Err(ExprError::DivisionByZero);
        }
        Ok(Value::Float(a.to_f64() / b.to_f64()))
    }

    /// Division rounded toward negative infinity.
    pub fn floor_div(&self, rhs: &Value) -> Result<Value, ExprError> {
        let (a, b) = numeric_pair("//", self, rhs)?;
        if b.is_zero() {
            return Err(ExprError::DivisionByZero);
        }
        match (a, b) {
            (Num::Int(a), Num::Int(b)) => {
                let quotient = a.checked_div(b).ok_or(ExprError::Overflow("//"))?;
                let adjust = a % b != 0 && ((a < 0) != (b < 0));
                Ok(Value::Int(if adjust { quotient - 1 } else { quotient }))
            }
            (a, b) => Ok(Value::Float((a.to_f64() / b.to_f64()).floor())),
        }
    }

    /// Remainder whose sign follows the divisor.
    pub fn rem(&self, rhs: &Value) -> Result<Value, ExprError> {
        let (a, b) = numeric_pair("%", self, rhs)?;
        if b.is_zero() {
            return Err(ExprError::DivisionByZero);
        }
        match (a, b) {
            // i64::MIN % -1 overflows in checked_rem, but the remainder is 0.
            (Num::Int(_), Num::Int(-1)) => Ok(Value::Int(0)),
            (Num::Int(a), Num::Int(b)) => {
                let r = a.checked_rem(b).ok_or(ExprError::Overflow("%"))?;
                Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
            }
            (a, b) => {
                let (a, b) = (a.to_f64(), b.to_f64());
                let r = a % b;
                Ok(Value::Float(if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }))
            }
        }
    }

    pub fn pow(&self, rhs: &Value) -> Result<Value, ExprError> {
        let (base, exp) = numeric_pair("**", self, rhs)?;
        match (base, exp) {
            (Num::Int(base), Num::Int(exp)) if exp >= 0 => {
                match base {
                    0 => return Ok(Value::Int(i64::from(exp == 0))),
                    1 => return Ok(Value::Int(1)),
                    -1 => return Ok(Value::Int(if exp % 2 == 0 { 1 } else { -1 })),
                    _ => {}
                }
                let exp = u32::try_from(exp).map_err(|_| ExprError::Overflow("**"))?;
                base.checked_pow(exp)
                    .map(Value::Int)
                    .ok_or(ExprError::Overflow("**"))
            }
            (base, exp) => {
                if base.is_zero() && exp.to_f64() < 0.0 {
                    return Err(ExprError::DivisionByZero);
                }
                Ok(Value::Float(base.to_f64().powf(exp.to_f64())))
            }
        }
    }

    pub fn neg(&self) -> Result<Value, ExprError> {
        match self.as_num() {
            Some(Num::Int(i)) => i.checked_neg().map(Value::Int).ok_or(ExprError::Overflow("-")),
            Some(Num::Float(f)) => Ok(Value::Float(-f)),
            None => Err(ExprError::UnsupportedOperand {
                op: "-",
                operand: self.type_name(),
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Comparison
    // ------------------------------------------------------------------------

    /// Ordering between two values.
    ///
    /// Returns `Ok(None)` when the values are ordered-comparable but
    /// unordered (a NaN is involved).
    pub fn try_cmp(&self, rhs: &Value, op: &'static str) -> Result<Option<Ordering>, ExprError> {
        match (self, rhs) {
            (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    if x == y {
                        continue;
                    }
                    return x.try_cmp(y, op);
                }
                Ok(Some(a.len().cmp(&b.len())))
            }
            _ => match (self.as_num(), rhs.as_num()) {
                (Some(Num::Int(a)), Some(Num::Int(b))) => Ok(Some(a.cmp(&b))),
                (Some(a), Some(b)) => Ok(a.to_f64().partial_cmp(&b.to_f64())),
                _ => Err(ExprError::UnsupportedOperands {
                    op,
                    lhs: self.type_name(),
                    rhs: rhs.type_name(),
                }),
            },
        }
    }
}

/// Split `lhs * rhs` into the sequence and its integer repeat count.
fn repetition<'a>(lhs: &'a Value, rhs: &'a Value) -> Option<(&'a Value, i64)> {
    let is_sequence = |value: &Value| matches!(value, Value::Str(_) | Value::List(_));
    match (lhs.as_num(), rhs.as_num()) {
        (None, Some(Num::Int(n))) if is_sequence(lhs) => Some((lhs, n)),
        (Some(Num::Int(n)), None) if is_sequence(rhs) => Some((rhs, n)),
        _ => None,
    }
}

/// Repeat a string or list `n` times; negative counts yield an empty value.
///
/// The result length is checked before anything is allocated.
fn repeat(sequence: &Value, n: i64) -> Result<Value, ExprError> {
    let count = usize::try_from(n).unwrap_or(0);
    let len = match sequence {
        Value::Str(s) => s.len(),
        Value::List(items) => items.len(),
        _ => 0,
    };
    let total = if len == 0 || count == 0 {
        0
    } else {
        len.checked_mul(count)
            .filter(|total| *total <= MAX_REPEAT_LEN)
            .ok_or(ExprError::Overflow("*"))?
    };

    match sequence {
        Value::Str(_) if total == 0 => Ok(Value::Str(String::new())),
        Value::Str(s) => Ok(Value::Str(s.repeat(count))),
        Value::List(_) if total == 0 => Ok(Value::List(Vec::new())),
        Value::List(items) => {
            let mut repeated = Vec::with_capacity(total);
            for _ in 0..count {
                repeated.extend(items.iter().cloned());
            }
            Ok(Value::List(repeated))
        }
        other => Ok(other.clone()),
    }
}

fn numeric_pair(op: &'static str, lhs: &Value, rhs: &Value) -> Result<(Num, Num), ExprError> {
    match (lhs.as_num(), rhs.as_num()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(ExprError::UnsupportedOperands {
            op,
            lhs: lhs.type_name(),
            rhs: rhs.type_name(),
        }),
    }
}

fn arith(
    op: &'static str,
    lhs: &Value,
    rhs: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, ExprError> {
    match numeric_pair(op, lhs, rhs)? {
        (Num::Int(a), Num::Int(b)) => int_op(a, b).map(Value::Int).ok_or(ExprError::Overflow(op)),
        (a, b) => Ok(Value::Float(float_op(a.to_f64(), b.to_f64()))),
    }
}

impl PartialEq for Value {
    /// Structural equality; numbers compare by value across int/float/bool.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => match (self.as_num(), other.as_num()) {
                (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
                (Some(a), Some(b)) => a.to_f64() == b.to_f64(),
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{x:.1}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_nested(f, item)?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: ")?;
                    write_nested(f, item)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Nested strings are quoted so `["a, b"]` stays unambiguous.
fn write_nested(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Str(s) => write!(f, "{s:?}"),
        other => write!(f, "{other}"),
    }
}

// ----------------------------------------------------------------------------
// Conversions
// ----------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(value: IndexMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_numbers_and_strings() {
        assert_eq!(Value::Int(2).add(&Value::Int(3)).unwrap(), Value::Int(5));
        assert_eq!(Value::Int(2).add(&Value::Float(0.5)).unwrap(), Value::Float(2.5));
        assert_eq!(
            Value::from("count: ").add(&Value::Int(3)).unwrap(),
            Value::from("count: 3")
        );
        assert_eq!(Value::Int(3).add(&Value::from("x")).unwrap(), Value::from("3x"));
        assert_eq!(Value::Bool(true).add(&Value::Int(1)).unwrap(), Value::Int(2));
    }

    #[test]
    fn add_rejects_mismatched_types() {
        let err = Value::Null.add(&Value::Int(1)).unwrap_err();
        assert_eq!(
            err,
            ExprError::UnsupportedOperands {
                op: "+",
                lhs: "null",
                rhs: "int"
            }
        );
    }

    #[test]
    fn integer_overflow_is_reported() {
        let err = Value::Int(i64::MAX).add(&Value::Int(1)).unwrap_err();
        assert_eq!(err, ExprError::Overflow("+"));
    }

    #[test]
    fn string_repetition_needs_one_int() {
        assert_eq!(Value::from("ab").mul(&Value::Int(3)).unwrap(), Value::from("ababab"));
        assert_eq!(Value::Int(2).mul(&Value::from("xy")).unwrap(), Value::from("xyxy"));
        assert_eq!(Value::from("ab").mul(&Value::Int(-1)).unwrap(), Value::from(""));

        let err = Value::from("ab").mul(&Value::from("cd")).unwrap_err();
        assert_eq!(err, ExprError::Repetition { lhs: "str", rhs: "str" });

        let err = Value::from("ab").mul(&Value::Float(2.0)).unwrap_err();
        assert_eq!(err, ExprError::Repetition { lhs: "str", rhs: "float" });
    }

    #[test]
    fn bool_counts_as_repeat_count() {
        assert_eq!(Value::Bool(true).mul(&Value::from("ab")).unwrap(), Value::from("ab"));
        assert_eq!(Value::from("ab").mul(&Value::Bool(false)).unwrap(), Value::from(""));
        assert_eq!(
            Value::List(vec![Value::Int(1)]).mul(&Value::Bool(true)).unwrap(),
            Value::List(vec![Value::Int(1)])
        );
    }

    #[test]
    fn huge_repetition_is_an_overflow() {
        let err = Value::from("ab").mul(&Value::Int(i64::MAX)).unwrap_err();
        assert_eq!(err, ExprError::Overflow("*"));

        let err = Value::List(vec![Value::Null]).mul(&Value::Int(1 << 40)).unwrap_err();
        assert_eq!(err, ExprError::Overflow("*"));

        let at_limit = Value::from("a").mul(&Value::Int(MAX_REPEAT_LEN as i64)).unwrap();
        assert_eq!(at_limit.as_str().map(str::len), Some(MAX_REPEAT_LEN));
    }

    #[test]
    fn empty_sequence_repeats_instantly() {
        assert_eq!(
            Value::List(vec![]).mul(&Value::Int(i64::MAX)).unwrap(),
            Value::List(vec![])
        );
        assert_eq!(Value::from("").mul(&Value::Int(i64::MAX)).unwrap(), Value::from(""));
        assert_eq!(
            Value::List(vec![Value::Int(1)]).mul(&Value::Int(0)).unwrap(),
            Value::List(vec![])
        );
    }

    #[test]
    fn list_repetition_and_concatenation() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(
            list.mul(&Value::Int(2)).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            list.add(&Value::List(vec![Value::Int(3)])).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn division_family() {
        assert_eq!(Value::Int(7).div(&Value::Int(2)).unwrap(), Value::Float(3.5));
        assert_eq!(Value::Int(7).floor_div(&Value::Int(2)).unwrap(), Value::Int(3));
        assert_eq!(Value::Int(-7).floor_div(&Value::Int(2)).unwrap(), Value::Int(-4));
        assert_eq!(Value::Int(-7).rem(&Value::Int(3)).unwrap(), Value::Int(2));
        assert_eq!(Value::Int(7).rem(&Value::Int(-3)).unwrap(), Value::Int(-2));
        assert_eq!(Value::Float(7.5).floor_div(&Value::Int(2)).unwrap(), Value::Float(3.0));
        assert_eq!(Value::Int(1).div(&Value::Int(0)).unwrap_err(), ExprError::DivisionByZero);
        assert_eq!(Value::Int(1).rem(&Value::Int(0)).unwrap_err(), ExprError::DivisionByZero);
        assert_eq!(Value::Int(i64::MIN).rem(&Value::Int(-1)).unwrap(), Value::Int(0));
        assert_eq!(Value::Int(7).rem(&Value::Int(-1)).unwrap(), Value::Int(0));
    }

    #[test]
    fn power() {
        assert_eq!(Value::Int(2).pow(&Value::Int(10)).unwrap(), Value::Int(1024));
        assert_eq!(Value::Int(2).pow(&Value::Int(-1)).unwrap(), Value::Float(0.5));
        assert_eq!(Value::Int(0).pow(&Value::Int(-1)).unwrap_err(), ExprError::DivisionByZero);
        assert_eq!(Value::Int(10).pow(&Value::Int(40)).unwrap_err(), ExprError::Overflow("**"));
    }

    #[test]
    fn power_with_unit_bases_never_overflows() {
        let huge = Value::Int(1 << 40);
        assert_eq!(Value::Int(1).pow(&huge).unwrap(), Value::Int(1));
        assert_eq!(Value::Int(0).pow(&huge).unwrap(), Value::Int(0));
        assert_eq!(Value::Int(0).pow(&Value::Int(0)).unwrap(), Value::Int(1));
        assert_eq!(Value::Int(-1).pow(&huge).unwrap(), Value::Int(1));
        assert_eq!(Value::Int(-1).pow(&Value::Int((1 << 40) + 1)).unwrap(), Value::Int(-1));
        assert_eq!(Value::Int(2).pow(&huge).unwrap_err(), ExprError::Overflow("**"));
    }

    #[test]
    fn comparisons() {
        assert_eq!(Value::Int(1).try_cmp(&Value::Float(1.5), "<").unwrap(), Some(Ordering::Less));
        assert_eq!(
            Value::from("b").try_cmp(&Value::from("a"), ">").unwrap(),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Float(f64::NAN).try_cmp(&Value::Int(1), "<").unwrap(), None);
        assert!(Value::from("a").try_cmp(&Value::Int(1), "<").is_err());
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Bool(true), Value::Int(1));
        assert_ne!(Value::from("1"), Value::Int(1));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::Float(0.1).is_truthy());
        assert!(Value::from("x").is_truthy());
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::from("a")]).to_string(),
            "[1, \"a\"]"
        );
    }

    #[test]
    fn json_shape_is_untagged() {
        let value: Value = serde_json::from_str(r#"{"name": "x", "tags": [1, 2.5, true, null]}"#)
            .unwrap();
        let Value::Map(entries) = &value else {
            panic!("expected a map, got {value:?}");
        };
        assert_eq!(entries["name"], Value::from("x"));
        assert_eq!(
            entries["tags"],
            Value::List(vec![Value::Int(1), Value::Float(2.5), Value::Bool(true), Value::Null])
        );
        assert_eq!(serde_json::to_string(&Value::Int(3)).unwrap(), "3");
    }
}
