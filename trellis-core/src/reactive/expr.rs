//! Derived Expressions
//!
//! A [`DerivedExpression`] is an immutable tree over cells and literals.
//! Building one reads nothing; [`DerivedExpression::evaluate`] walks the
//! tree against a [`SessionContext`] and reads every referenced cell at that
//! moment. Nothing is cached between evaluations, so an expression always
//! reflects current state.
//!
//! # Tree Shape
//!
//! ```text
//!          Compare(Gt)
//!          /         \
//!    Binary(Mul)   Literal(10)
//!     /      \
//! Cell(count) Literal(2)
//! ```
//!
//! `count.mul(2).greater_than(10)` builds the tree above. Subtrees are
//! reference counted, so composing expressions never copies them.
//!
//! Cell reads during evaluation are tracked exactly like direct reads: an
//! expression evaluated while a component renders makes that component
//! depend on every cell the expression touched.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::cell::ReactiveCell;
use super::context::SessionContext;
use crate::error::ExprError;
use crate::value::Value;

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "**",
        }
    }

    pub fn apply(self, lhs: &Value, rhs: &Value) -> Result<Value, ExprError> {
        match self {
            BinaryOp::Add => lhs.add(rhs),
            BinaryOp::Sub => lhs.sub(rhs),
            BinaryOp::Mul => lhs.mul(rhs),
            BinaryOp::Div => lhs.div(rhs),
            BinaryOp::FloorDiv => lhs.floor_div(rhs),
            BinaryOp::Rem => lhs.rem(rhs),
            BinaryOp::Pow => lhs.pow(rhs),
        }
    }
}

/// Comparison operators. Every comparison yields a `Value::Bool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    /// Equality never fails; ordering fails on incomparable types and is
    /// false whenever a NaN is involved.
    pub fn apply(self, lhs: &Value, rhs: &Value) -> Result<bool, ExprError> {
        use std::cmp::Ordering::{Equal, Greater, Less};

        let ordering = match self {
            CompareOp::Eq => return Ok(lhs == rhs),
            CompareOp::Ne => return Ok(lhs != rhs),
            _ => lhs.try_cmp(rhs, self.symbol())?,
        };
        Ok(matches!(
            (self, ordering),
            (CompareOp::Lt, Some(Less))
                | (CompareOp::Le, Some(Less | Equal))
                | (CompareOp::Gt, Some(Greater))
                | (CompareOp::Ge, Some(Greater | Equal))
        ))
    }
}

/// User-supplied evaluation step for logic the operators cannot express.
pub type ComputeFn = Arc<dyn Fn(&SessionContext) -> Result<Value, ExprError> + Send + Sync>;

/// One node of an expression tree.
#[derive(Clone)]
pub enum Expr {
    Literal(Value),
    Cell(ReactiveCell),
    Binary {
        op: BinaryOp,
        lhs: Arc<Expr>,
        rhs: Arc<Expr>,
    },
    Compare {
        op: CompareOp,
        lhs: Arc<Expr>,
        rhs: Arc<Expr>,
    },
    /// Left operand if it is falsy, otherwise the right one.
    And(Arc<Expr>, Arc<Expr>),
    /// Left operand if it is truthy, otherwise the right one.
    Or(Arc<Expr>, Arc<Expr>),
    Not(Arc<Expr>),
    Neg(Arc<Expr>),
    Computed(ComputeFn),
}

impl Expr {
    fn evaluate(&self, ctx: &SessionContext) -> Result<Value, ExprError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Cell(cell) => Ok(cell.get(ctx)),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = lhs.evaluate(ctx)?;
                let rhs = rhs.evaluate(ctx)?;
                op.apply(&lhs, &rhs)
            }
            Expr::Compare { op, lhs, rhs } => {
                let lhs = lhs.evaluate(ctx)?;
                let rhs = rhs.evaluate(ctx)?;
                op.apply(&lhs, &rhs).map(Value::Bool)
            }
            Expr::And(lhs, rhs) => {
                let lhs = lhs.evaluate(ctx)?;
                if lhs.is_truthy() {
                    rhs.evaluate(ctx)
                } else {
                    Ok(lhs)
                }
            }
            Expr::Or(lhs, rhs) => {
                let lhs = lhs.evaluate(ctx)?;
                if lhs.is_truthy() {
                    Ok(lhs)
                } else {
                    rhs.evaluate(ctx)
                }
            }
            Expr::Not(operand) => Ok(Value::Bool(!operand.evaluate(ctx)?.is_truthy())),
            Expr::Neg(operand) => operand.evaluate(ctx)?.neg(),
            Expr::Computed(compute) => compute(ctx),
        }
    }

    fn collect_cells(&self, names: &mut IndexSet<String>) {
        match self {
            Expr::Literal(_) | Expr::Computed(_) => {}
            Expr::Cell(cell) => {
                names.insert(cell.name().to_string());
            }
            Expr::Binary { lhs, rhs, .. }
            | Expr::Compare { lhs, rhs, .. }
            | Expr::And(lhs, rhs)
            | Expr::Or(lhs, rhs) => {
                lhs.collect_cells(names);
                rhs.collect_cells(names);
            }
            Expr::Not(operand) | Expr::Neg(operand) => operand.collect_cells(names),
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Expr::Cell(cell) => f.debug_tuple("Cell").field(&cell.name()).finish(),
            Expr::Binary { op, lhs, rhs } => f
                .debug_struct("Binary")
                .field("op", op)
                .field("lhs", lhs)
                .field("rhs", rhs)
                .finish(),
            Expr::Compare { op, lhs, rhs } => f
                .debug_struct("Compare")
                .field("op", op)
                .field("lhs", lhs)
                .field("rhs", rhs)
                .finish(),
            Expr::And(lhs, rhs) => f.debug_tuple("And").field(lhs).field(rhs).finish(),
            Expr::Or(lhs, rhs) => f.debug_tuple("Or").field(lhs).field(rhs).finish(),
            Expr::Not(operand) => f.debug_tuple("Not").field(operand).finish(),
            Expr::Neg(operand) => f.debug_tuple("Neg").field(operand).finish(),
            Expr::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::Str(s)) => write!(f, "{s:?}"),
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Cell(cell) => f.write_str(cell.name()),
            Expr::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Expr::Compare { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Expr::And(lhs, rhs) => write!(f, "({lhs} and {rhs})"),
            Expr::Or(lhs, rhs) => write!(f, "({lhs} or {rhs})"),
            Expr::Not(operand) => write!(f, "(not {operand})"),
            Expr::Neg(operand) => write!(f, "(-{operand})"),
            Expr::Computed(_) => f.write_str("<computed>"),
        }
    }
}

/// A lazily evaluated composition of cells and literals.
#[derive(Clone)]
pub struct DerivedExpression {
    root: Arc<Expr>,
}

impl DerivedExpression {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::from_expr(Expr::Literal(value.into()))
    }

    pub fn cell(cell: ReactiveCell) -> Self {
        Self::from_expr(Expr::Cell(cell))
    }

    /// Wrap a closure evaluated on every access.
    ///
    /// Cells read inside `compute` are tracked, but are not listed by
    /// [`cell_names`](Self::cell_names).
    pub fn computed<F>(compute: F) -> Self
    where
        F: Fn(&SessionContext) -> Result<Value, ExprError> + Send + Sync + 'static,
    {
        Self::from_expr(Expr::Computed(Arc::new(compute)))
    }

    pub fn from_expr(expr: Expr) -> Self {
        Self { root: Arc::new(expr) }
    }

    pub fn expr(&self) -> &Expr {
        &self.root
    }

    /// Evaluate against the context's session, reading every cell now.
    pub fn evaluate(&self, ctx: &SessionContext) -> Result<Value, ExprError> {
        self.root.evaluate(ctx)
    }

    pub fn is_truthy(&self, ctx: &SessionContext) -> Result<bool, ExprError> {
        self.evaluate(ctx).map(|value| value.is_truthy())
    }

    /// Names of the cells referenced by the tree, in first-seen order.
    pub fn cell_names(&self) -> IndexSet<String> {
        let mut names = IndexSet::new();
        self.root.collect_cells(&mut names);
        names
    }

    fn binary(&self, op: BinaryOp, rhs: impl Into<DerivedExpression>) -> Self {
        Self::from_expr(Expr::Binary {
            op,
            lhs: Arc::clone(&self.root),
            rhs: rhs.into().root,
        })
    }

    fn compare(&self, op: CompareOp, rhs: impl Into<DerivedExpression>) -> Self {
        Self::from_expr(Expr::Compare {
            op,
            lhs: Arc::clone(&self.root),
            rhs: rhs.into().root,
        })
    }
}

/// Builders. Every method returns a new expression; `self` is untouched.
#[allow(clippy::should_implement_trait)]
impl DerivedExpression {
    pub fn add(&self, rhs: impl Into<DerivedExpression>) -> Self {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn sub(&self, rhs: impl Into<DerivedExpression>) -> Self {
        self.binary(BinaryOp::Sub, rhs)
    }

    pub fn mul(&self, rhs: impl Into<DerivedExpression>) -> Self {
        self.binary(BinaryOp::Mul, rhs)
    }

    pub fn div(&self, rhs: impl Into<DerivedExpression>) -> Self {
        self.binary(BinaryOp::Div, rhs)
    }

    pub fn floor_div(&self, rhs: impl Into<DerivedExpression>) -> Self {
        self.binary(BinaryOp::FloorDiv, rhs)
    }

    pub fn rem(&self, rhs: impl Into<DerivedExpression>) -> Self {
        self.binary(BinaryOp::Rem, rhs)
    }

    pub fn pow(&self, rhs: impl Into<DerivedExpression>) -> Self {
        self.binary(BinaryOp::Pow, rhs)
    }

    pub fn equals(&self, rhs: impl Into<DerivedExpression>) -> Self {
        self.compare(CompareOp::Eq, rhs)
    }

    pub fn not_equals(&self, rhs: impl Into<DerivedExpression>) -> Self {
        self.compare(CompareOp::Ne, rhs)
    }

    pub fn less_than(&self, rhs: impl Into<DerivedExpression>) -> Self {
        self.compare(CompareOp::Lt, rhs)
    }

    pub fn less_equal(&self, rhs: impl Into<DerivedExpression>) -> Self {
        self.compare(CompareOp::Le, rhs)
    }

    pub fn greater_than(&self, rhs: impl Into<DerivedExpression>) -> Self {
        self.compare(CompareOp::Gt, rhs)
    }

    pub fn greater_equal(&self, rhs: impl Into<DerivedExpression>) -> Self {
        self.compare(CompareOp::Ge, rhs)
    }

    pub fn and(&self, rhs: impl Into<DerivedExpression>) -> Self {
        Self::from_expr(Expr::And(Arc::clone(&self.root), rhs.into().root))
    }

    pub fn or(&self, rhs: impl Into<DerivedExpression>) -> Self {
        Self::from_expr(Expr::Or(Arc::clone(&self.root), rhs.into().root))
    }

    pub fn not(&self) -> Self {
        Self::from_expr(Expr::Not(Arc::clone(&self.root)))
    }

    pub fn neg(&self) -> Self {
        Self::from_expr(Expr::Neg(Arc::clone(&self.root)))
    }
}

impl fmt::Debug for DerivedExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DerivedExpression").field(&self.root).finish()
    }
}

impl fmt::Display for DerivedExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.root, f)
    }
}

macro_rules! literal_operands {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for DerivedExpression {
                fn from(value: $ty) -> Self {
                    DerivedExpression::literal(value)
                }
            }
        )*
    };
}

literal_operands!(Value, bool, i64, i32, f64, &str, String);

impl From<ReactiveCell> for DerivedExpression {
    fn from(cell: ReactiveCell) -> Self {
        DerivedExpression::cell(cell)
    }
}

impl From<&ReactiveCell> for DerivedExpression {
    fn from(cell: &ReactiveCell) -> Self {
        DerivedExpression::cell(cell.clone())
    }
}

impl From<&DerivedExpression> for DerivedExpression {
    fn from(expr: &DerivedExpression) -> Self {
        expr.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================
