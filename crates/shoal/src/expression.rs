//! Expression trees over numeric, string, callback and nested operands.
//! Evaluation produces a double; `dump` renders a readable form into a
//! [`FlatBuffer`].

use crate::fbuf::FlatBuffer;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
    Avg,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
    Not,
}

impl ExprOp {
    fn symbol(self) -> &'static str {
        match self {
            ExprOp::Add => "+",
            ExprOp::Sub => "-",
            ExprOp::Mul => "*",
            ExprOp::Div => "/",
            ExprOp::Mod => "%",
            ExprOp::Min => "min",
            ExprOp::Max => "max",
            ExprOp::Avg => "avg",
            ExprOp::Eq => "==",
            ExprOp::Ne => "!=",
            ExprOp::Gt => ">",
            ExprOp::Lt => "<",
            ExprOp::Ge => ">=",
            ExprOp::Le => "<=",
            ExprOp::And => "and",
            ExprOp::Or => "or",
            ExprOp::Not => "not",
        }
    }
}

/// Callback operand: evaluated lazily at each evaluation pass.
pub type OperandFn = fn() -> f64;

pub enum Operand {
    Integer(i64),
    Float(f64),
    /// Parsed as a number at evaluation time; non-numeric strings count
    /// as 0.
    Str(String),
    Callback { label: String, cb: OperandFn },
    Sub(Expression),
}

impl Operand {
    fn evaluate(&self) -> f64 {
        match self {
            Operand::Integer(n) => *n as f64,
            Operand::Float(f) => *f,
            Operand::Str(s) => s.trim().parse().unwrap_or(0.0),
            Operand::Callback { cb, .. } => cb(),
            Operand::Sub(expr) => expr.evaluate(),
        }
    }

    fn dump_into(&self, out: &mut String) {
        match self {
            Operand::Integer(n) => {
                let _ = write!(out, "{n}");
            }
            Operand::Float(f) => {
                let _ = write!(out, "{f}");
            }
            Operand::Str(s) => {
                let _ = write!(out, "\"{s}\"");
            }
            Operand::Callback { label, .. } => {
                let _ = write!(out, "{label}()");
            }
            Operand::Sub(expr) => {
                out.push_str(&expr.render());
            }
        }
    }
}

pub struct Expression {
    op: ExprOp,
    operands: Vec<Operand>,
}

fn truthy(v: f64) -> bool {
    v != 0.0
}

fn bool_val(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

impl Expression {
    pub fn new(op: ExprOp) -> Self {
        Self {
            op,
            operands: Vec::new(),
        }
    }

    pub fn with_operands(op: ExprOp, operands: Vec<Operand>) -> Self {
        Self { op, operands }
    }

    pub fn add_operand(&mut self, operand: Operand) -> &mut Self {
        self.operands.push(operand);
        self
    }

    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    /// Fold the operand values through the operator. Empty expressions
    /// evaluate to 0; comparisons chain pairwise (`a < b < c`).
    pub fn evaluate(&self) -> f64 {
        let values: Vec<f64> = self.operands.iter().map(Operand::evaluate).collect();
        let Some((&first, rest)) = values.split_first() else {
            return 0.0;
        };

        match self.op {
            ExprOp::Add => values.iter().sum(),
            ExprOp::Sub => rest.iter().fold(first, |acc, v| acc - v),
            ExprOp::Mul => values.iter().product(),
            ExprOp::Div => rest.iter().fold(first, |acc, v| acc / v),
            ExprOp::Mod => rest.iter().fold(first, |acc, v| acc % v),
            ExprOp::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            ExprOp::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            ExprOp::Avg => values.iter().sum::<f64>() / values.len() as f64,
            ExprOp::Eq => bool_val(values.windows(2).all(|w| w[0] == w[1])),
            ExprOp::Ne => bool_val(values.windows(2).all(|w| w[0] != w[1])),
            ExprOp::Gt => bool_val(values.windows(2).all(|w| w[0] > w[1])),
            ExprOp::Lt => bool_val(values.windows(2).all(|w| w[0] < w[1])),
            ExprOp::Ge => bool_val(values.windows(2).all(|w| w[0] >= w[1])),
            ExprOp::Le => bool_val(values.windows(2).all(|w| w[0] <= w[1])),
            ExprOp::And => bool_val(values.iter().all(|&v| truthy(v))),
            ExprOp::Or => bool_val(values.iter().any(|&v| truthy(v))),
            ExprOp::Not => bool_val(!truthy(first)),
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        out.push('(');
        if self.op == ExprOp::Not {
            out.push_str(self.op.symbol());
            out.push(' ');
        }
        for (i, operand) in self.operands.iter().enumerate() {
            if i > 0 {
                let _ = write!(out, " {} ", self.op.symbol());
            }
            operand.dump_into(&mut out);
        }
        out.push(')');
        out
    }

    /// Render a readable form of the tree into `out`.
    pub fn dump(&self, out: &mut FlatBuffer) -> Result<usize, crate::fbuf::FbufError> {
        out.add(self.render().as_bytes())
    }
}
