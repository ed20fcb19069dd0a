//! Compile-time folding of operators over literal constants

use crate::middle::ir::{BinOp, BoolOp, CmpOp, Expr, ExprHints, ExprKind, Literal, Module, UnaryOp};
use crate::middle::visit::rewrite_block_exprs;
use crate::utils::Result;

use super::{OptimizationPass, PassContext, PassResult};

/// Largest magnitude an `i64` can have and still convert to `f64` exactly
const MAX_EXACT_F64_INT: i64 = 1 << 53;

/// Folds operators over literal constants at compile time.
///
/// Integer arithmetic is checked and follows the source language's floor
/// semantics for `//` and `%`; any overflow, division by zero or non-finite
/// float result leaves the node alone. Integers only take part in float
/// comparisons and true division while they convert to `f64` exactly.
pub struct LiteralArithmeticFoldPass;

impl LiteralArithmeticFoldPass {
    pub fn new() -> Self {
        Self
    }

    fn exact_f64(value: &Literal) -> Option<f64> {
        match value {
            Literal::Int(n) if n.unsigned_abs() <= MAX_EXACT_F64_INT.unsigned_abs() => Some(*n as f64),
            Literal::Int(_) => None,
            other => other.as_f64(),
        }
    }

    fn floor_div(l: i64, r: i64) -> Option<i64> {
        let q = l.checked_div(r)?;
        if l % r != 0 && (l < 0) != (r < 0) {
            q.checked_sub(1)
        } else {
            Some(q)
        }
    }

    fn floor_mod(l: i64, r: i64) -> Option<i64> {
        let m = l.checked_rem(r)?;
        if m != 0 && (m < 0) != (r < 0) {
            m.checked_add(r)
        } else {
            Some(m)
        }
    }

    fn shift_left(l: i64, r: i64) -> Option<i64> {
        let shift = u32::try_from(r).ok().filter(|s| *s < 64)?;
        let shifted = l.checked_shl(shift)?;
        // Reject shifts that drop significant bits
        if shifted >> shift == l {
            Some(shifted)
        } else {
            None
        }
    }

    fn fold_ints(op: BinOp, l: i64, r: i64) -> Option<Literal> {
        let result = match op {
            BinOp::Add => l.checked_add(r)?,
            BinOp::Sub => l.checked_sub(r)?,
            BinOp::Mult => l.checked_mul(r)?,
            BinOp::Div => {
                if r == 0 {
                    return None;
                }
                let l = Self::exact_f64(&Literal::Int(l))?;
                let r = Self::exact_f64(&Literal::Int(r))?;
                return Self::finite(l / r);
            }
            BinOp::FloorDiv => Self::floor_div(l, r)?,
            BinOp::Mod => Self::floor_mod(l, r)?,
            BinOp::Pow => l.checked_pow(u32::try_from(r).ok()?)?,
            BinOp::LShift => Self::shift_left(l, r)?,
            BinOp::RShift => {
                let shift = u32::try_from(r).ok()?;
                l.checked_shr(shift.min(63))?
            }
            BinOp::BitAnd => l & r,
            BinOp::BitOr => l | r,
            BinOp::BitXor => l ^ r,
        };
        Some(Literal::Int(result))
    }

    fn fold_floats(op: BinOp, l: f64, r: f64) -> Option<Literal> {
        let result = match op {
            BinOp::Add => l + r,
            BinOp::Sub => l - r,
            BinOp::Mult => l * r,
            BinOp::Div if r != 0.0 => l / r,
            _ => return None,
        };
        Self::finite(result)
    }

    fn finite(value: f64) -> Option<Literal> {
        value.is_finite().then_some(Literal::Float(value))
    }

    fn fold_binop(op: BinOp, left: &Literal, right: &Literal) -> Option<Literal> {
        match (left, right) {
            (Literal::Int(l), Literal::Int(r)) => Self::fold_ints(op, *l, *r),
            (Literal::Int(_) | Literal::Float(_), Literal::Int(_) | Literal::Float(_)) => {
                Self::fold_floats(op, left.as_f64()?, right.as_f64()?)
            }
            (Literal::Str(l), Literal::Str(r)) if op == BinOp::Add => Some(Literal::Str(format!("{}{}", l, r))),
            _ => None,
        }
    }

    fn fold_compare(op: CmpOp, left: &Literal, right: &Literal) -> Option<bool> {
        use std::cmp::Ordering;

        let ordering = match (left, right) {
            (Literal::Int(l), Literal::Int(r)) => l.cmp(r),
            (Literal::Int(_) | Literal::Float(_), Literal::Int(_) | Literal::Float(_)) => {
                Self::exact_f64(left)?.partial_cmp(&Self::exact_f64(right)?)?
            }
            (Literal::Str(l), Literal::Str(r)) => l.cmp(r),
            (Literal::Bool(l), Literal::Bool(r)) => match op {
                CmpOp::Eq => return Some(l == r),
                CmpOp::NotEq => return Some(l != r),
                _ => return None,
            },
            _ => return None,
        };
        let result = match op {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::NotEq => ordering != Ordering::Equal,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::LtE => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::GtE => ordering != Ordering::Less,
            CmpOp::Is | CmpOp::IsNot | CmpOp::In | CmpOp::NotIn => return None,
        };
        Some(result)
    }

    fn fold_unary(op: UnaryOp, operand: &Literal) -> Option<Literal> {
        match (op, operand) {
            (UnaryOp::USub, Literal::Int(n)) => n.checked_neg().map(Literal::Int),
            (UnaryOp::USub, Literal::Float(f)) => Some(Literal::Float(-f)),
            (UnaryOp::UAdd, Literal::Int(_) | Literal::Float(_)) => Some(operand.clone()),
            (UnaryOp::Not, Literal::Bool(b)) => Some(Literal::Bool(!b)),
            (UnaryOp::Invert, Literal::Int(n)) => Some(Literal::Int(!n)),
            _ => None,
        }
    }

    fn fold_boolop(op: BoolOp, values: &[Expr]) -> Option<Literal> {
        let mut acc = op == BoolOp::And;
        for value in values {
            let Literal::Bool(b) = value.literal()? else {
                return None;
            };
            acc = match op {
                BoolOp::And => acc && *b,
                BoolOp::Or => acc || *b,
            };
        }
        Some(Literal::Bool(acc))
    }

    fn try_fold(expr: &mut Expr) -> Option<Expr> {
        let folded = match &expr.kind {
            ExprKind::BinOp { left, op, right } => Self::fold_binop(*op, left.literal()?, right.literal()?)?,
            ExprKind::Compare { left, ops, comparators } if ops.len() == 1 && comparators.len() == 1 => {
                Literal::Bool(Self::fold_compare(ops[0], left.literal()?, comparators[0].literal()?)?)
            }
            ExprKind::UnaryOp { op, operand } => Self::fold_unary(*op, operand.literal()?)?,
            ExprKind::BoolOp { op, values } if !values.is_empty() => Self::fold_boolop(*op, values)?,
            _ => return None,
        };
        // Never retype a concretely typed node
        let folded_type = folded.type_name();
        if !expr.resolved_type.is_unknown() && !expr.resolved_type.matches(&folded_type) {
            return None;
        }
        let mut constant = Expr::constant(folded);
        constant.source_span = expr.source_span;
        constant.casts = expr.casts.clone();
        constant.hints = ExprHints {
            normalized_expr: None,
            normalized_expr_version: None,
            ..expr.hints.clone()
        };
        Some(constant)
    }
}

impl OptimizationPass for LiteralArithmeticFoldPass {
    fn name(&self) -> &'static str {
        "LiteralArithmeticFoldPass"
    }

    fn run(&mut self, module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
        let count = rewrite_block_exprs(&mut module.body, &mut Self::try_fold);
        Ok(PassResult::from_count(count))
    }
}

impl Default for LiteralArithmeticFoldPass {
    fn default() -> Self {
        Self::new()
    }
}
