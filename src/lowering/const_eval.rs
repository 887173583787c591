//! Constant-expression evaluation for global/const-array initializers
//! (`spec.md` §4.3, "global initializers are evaluated at lowering time,
//! not deferred to a pass").

use std::collections::HashMap;

use crate::ast::{BinOp, Expr, Symbol, UnaryOp};
use crate::common::error::LoweringError;
use crate::ir::value::Const;

pub fn eval_const(expr: &Expr, consts: &HashMap<Symbol, Const>) -> Result<Const, LoweringError> {
    match expr {
        Expr::IntLit(v) => Ok(Const::I32(*v)),
        Expr::FloatLit(v) => Ok(Const::F32(*v)),
        Expr::Var(sym) => consts
            .get(sym)
            .copied()
            .ok_or_else(|| LoweringError::UndefinedSymbol(format!("symbol#{}", sym.0))),
        Expr::Unary { op, expr } => {
            let v = eval_const(expr, consts)?;
            Ok(match (op, v) {
                (UnaryOp::Neg, Const::I32(i)) => Const::I32(-i),
                (UnaryOp::Neg, Const::F32(f)) => Const::F32(-f),
                (UnaryOp::Not, Const::I32(i)) => Const::I32((i == 0) as i32),
                (UnaryOp::Not, Const::F32(f)) => Const::I32((f == 0.0) as i32),
                (_, u) => u,
            })
        }
        Expr::Binary { op, lhs, rhs } => {
            let l = eval_const(lhs, consts)?;
            let r = eval_const(rhs, consts)?;
            eval_const_binop(*op, l, r)
        }
        Expr::Index { .. } | Expr::Call { .. } | Expr::StringLit(_) => {
            Err(LoweringError::UndefinedSymbol("non-constant expression".into()))
        }
    }
}

fn as_f32(c: Const) -> f32 {
    match c {
        Const::I32(i) => i as f32,
        Const::F32(f) => f,
        Const::Undef(_) => 0.0,
    }
}

fn is_float(a: Const, b: Const) -> bool {
    matches!(a, Const::F32(_)) || matches!(b, Const::F32(_))
}

fn eval_const_binop(op: BinOp, l: Const, r: Const) -> Result<Const, LoweringError> {
    if is_float(l, r) {
        let (a, b) = (as_f32(l), as_f32(r));
        return Ok(match op {
            BinOp::Add => Const::F32(a + b),
            BinOp::Sub => Const::F32(a - b),
            BinOp::Mul => Const::F32(a * b),
            BinOp::Div => Const::F32(a / b),
            BinOp::Mod => Const::F32(a % b),
            BinOp::Lt => Const::I32((a < b) as i32),
            BinOp::Le => Const::I32((a <= b) as i32),
            BinOp::Gt => Const::I32((a > b) as i32),
            BinOp::Ge => Const::I32((a >= b) as i32),
            BinOp::Eq => Const::I32((a == b) as i32),
            BinOp::Ne => Const::I32((a != b) as i32),
            BinOp::And => Const::I32(((a != 0.0) && (b != 0.0)) as i32),
            BinOp::Or => Const::I32(((a != 0.0) || (b != 0.0)) as i32),
        });
    }
    let (Const::I32(a), Const::I32(b)) = (l, r) else {
        return Ok(Const::I32(0));
    };
    Ok(match op {
        BinOp::Add => Const::I32(a.wrapping_add(b)),
        BinOp::Sub => Const::I32(a.wrapping_sub(b)),
        BinOp::Mul => Const::I32(a.wrapping_mul(b)),
        // `spec.md` §9 open question: integer division by a constant zero
        // folds to zero at lowering time rather than erroring, matching the
        // source language's runtime trap semantics being out of scope here.
        BinOp::Div => Const::I32(if b == 0 { 0 } else { a.wrapping_div(b) }),
        BinOp::Mod => Const::I32(if b == 0 { 0 } else { a.wrapping_rem(b) }),
        BinOp::Lt => Const::I32((a < b) as i32),
        BinOp::Le => Const::I32((a <= b) as i32),
        BinOp::Gt => Const::I32((a > b) as i32),
        BinOp::Ge => Const::I32((a >= b) as i32),
        BinOp::Eq => Const::I32((a == b) as i32),
        BinOp::Ne => Const::I32((a != b) as i32),
        BinOp::And => Const::I32(((a != 0) && (b != 0)) as i32),
        BinOp::Or => Const::I32(((a != 0) || (b != 0)) as i32),
    })
}
