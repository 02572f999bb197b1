//! Compile-time constant evaluation.
//!
//! A constant expression is either just a number or ptr+n where ptr is a
//! pointer to a global variable (or a label address) and n is an integer.
//! The latter form is accepted only when the caller passes a label slot,
//! i.e. for global-variable initializers.
//!
//! Integer arithmetic follows the C evaluation rules: 32-bit operations
//! wrap at 32 bits and sign-extend, unsigned operations compute in the
//! declared width, division by zero is diagnosed, and `INT64_MIN / -1`
//! yields `INT64_MIN` (`0` for `%`).
//!
//! All entry points return `Result`; speculative folding (`try_eval`,
//! `__builtin_constant_p`, array-dimension probing) simply treats an error
//! as "not constant".

use crate::common::error::{CResult, Diagnostic};
use crate::common::session::Session;
use crate::common::types::TypeKind;
use crate::frontend::parser::ast::{BinOp, Expr, ExprKind};

/// Evaluate to an integer; label references are not permitted.
pub fn eval(sess: &Session, e: &Expr) -> CResult<i64> {
    ev(sess, e, None)
}

/// Evaluate to an integer, capturing a referenced global's label (plus the
/// returned addend) for relocation emission.
pub fn eval2(sess: &Session, e: &Expr, label: &mut Option<String>) -> CResult<i64> {
    ev(sess, e, Some(label))
}

/// Trial evaluation: `Some(value)` if the expression folds.
pub fn try_eval(sess: &Session, e: &Expr) -> Option<i64> {
    eval(sess, e).ok()
}

fn err(sess: &Session, e: &Expr, msg: &str) -> Diagnostic {
    Diagnostic::at(&sess.files, e.loc, msg)
}

/// Reborrow an optional label slot for a nested call.
fn reb<'a>(label: &'a mut Option<&mut Option<String>>) -> Option<&'a mut Option<String>> {
    label.as_mut().map(|l| &mut **l)
}

fn ev(sess: &Session, e: &Expr, mut label: Option<&mut Option<String>>) -> CResult<i64> {
    let types = &sess.types;
    let size = types.size(e.ty);
    let unsigned = types.is_unsigned(e.ty);

    match &e.kind {
        ExprKind::Num(v) => Ok(*v),
        ExprKind::Fnum(_) => Err(err(sess, e, "not a compile-time constant")),

        ExprKind::Binary { op, lhs, rhs } => {
            match op {
                BinOp::Add => {
                    let l = ev(sess, lhs, reb(&mut label))?;
                    Ok(l.wrapping_add(eval(sess, rhs)?))
                }
                BinOp::Sub => {
                    let l = ev(sess, lhs, reb(&mut label))?;
                    Ok(l.wrapping_sub(eval(sess, rhs)?))
                }
                BinOp::Mul => Ok(eval(sess, lhs)?.wrapping_mul(eval(sess, rhs)?)),
                BinOp::Div => {
                    let lval = eval(sess, lhs)?;
                    let rval = eval(sess, rhs)?;
                    if rval == 0 {
                        return Err(err(sess, rhs, "division by zero during constant evaluation"));
                    }
                    if unsigned {
                        return Ok(((lval as u64) / (rval as u64)) as i64);
                    }
                    if lval == i64::MIN && rval == -1 {
                        return Ok(i64::MIN);
                    }
                    Ok(lval.wrapping_div(rval))
                }
                BinOp::Mod => {
                    let lval = eval(sess, lhs)?;
                    let rval = eval(sess, rhs)?;
                    if rval == 0 {
                        return Err(err(sess, rhs, "remainder by zero during constant evaluation"));
                    }
                    if unsigned {
                        return Ok(((lval as u64) % (rval as u64)) as i64);
                    }
                    if lval == i64::MIN && rval == -1 {
                        return Ok(0);
                    }
                    Ok(lval.wrapping_rem(rval))
                }
                BinOp::BitAnd => Ok(eval(sess, lhs)? & eval(sess, rhs)?),
                BinOp::BitOr => Ok(eval(sess, lhs)? | eval(sess, rhs)?),
                BinOp::BitXor => Ok(eval(sess, lhs)? ^ eval(sess, rhs)?),
                BinOp::Shl => {
                    let l = eval(sess, lhs)?;
                    let r = eval(sess, rhs)? as u32;
                    if size == 4 {
                        if unsigned {
                            Ok((l as u32).wrapping_shl(r) as i64)
                        } else {
                            Ok((l as i32).wrapping_shl(r) as i64)
                        }
                    } else {
                        Ok(l.wrapping_shl(r))
                    }
                }
                BinOp::Shr => {
                    let l = eval(sess, lhs)?;
                    let r = eval(sess, rhs)? as u32;
                    if size == 4 {
                        Ok((l as u32).wrapping_shr(r) as i64)
                    } else {
                        Ok(((l as u64).wrapping_shr(r)) as i64)
                    }
                }
                BinOp::Sar => {
                    let l = eval(sess, lhs)?;
                    let r = eval(sess, rhs)? as u32;
                    if size == 4 {
                        Ok((l as i32).wrapping_shr(r) as i64)
                    } else {
                        Ok(l.wrapping_shr(r))
                    }
                }
                BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                    if types.is_flonum(lhs.ty) {
                        let l = eval_double(sess, lhs)?;
                        let r = eval_double(sess, rhs)?;
                        let b = match op {
                            BinOp::Eq => l == r,
                            BinOp::Ne => l != r,
                            BinOp::Lt => l < r,
                            BinOp::Le => l <= r,
                            BinOp::Gt => l > r,
                            _ => l >= r,
                        };
                        return Ok(b as i64);
                    }
                    let l = eval(sess, lhs)?;
                    let r = eval(sess, rhs)?;
                    let b = if types.is_unsigned(lhs.ty) {
                        let (l, r) = (l as u64, r as u64);
                        match op {
                            BinOp::Eq => l == r,
                            BinOp::Ne => l != r,
                            BinOp::Lt => l < r,
                            BinOp::Le => l <= r,
                            BinOp::Gt => l > r,
                            _ => l >= r,
                        }
                    } else {
                        match op {
                            BinOp::Eq => l == r,
                            BinOp::Ne => l != r,
                            BinOp::Lt => l < r,
                            BinOp::Le => l <= r,
                            BinOp::Gt => l > r,
                            _ => l >= r,
                        }
                    };
                    Ok(b as i64)
                }
            }
        }

        ExprKind::Pos(inner) => eval(sess, inner),
        ExprKind::Neg(inner) => {
            let v = eval(sess, inner)?;
            if size == 4 {
                if unsigned {
                    Ok((v as u32).wrapping_neg() as i64)
                } else {
                    Ok((v as i32).wrapping_neg() as i64)
                }
            } else {
                Ok(v.wrapping_neg())
            }
        }
        ExprKind::BitNot(inner) => {
            let v = eval(sess, inner)?;
            if size == 4 {
                if unsigned {
                    Ok(!(v as u32) as i64)
                } else {
                    Ok(!(v as i32) as i64)
                }
            } else {
                Ok(!v)
            }
        }
        ExprKind::Not(inner) => Ok((eval(sess, inner)? == 0) as i64),
        ExprKind::LogAnd { lhs, rhs } => {
            Ok(((eval(sess, lhs)? != 0) && (eval(sess, rhs)? != 0)) as i64)
        }
        ExprKind::LogOr { lhs, rhs } => {
            Ok(((eval(sess, lhs)? != 0) || (eval(sess, rhs)? != 0)) as i64)
        }
        ExprKind::Cond { cond, then, els } => {
            if eval(sess, cond)? != 0 {
                ev(sess, then, reb(&mut label))
            } else {
                ev(sess, els, reb(&mut label))
            }
        }
        ExprKind::Chain { lhs, rhs } | ExprKind::Comma { lhs, rhs } => {
            ev(sess, lhs, reb(&mut label))?;
            ev(sess, rhs, reb(&mut label))
        }

        ExprKind::Cast(inner) => {
            if matches!(types.kind(e.ty), TypeKind::Bool) {
                if let ExprKind::Var(_) = inner.kind {
                    if types.is_array(inner.ty) {
                        return Ok(1);
                    }
                }
                if types.is_flonum(inner.ty) {
                    return Ok((eval_double(sess, inner)? != 0.0) as i64);
                }
                return Ok((ev(sess, inner, reb(&mut label))? != 0) as i64);
            }
            if types.is_flonum(inner.ty) {
                if size == 8 && unsigned {
                    return Ok(eval_double(sess, inner)? as u64 as i64);
                }
                return Ok(eval_double(sess, inner)? as i64);
            }
            let val = ev(sess, inner, reb(&mut label))?;
            if types.is_integer(e.ty) {
                return Ok(match size {
                    1 => {
                        if unsigned {
                            val as u8 as i64
                        } else {
                            val as i8 as i64
                        }
                    }
                    2 => {
                        if unsigned {
                            val as u16 as i64
                        } else {
                            val as i16 as i64
                        }
                    }
                    4 => {
                        if unsigned {
                            val as u32 as i64
                        } else {
                            val as i32 as i64
                        }
                    }
                    _ => val,
                });
            }
            Ok(val)
        }

        // Address-bearing forms, valid only for global initializers.
        ExprKind::Addr(inner) | ExprKind::Deref(inner) if label.is_some() => {
            ev(sess, inner, reb(&mut label))
        }
        ExprKind::Member { base, member } if label.is_some() => {
            Ok(ev(sess, base, reb(&mut label))?.wrapping_add(member.offset))
        }
        ExprKind::LabelVal { unique_label } if label.is_some() => {
            **label.as_mut().unwrap() = Some(unique_label.clone());
            Ok(0)
        }
        ExprKind::Var(var) if label.is_some() => {
            let obj = sess.obj(*var);
            if obj.is_local {
                return Err(err(sess, e, "not a compile-time constant"));
            }
            **label.as_mut().unwrap() = Some(obj.name.clone());
            Ok(0)
        }

        _ if label.is_some() => Err(err(sess, e, "invalid initializer")),
        _ => Err(err(sess, e, "not a compile-time constant")),
    }
}

/// Evaluate a floating constant expression (at `f64` precision; `long
/// double` folds are widened when emitted).
pub fn eval_double(sess: &Session, e: &Expr) -> CResult<f64> {
    let types = &sess.types;
    if types.is_integer(e.ty) {
        if types.is_unsigned(e.ty) {
            return Ok(eval(sess, e)? as u64 as f64);
        }
        return Ok(eval(sess, e)? as f64);
    }

    match &e.kind {
        ExprKind::Fnum(v) => Ok(*v),
        ExprKind::Binary { op, lhs, rhs } => {
            let l = eval_double(sess, lhs)?;
            let r = eval_double(sess, rhs)?;
            match op {
                BinOp::Add => Ok(l + r),
                BinOp::Sub => Ok(l - r),
                BinOp::Mul => Ok(l * r),
                BinOp::Div => Ok(l / r),
                _ => Err(err(sess, e, "not a compile-time constant")),
            }
        }
        ExprKind::Pos(inner) => eval_double(sess, inner),
        ExprKind::Neg(inner) => Ok(-eval_double(sess, inner)?),
        ExprKind::Cond { cond, then, els } => {
            if eval_double(sess, cond)? != 0.0 {
                eval_double(sess, then)
            } else {
                eval_double(sess, els)
            }
        }
        ExprKind::Chain { lhs, rhs } | ExprKind::Comma { lhs, rhs } => {
            eval_double(sess, lhs)?;
            eval_double(sess, rhs)
        }
        ExprKind::Cast(inner) => {
            if types.is_flonum(inner.ty) {
                let v = eval_double(sess, inner)?;
                return Ok(match types.size(e.ty) {
                    4 => v as f32 as f64,
                    _ => v,
                });
            }
            if types.size(inner.ty) == 8 && types.is_unsigned(inner.ty) {
                return Ok(eval(sess, inner)? as u64 as f64);
            }
            Ok(eval(sess, inner)? as f64)
        }
        _ => Err(err(sess, e, "not a compile-time constant")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{TY_INT, TY_UINT};
    use crate::frontend::lexer::token::Loc;

    fn loc() -> Loc {
        Loc {
            file_no: 0,
            line: 1,
            col: 1,
        }
    }

    fn num(v: i64) -> Expr {
        Expr::new(ExprKind::Num(v), TY_INT, loc())
    }

    fn bin(op: BinOp, l: Expr, r: Expr, ty: crate::common::types::TypeId) -> Expr {
        Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(l),
                rhs: Box::new(r),
            },
            ty,
            loc(),
        )
    }

    #[test]
    fn signed_overflow_wraps_at_32_bits() {
        let sess = Session::new();
        // (int)0x7fffffff + 1 wraps in 32 bits when narrowed back.
        let add = bin(BinOp::Add, num(0x7fffffff), num(1), TY_INT);
        let cast = Expr::new(ExprKind::Cast(Box::new(add)), TY_INT, loc());
        assert_eq!(eval(&sess, &cast).unwrap(), -0x80000000i64);
    }

    #[test]
    fn division_rules() {
        let mut sess = Session::new();
        sess.files.add("t.c", String::new(), true);
        let div = bin(BinOp::Div, num(7), num(2), TY_INT);
        assert_eq!(eval(&sess, &div).unwrap(), 3);
        let by_zero = bin(BinOp::Div, num(7), num(0), TY_INT);
        assert!(eval(&sess, &by_zero).is_err());
        let min_div = bin(BinOp::Div, num(i64::MIN), num(-1), crate::common::types::TY_LONG);
        assert_eq!(eval(&sess, &min_div).unwrap(), i64::MIN);
        let min_mod = bin(BinOp::Mod, num(i64::MIN), num(-1), crate::common::types::TY_LONG);
        assert_eq!(eval(&sess, &min_mod).unwrap(), 0);
    }

    #[test]
    fn unsigned_comparison() {
        let sess = Session::new();
        let mut l = num(-1);
        l.ty = TY_UINT;
        let cmp = bin(BinOp::Lt, l, num(0), TY_INT);
        // (unsigned)-1 < 0 is false.
        assert_eq!(eval(&sess, &cmp).unwrap(), 0);
    }

    #[test]
    fn label_capture() {
        let mut sess = Session::new();
        sess.files.add("t.c", String::new(), true);
        let g = sess.add_obj(crate::common::session::Obj::new("g".into(), TY_INT));
        let var = Expr::new(ExprKind::Var(g), TY_INT, loc());
        let addr = Expr::new(ExprKind::Addr(Box::new(var)), TY_INT, loc());
        let mut label = None;
        let v = eval2(&sess, &addr, &mut label).unwrap();
        assert_eq!(v, 0);
        assert_eq!(label.as_deref(), Some("g"));
        // Without a label slot the same expression is not constant.
        let var2 = Expr::new(ExprKind::Var(g), TY_INT, loc());
        assert!(eval(&sess, &var2).is_err());
    }
}
