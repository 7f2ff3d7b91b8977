//! C7 — constant propagator (spec §4.6): folds constant arithmetic,
//! collapses swizzle-of-swizzle, resolves `const if`/`const_select`, and
//! evaluates the `ArraySize` intrinsic, all driven through the generic
//! [`crate::transform`] walker.
//!
//! Folding always runs (the validator and every backend expect a folded
//! tree); `--optimize` only additionally removes now-dead `Branch` arms
//! produced by a folded `Conditional` (dead-code elimination proper).

use std::collections::HashMap;
use std::ops::Range;

use nzsl_diagnostics_core::SourceCode;
use nzsl_diagnostics_macros::Diagnostic;

use crate::ast::{
    BinaryOp, ConstantValue, Expression, ExpressionKind, ExpressionValue, Module, SingleValue, Statement,
    StatementKind, UnaryOp,
};
use crate::options::CompilerOptions;
use crate::transform::{walk_statement, ExprResult, StmtResult, Transformer, TransformerContext};

#[derive(Debug, Clone, Diagnostic, thiserror::Error)]
pub enum ConstError {
    #[error("integral division by zero")]
    #[diagnostic(code = "constfold::integral-division-by-zero")]
    IntegralDivisionByZero {
        #[source_code]
        source: SourceCode,
        #[label("this division")]
        position: Range<usize>,
    },

    #[error("integral modulo by zero")]
    #[diagnostic(code = "constfold::integral-modulo-by-zero")]
    IntegralModuloByZero {
        #[source_code]
        source: SourceCode,
        #[label("this modulo")]
        position: Range<usize>,
    },

    #[error("shift by a negative amount")]
    #[diagnostic(code = "constfold::negative-shift")]
    NegativeShift {
        #[source_code]
        source: SourceCode,
        #[label("this shift")]
        position: Range<usize>,
    },

    #[error("shift amount {amount} is too large for the operand's bit width")]
    #[diagnostic(code = "constfold::shift-too-large")]
    TooLargeShift {
        #[source_code]
        source: SourceCode,
        #[label("this shift")]
        position: Range<usize>,
        amount: i64,
    },
}

struct ConstFolder<'a> {
    options: &'a CompilerOptions,
    errors: Vec<ConstError>,
    /// Set once a fold removes a `Branch`/`Conditional` arm; only acted on
    /// when `options.optimize` is set (plain folding still needs to know the
    /// condition's truth value to choose which arm's type survives).
    changed: bool,
    /// Named constants folded down to a literal so far, keyed by
    /// `ConstantIndex::get()`. Shared across every folder created within one
    /// `fold_module` run (root and every function body) and across its
    /// fixed-point iterations, so `const B = A + 1;` resolves once `A`
    /// itself has folded, however many passes that takes.
    known_constants: &'a mut HashMap<usize, ConstantValue>,
}

impl<'a> ConstFolder<'a> {
    fn new(options: &'a CompilerOptions, known_constants: &'a mut HashMap<usize, ConstantValue>) -> Self {
        Self { options, errors: Vec::new(), changed: false, known_constants }
    }

    fn source_of(expr: &Expression) -> SourceCode {
        expr.location.file.as_ref().into()
    }

    fn fold_unary(&mut self, op: UnaryOp, operand: &SingleValue, location: &Range<usize>) -> Option<SingleValue> {
        use SingleValue::*;
        match (op, operand) {
            (UnaryOp::Negate, I32(v)) => Some(I32(v.wrapping_neg())),
            (UnaryOp::Negate, IntLiteral(v)) => Some(IntLiteral(v.wrapping_neg())),
            (UnaryOp::Negate, F32(v)) => Some(F32(-v)),
            (UnaryOp::Negate, F64(v)) => Some(F64(-v)),
            (UnaryOp::Negate, FloatLiteral(v)) => Some(FloatLiteral(-v)),
            (UnaryOp::Plus, v) => Some(v.clone()),
            (UnaryOp::LogicalNot, Bool(v)) => Some(Bool(!v)),
            (UnaryOp::BitNot, I32(v)) => Some(I32(!v)),
            (UnaryOp::BitNot, U32(v)) => Some(U32(!v)),
            (UnaryOp::BitNot, IntLiteral(v)) => Some(IntLiteral(!v)),
            _ => None,
        }
    }

    fn fold_binary(
        &mut self,
        op: BinaryOp,
        left: &SingleValue,
        right: &SingleValue,
        location: &Range<usize>,
        source: &SourceCode,
    ) -> Option<SingleValue> {
        use SingleValue::*;

        macro_rules! int_arith {
            ($l:expr, $r:expr, $wrap:expr) => {{
                match op {
                    BinaryOp::Add => Some($wrap($l.wrapping_add($r))),
                    BinaryOp::Sub => Some($wrap($l.wrapping_sub($r))),
                    BinaryOp::Mul => Some($wrap($l.wrapping_mul($r))),
                    BinaryOp::Div => {
                        if $r == 0 {
                            self.errors.push(ConstError::IntegralDivisionByZero {
                                source: source.clone(),
                                position: location.clone(),
                            });
                            None
                        } else {
                            Some($wrap($l.wrapping_div($r)))
                        }
                    }
                    BinaryOp::Mod => {
                        if $r == 0 {
                            self.errors.push(ConstError::IntegralModuloByZero {
                                source: source.clone(),
                                position: location.clone(),
                            });
                            None
                        } else {
                            Some($wrap($l.wrapping_rem($r)))
                        }
                    }
                    BinaryOp::BitAnd => Some($wrap($l & $r)),
                    BinaryOp::BitOr => Some($wrap($l | $r)),
                    BinaryOp::BitXor => Some($wrap($l ^ $r)),
                    BinaryOp::Shl | BinaryOp::Shr => {
                        if $r < 0 {
                            self.errors.push(ConstError::NegativeShift {
                                source: source.clone(),
                                position: location.clone(),
                            });
                            return None;
                        }
                        let bits = std::mem::size_of_val(&$l) as i64 * 8;
                        if $r >= bits {
                            self.errors.push(ConstError::TooLargeShift {
                                source: source.clone(),
                                position: location.clone(),
                                amount: $r,
                            });
                            return None;
                        }
                        if op == BinaryOp::Shl {
                            Some($wrap($l.wrapping_shl($r as u32)))
                        } else {
                            Some($wrap($l.wrapping_shr($r as u32)))
                        }
                    }
                    BinaryOp::Eq => Some(Bool($l == $r)),
                    BinaryOp::NotEq => Some(Bool($l != $r)),
                    BinaryOp::Lt => Some(Bool($l < $r)),
                    BinaryOp::Le => Some(Bool($l <= $r)),
                    BinaryOp::Gt => Some(Bool($l > $r)),
                    BinaryOp::Ge => Some(Bool($l >= $r)),
                    _ => None,
                }
            }};
        }

        macro_rules! float_arith {
            ($l:expr, $r:expr, $wrap:expr) => {
                match op {
                    BinaryOp::Add => Some($wrap($l + $r)),
                    BinaryOp::Sub => Some($wrap($l - $r)),
                    BinaryOp::Mul => Some($wrap($l * $r)),
                    BinaryOp::Div => Some($wrap($l / $r)),
                    BinaryOp::Eq => Some(Bool($l == $r)),
                    BinaryOp::NotEq => Some(Bool($l != $r)),
                    BinaryOp::Lt => Some(Bool($l < $r)),
                    BinaryOp::Le => Some(Bool($l <= $r)),
                    BinaryOp::Gt => Some(Bool($l > $r)),
                    BinaryOp::Ge => Some(Bool($l >= $r)),
                    _ => None,
                }
            };
        }

        match (left, right) {
            (I32(l), I32(r)) => int_arith!(*l as i64, *r as i64, |v: i64| I32(v as i32)),
            (U32(l), U32(r)) => int_arith!(*l as i64, *r as i64, |v: i64| U32(v as u32)),
            (IntLiteral(l), IntLiteral(r)) => int_arith!(*l, *r, IntLiteral),
            (F32(l), F32(r)) => float_arith!(*l, *r, F32),
            (F64(l), F64(r)) => float_arith!(*l, *r, F64),
            (FloatLiteral(l), FloatLiteral(r)) => float_arith!(*l, *r, FloatLiteral),
            (Bool(l), Bool(r)) => match op {
                BinaryOp::LogicalAnd => Some(Bool(*l && *r)),
                BinaryOp::LogicalOr => Some(Bool(*l || *r)),
                BinaryOp::Eq => Some(Bool(l == r)),
                BinaryOp::NotEq => Some(Bool(l != r)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Folds `single[components].` repeated swizzles and swizzle-of-swizzle
    /// into a single index list (spec §4.6 "swizzle-of-swizzle").
    fn fold_swizzle_chain(expr: &Expression) -> Option<(Expression, Vec<u8>)> {
        let ExpressionKind::Swizzle { expr: inner, components } = &expr.kind else { return None };
        if let ExpressionKind::Swizzle { expr: inner_inner, components: inner_components } = &inner.kind {
            let composed: Vec<u8> = components.iter().map(|&c| inner_components[c as usize]).collect();
            Some((inner_inner.as_ref().clone(), composed))
        } else {
            None
        }
    }

    fn fold_expression(&mut self, expr: &Expression) -> Option<Expression> {
        match &expr.kind {
            ExpressionKind::Unary { op, expr: operand } => {
                let ExpressionKind::Constant(ConstantValue::Single(value)) = &operand.kind else { return None };
                let folded = self.fold_unary(*op, value, &expr.location.position)?;
                let mut new_expr = Expression::new(
                    ExpressionKind::Constant(ConstantValue::Single(folded)),
                    expr.location.clone(),
                );
                new_expr.cached_expression_type = expr.cached_expression_type.clone();
                Some(new_expr)
            }
            ExpressionKind::Binary { op, left, right } => {
                let (ExpressionKind::Constant(ConstantValue::Single(lv)), ExpressionKind::Constant(ConstantValue::Single(rv))) =
                    (&left.kind, &right.kind)
                else {
                    return None;
                };
                let source = Self::source_of(expr);
                let folded = self.fold_binary(*op, lv, rv, &expr.location.position, &source)?;
                let mut new_expr = Expression::new(
                    ExpressionKind::Constant(ConstantValue::Single(folded)),
                    expr.location.clone(),
                );
                new_expr.cached_expression_type = expr.cached_expression_type.clone();
                Some(new_expr)
            }
            ExpressionKind::Swizzle { .. } => {
                if let Some((inner, composed)) = Self::fold_swizzle_chain(expr) {
                    let mut new_expr = Expression::new(
                        ExpressionKind::Swizzle { expr: Box::new(inner), components: composed },
                        expr.location.clone(),
                    );
                    new_expr.cached_expression_type = expr.cached_expression_type.clone();
                    return Some(new_expr);
                }
                // Swizzle of a constant vector: extract the matching components directly.
                let ExpressionKind::Swizzle { expr: inner, components } = &expr.kind else { unreachable!() };
                let ExpressionKind::Constant(ConstantValue::Single(vector)) = &inner.kind else { return None };
                let lanes: &[Box<SingleValue>] = match vector {
                    SingleValue::Vec2(v) => v.as_slice(),
                    SingleValue::Vec3(v) => v.as_slice(),
                    SingleValue::Vec4(v) => v.as_slice(),
                    _ => return None,
                };
                let folded = if components.len() == 1 {
                    ConstantValue::Single((*lanes[components[0] as usize]).clone())
                } else {
                    let picked: Vec<Box<SingleValue>> =
                        components.iter().map(|&c| lanes[c as usize].clone()).collect();
                    let value = match picked.len() {
                        2 => SingleValue::Vec2([picked[0].clone(), picked[1].clone()]),
                        3 => SingleValue::Vec3([picked[0].clone(), picked[1].clone(), picked[2].clone()]),
                        4 => SingleValue::Vec4([picked[0].clone(), picked[1].clone(), picked[2].clone(), picked[3].clone()]),
                        _ => return None,
                    };
                    ConstantValue::Single(value)
                };
                let mut new_expr = Expression::new(ExpressionKind::Constant(folded), expr.location.clone());
                new_expr.cached_expression_type = expr.cached_expression_type.clone();
                Some(new_expr)
            }
            ExpressionKind::Conditional { condition, true_expr, false_expr } => {
                let ExpressionKind::Constant(ConstantValue::Single(SingleValue::Bool(cond))) = &condition.kind else {
                    return None;
                };
                self.changed = true;
                Some(if *cond { true_expr.as_ref().clone() } else { false_expr.as_ref().clone() })
            }
            ExpressionKind::Intrinsic { id, arguments } if *id == crate::ast::IntrinsicId::ArraySize => {
                let arg = arguments.first()?;
                let ty = arg.cached_expression_type.as_ref()?;
                if let crate::ast::ExpressionType::Array { length, .. } = ty.resolve_alias() {
                    let mut new_expr = Expression::new(
                        ExpressionKind::Constant(ConstantValue::Single(SingleValue::U32(*length))),
                        expr.location.clone(),
                    );
                    new_expr.cached_expression_type = expr.cached_expression_type.clone();
                    Some(new_expr)
                } else {
                    None
                }
            }
            ExpressionKind::ConstantReference { index } => {
                let value = self.known_constants.get(&index.get())?.clone();
                let mut new_expr = Expression::new(ExpressionKind::Constant(value), expr.location.clone());
                new_expr.cached_expression_type = expr.cached_expression_type.clone();
                Some(new_expr)
            }
            _ => None,
        }
    }

    /// Once a `const`'s own initializer has folded down to a literal,
    /// records it under its `ConstantIndex` so sibling consts and function
    /// bodies referencing it can fold past the `ConstantReference` above.
    fn record_constant(&mut self, stmt: &Statement) {
        let StatementKind::DeclareConst { value, expr, index, .. } = &stmt.kind else { return };
        let Some(idx) = index else { return };
        if self.known_constants.contains_key(&idx.get()) {
            return;
        }
        let literal = match value {
            ExpressionValue::Value(v) => Some(v.clone()),
            ExpressionValue::Expression(e) => match &e.kind {
                ExpressionKind::Constant(v) => Some(v.clone()),
                _ => None,
            },
            ExpressionValue::Absent => expr.as_ref().and_then(|e| match &e.kind {
                ExpressionKind::Constant(v) => Some(v.clone()),
                _ => None,
            }),
        };
        if let Some(v) = literal {
            self.known_constants.insert(idx.get(), v);
        }
    }

    fn fold_statement(&mut self, stmt: &Statement) -> Option<Statement> {
        if matches!(stmt.kind, StatementKind::DeclareConst { .. }) {
            self.record_constant(stmt);
        }
        match &stmt.kind {
            StatementKind::Conditional { condition, truthy, falsy } => {
                let ExpressionKind::Constant(ConstantValue::Single(SingleValue::Bool(cond))) = &condition.kind else {
                    return None;
                };
                self.changed = true;
                Some(if *cond {
                    truthy.as_ref().clone()
                } else {
                    falsy.clone().map(|s| *s).unwrap_or_else(|| Statement::new(StatementKind::NoOp, stmt.location.clone()))
                })
            }
            StatementKind::Branch { arms, else_body } if self.options.optimize => {
                for arm in arms {
                    if !arm.is_const {
                        return None;
                    }
                    let Some(cond) = &arm.condition else { return None };
                    let ExpressionKind::Constant(ConstantValue::Single(SingleValue::Bool(true))) = &cond.kind else {
                        continue;
                    };
                    self.changed = true;
                    return Some(arm.body.as_ref().clone());
                }
                self.changed = true;
                Some(else_body.clone().map(|s| *s).unwrap_or_else(|| Statement::new(StatementKind::NoOp, stmt.location.clone())))
            }
            _ => None,
        }
    }
}

impl<'a> Transformer for ConstFolder<'a> {
    fn context(&self) -> TransformerContext {
        TransformerContext { partial_compilation: self.options.partial_compilation }
    }

    fn enter_expression(&mut self, expr: &mut Expression) -> ExprResult {
        match self.fold_expression(expr) {
            Some(new_expr) => ExprResult::Replace(new_expr),
            None => ExprResult::VisitChildren,
        }
    }

    fn enter_statement(&mut self, stmt: &mut Statement) -> StmtResult {
        match self.fold_statement(stmt) {
            Some(new_stmt) => StmtResult::Replace(new_stmt),
            None => StmtResult::VisitChildren,
        }
    }
}

/// Runs the constant propagator to a fixed point: folding can expose new
/// foldable expressions (e.g. a folded `Conditional` revealing a now-dead
/// `Branch` arm one level up), so we repeat until nothing changes.
pub fn fold_module(module: &mut Module, options: &CompilerOptions) -> Result<(), crate::error::Error> {
    let mut known_constants: HashMap<usize, ConstantValue> = HashMap::new();

    loop {
        let mut any_changed = false;

        let mut root_folder = ConstFolder::new(options, &mut known_constants);
        walk_statement(&mut module.root, &mut root_folder);
        if let Some(err) = root_folder.errors.into_iter().next() {
            return Err(err.into());
        }
        any_changed |= root_folder.changed;

        for func in module.functions.values_mut() {
            let mut body_folder = ConstFolder::new(options, &mut known_constants);
            walk_statement(&mut func.body, &mut body_folder);
            if let Some(err) = body_folder.errors.into_iter().next() {
                return Err(err.into());
            }
            any_changed |= body_folder.changed;
        }

        if !any_changed {
            break;
        }
    }

    // Sync every constant the propagator resolved to a literal back into
    // the module's flat registry (spec §4.6): the DeclareConst statement
    // carries the canonical initializer, but code elsewhere (the binary
    // serializer, the SPIR-V backend's global handling) reads values off
    // `module.constants` rather than re-walking `module.root`.
    for entry in module.constants.values_mut() {
        if let Some(v) = known_constants.get(&entry.index.get()) {
            entry.value = Some(v.clone());
        }
    }

    Ok(())
}
