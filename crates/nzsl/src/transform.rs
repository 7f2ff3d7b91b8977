//! C5 — transformer framework: generic visit-and-rewrite infrastructure
//! shared by the passes that come after parsing (spec §4.5).
//!
//! Each transformer is a stateful visitor; its per-kind entry points return
//! a [`TransformResult`] telling the driver whether to descend, skip
//! children (already handled manually), or splice in a replacement. The
//! constant propagator (`constfold`) is the one pass in this crate driven
//! fully generically through [`walk_statement`]; the resolver and
//! validator hand-roll their own child-first recursion because they thread
//! scope/type state the generic driver has no slot for, but follow the
//! same three-way contract (descend / replace / remove).

use crate::ast::{Expression, Statement, StatementKind};

/// What to do with an expression's children / the expression itself.
pub enum ExprResult {
    VisitChildren,
    DontVisitChildren,
    Replace(Expression),
}

/// What to do with a statement's children / the statement itself.
pub enum StmtResult {
    VisitChildren,
    DontVisitChildren,
    Replace(Statement),
    Remove,
}

/// Per-pass options threaded through every transformer (spec §4.5):
/// currently just the `--partial` toggle that tells the resolver and
/// validator to defer type-dependent checks on expressions with
/// unresolved dependents instead of raising immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformerContext {
    pub partial_compilation: bool,
}

pub trait Transformer {
    fn context(&self) -> TransformerContext {
        TransformerContext::default()
    }

    fn enter_expression(&mut self, _expr: &mut Expression) -> ExprResult {
        ExprResult::VisitChildren
    }

    fn enter_statement(&mut self, _stmt: &mut Statement) -> StmtResult {
        StmtResult::VisitChildren
    }
}

/// Drives `t` over every direct expression child of `expr`, then gives `t`
/// a chance to rewrite `expr` itself (children-first, matching the
/// resolver's "child-first rewrite" contract in spec §4.6).
pub fn walk_expression(expr: &mut Expression, t: &mut impl Transformer) {
    use crate::ast::ExpressionKind::*;

    match &mut expr.kind {
        Constant(_) | Identifier(_) | AliasValue { .. } | ConstantReference { .. }
        | FunctionReference { .. } | IdentifierValue { .. } | IntrinsicFunctionReference { .. }
        | ModuleReference { .. } | NamedExternalBlockReference { .. } | StructTypeReference { .. }
        | TypeReference { .. } | VariableValue { .. } => {}
        AccessField { expr: inner, .. } => walk_expression(inner, t),
        AccessIdentifier { expr: inner, .. } => walk_expression(inner, t),
        AccessIndex { expr: inner, indices } => {
            walk_expression(inner, t);
            for idx in indices.iter_mut() {
                walk_expression(idx, t);
            }
        }
        Assign { target, value } => {
            walk_expression(target, t);
            walk_expression(value, t);
        }
        Binary { left, right, .. } => {
            walk_expression(left, t);
            walk_expression(right, t);
        }
        CallFunction { callee, arguments } => {
            walk_expression(callee, t);
            for a in arguments.iter_mut() {
                walk_expression(a, t);
            }
        }
        CallMethod { object, arguments, .. } => {
            walk_expression(object, t);
            for a in arguments.iter_mut() {
                walk_expression(a, t);
            }
        }
        Cast { target_type, arguments } => {
            walk_expression(target_type, t);
            for a in arguments.iter_mut() {
                walk_expression(a, t);
            }
        }
        Conditional { condition, true_expr, false_expr } => {
            walk_expression(condition, t);
            walk_expression(true_expr, t);
            walk_expression(false_expr, t);
        }
        Intrinsic { arguments, .. } => {
            for a in arguments.iter_mut() {
                walk_expression(a, t);
            }
        }
        Swizzle { expr: inner, .. } => walk_expression(inner, t),
        Unary { expr: inner, .. } => walk_expression(inner, t),
    }

    if let ExprResult::Replace(new_expr) = t.enter_expression(expr) {
        *expr = new_expr;
    }
}

/// Walks a statement list with a cursor so removals and replacements
/// compose (spec §4.5 "lists are walked with a cursor").
pub fn walk_statement_list(statements: &mut Vec<Statement>, t: &mut impl Transformer) {
    let mut i = 0;
    while i < statements.len() {
        match walk_statement_in_place(&mut statements[i], t) {
            StmtResult::Remove => {
                statements.remove(i);
            }
            StmtResult::Replace(new_stmt) => {
                statements[i] = new_stmt;
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }
}

fn walk_statement_in_place(stmt: &mut Statement, t: &mut impl Transformer) -> StmtResult {
    match t.enter_statement(stmt) {
        StmtResult::DontVisitChildren => return StmtResult::VisitChildren,
        StmtResult::Remove => return StmtResult::Remove,
        StmtResult::Replace(new_stmt) => {
            *stmt = new_stmt;
        }
        StmtResult::VisitChildren => {}
    }

    walk_statement_children(stmt, t);
    StmtResult::VisitChildren
}

fn walk_statement_children(stmt: &mut Statement, t: &mut impl Transformer) {
    match &mut stmt.kind {
        StatementKind::Branch { arms, else_body } => {
            for arm in arms.iter_mut() {
                if let Some(cond) = arm.condition.as_mut() {
                    walk_expression(cond, t);
                }
                walk_statement_in_place(&mut arm.body, t);
            }
            if let Some(else_body) = else_body.as_mut() {
                walk_statement_in_place(else_body, t);
            }
        }
        StatementKind::Conditional { condition, truthy, falsy } => {
            walk_expression(condition, t);
            walk_statement_in_place(truthy, t);
            if let Some(falsy) = falsy.as_mut() {
                walk_statement_in_place(falsy, t);
            }
        }
        StatementKind::DeclareConst { value, expr, .. } => {
            if let crate::ast::ExpressionValue::Expression(e) = value {
                walk_expression(e, t);
            }
            if let Some(e) = expr.as_mut() {
                walk_expression(e, t);
            }
        }
        StatementKind::DeclareOption { default, default_expr, .. } => {
            if let crate::ast::ExpressionValue::Expression(e) = default {
                walk_expression(e, t);
            }
            if let Some(e) = default_expr.as_mut() {
                walk_expression(e, t);
            }
        }
        StatementKind::DeclareVariable { value, .. } => {
            if let Some(v) = value.as_mut() {
                walk_expression(v, t);
            }
        }
        StatementKind::DeclareFunction(func) => {
            walk_statement_in_place(&mut func.body, t);
        }
        StatementKind::DeclareAlias { target, .. } => {
            walk_expression(target, t);
        }
        StatementKind::Expression(e) => walk_expression(e, t),
        StatementKind::For { from, to, step, body, .. } => {
            walk_expression(from, t);
            walk_expression(to, t);
            if let Some(step) = step.as_mut() {
                walk_expression(step, t);
            }
            walk_statement_in_place(body, t);
        }
        StatementKind::ForEach { container, body, .. } => {
            walk_expression(container, t);
            walk_statement_in_place(body, t);
        }
        StatementKind::Multi(statements) => walk_statement_list(statements, t),
        StatementKind::Return(expr) => {
            if let Some(e) = expr.as_mut() {
                walk_expression(e, t);
            }
        }
        StatementKind::Scoped(inner) => {
            walk_statement_in_place(inner, t);
        }
        StatementKind::While { condition, body } => {
            walk_expression(condition, t);
            walk_statement_in_place(body, t);
        }
        StatementKind::DeclareStruct(_)
        | StatementKind::DeclareExternal { .. }
        | StatementKind::Import { .. }
        | StatementKind::Break
        | StatementKind::Continue
        | StatementKind::Discard
        | StatementKind::NoOp => {}
    }
}

pub fn walk_statement(stmt: &mut Statement, t: &mut impl Transformer) {
    walk_statement_in_place(stmt, t);
}
