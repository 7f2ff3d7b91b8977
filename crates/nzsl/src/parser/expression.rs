//! Pratt-style precedence-climbing expression parser (spec §4.3).
//!
//! Precedence table (higher binds tighter), left-associative except unary
//! which is right-associative:
//! `.`/`[`/`(` (150) > unary `~ ! - +` (90) > `* / %` (80) > `+ -` (60) >
//! `<< >>` (55) > `== !=` (50) > `< <= > >=` (40) > `&` (35) > `^` (30) >
//! `|` (25) > `&&` (20) > `||` (10).
//!
//! The parser never distinguishes a cast, an intrinsic call, or a plain
//! function call at the syntax level — all three are `callee(args...)`
//! and collapse to [`ExpressionKind::CallFunction`]; the identifier/type
//! resolver (C6) rewrites the callee's resolved meaning into a `Cast`,
//! `Intrinsic`, or a genuine call once it knows what the identifier names.
//! The same goes for `.name` (field access vs. swizzle) and `expr[..]`
//! (array indexing vs. generic/option type instantiation).

use crate::ast::*;
use crate::lexer::{Keyword, Operator, Punctuator, TokenKind};
use crate::parser::{Cursor, ParseResult};

fn binary_precedence(op: Operator) -> Option<(u8, BinaryOp)> {
    use Operator::*;
    Some(match op {
        Star => (80, BinaryOp::Mul),
        Slash => (80, BinaryOp::Div),
        Percent => (80, BinaryOp::Mod),
        Plus => (60, BinaryOp::Add),
        Minus => (60, BinaryOp::Sub),
        Shl => (55, BinaryOp::Shl),
        Shr => (55, BinaryOp::Shr),
        Eq => (50, BinaryOp::Eq),
        NotEq => (50, BinaryOp::NotEq),
        Lt => (40, BinaryOp::Lt),
        Le => (40, BinaryOp::Le),
        Gt => (40, BinaryOp::Gt),
        Ge => (40, BinaryOp::Ge),
        Amp => (35, BinaryOp::BitAnd),
        Caret => (30, BinaryOp::BitXor),
        Pipe => (25, BinaryOp::BitOr),
        AndAnd => (20, BinaryOp::LogicalAnd),
        OrOr => (10, BinaryOp::LogicalOr),
        _ => return None,
    })
}

pub fn parse_expression(cursor: &mut Cursor) -> ParseResult<Expression> {
    parse_binary(cursor, 0)
}

fn parse_binary(cursor: &mut Cursor, min_bp: u8) -> ParseResult<Expression> {
    let mut left = parse_unary(cursor)?;

    loop {
        let op = match cursor.peek_operator() {
            Some(op) => op,
            None => break,
        };
        let (prec, binop) = match binary_precedence(op) {
            Some(p) => p,
            None => break,
        };
        if prec < min_bp {
            break;
        }
        cursor.advance();
        let right = parse_binary(cursor, prec + 1)?;
        let location = left.location.extend_to(&right.location);
        left = Expression::new(
            ExpressionKind::Binary { op: binop, left: Box::new(left), right: Box::new(right) },
            location,
        );
    }

    Ok(left)
}

fn parse_unary(cursor: &mut Cursor) -> ParseResult<Expression> {
    let start_loc = cursor.location();
    let op = match cursor.peek().kind.clone() {
        TokenKind::Operator(Operator::Minus) => Some(UnaryOp::Negate),
        TokenKind::Operator(Operator::Plus) => Some(UnaryOp::Plus),
        TokenKind::Operator(Operator::Bang) => Some(UnaryOp::LogicalNot),
        TokenKind::Operator(Operator::Tilde) => Some(UnaryOp::BitNot),
        _ => None,
    };

    if let Some(op) = op {
        cursor.advance();
        let operand = parse_unary(cursor)?;
        let location = start_loc.extend_to(&operand.location);
        return Ok(Expression::new(ExpressionKind::Unary { op, expr: Box::new(operand) }, location));
    }

    parse_postfix(cursor)
}

fn parse_postfix(cursor: &mut Cursor) -> ParseResult<Expression> {
    let mut expr = parse_primary(cursor)?;

    loop {
        match &cursor.peek().kind {
            TokenKind::Punctuator(Punctuator::Dot) => {
                cursor.advance();
                let (name, name_loc) = cursor.expect_identifier("a field or method name")?;
                if matches!(cursor.peek().kind, TokenKind::Punctuator(Punctuator::LParen)) {
                    let (arguments, end_loc) = parse_argument_list(cursor)?;
                    let location = expr.location.extend_to(&end_loc);
                    expr = Expression::new(
                        ExpressionKind::CallMethod { object: Box::new(expr), method: name, arguments },
                        location,
                    );
                } else {
                    let location = expr.location.extend_to(&name_loc);
                    expr = Expression::new(
                        ExpressionKind::AccessField { expr: Box::new(expr), field_name: name, field_index: None },
                        location,
                    );
                }
            }
            TokenKind::Punctuator(Punctuator::LBracket) => {
                cursor.advance();
                let mut indices = Vec::new();
                if !matches!(cursor.peek().kind, TokenKind::Punctuator(Punctuator::RBracket)) {
                    loop {
                        indices.push(parse_expression(cursor)?);
                        if cursor.eat_punct(Punctuator::Comma) {
                            continue;
                        }
                        break;
                    }
                }
                let end_loc = cursor.expect_punct(Punctuator::RBracket, "`]`")?;
                let location = expr.location.extend_to(&end_loc);
                expr = Expression::new(ExpressionKind::AccessIndex { expr: Box::new(expr), indices }, location);
            }
            TokenKind::Punctuator(Punctuator::LParen) => {
                let (arguments, end_loc) = parse_argument_list(cursor)?;
                let location = expr.location.extend_to(&end_loc);
                expr = Expression::new(ExpressionKind::CallFunction { callee: Box::new(expr), arguments }, location);
            }
            _ => break,
        }
    }

    Ok(expr)
}

fn parse_argument_list(cursor: &mut Cursor) -> Result<(Vec<Expression>, crate::nom_tools::SourceLocation), crate::parser::error::ParseError> {
    cursor.expect_punct(Punctuator::LParen, "`(`")?;
    let mut args = Vec::new();
    if !matches!(cursor.peek().kind, TokenKind::Punctuator(Punctuator::RParen)) {
        loop {
            args.push(parse_expression(cursor)?);
            if cursor.eat_punct(Punctuator::Comma) {
                continue;
            }
            break;
        }
    }
    let end_loc = cursor.expect_punct(Punctuator::RParen, "`)`")?;
    Ok((args, end_loc))
}

fn parse_primary(cursor: &mut Cursor) -> ParseResult<Expression> {
    let location = cursor.location();
    match cursor.peek().kind.clone() {
        TokenKind::IntegerLiteral(v) => {
            cursor.advance();
            Ok(Expression::new(
                ExpressionKind::Constant(ConstantValue::Single(SingleValue::IntLiteral(v))),
                location,
            ))
        }
        TokenKind::FloatLiteral(v) => {
            cursor.advance();
            Ok(Expression::new(
                ExpressionKind::Constant(ConstantValue::Single(SingleValue::FloatLiteral(v))),
                location,
            ))
        }
        TokenKind::StringLiteral(v) => {
            cursor.advance();
            Ok(Expression::new(ExpressionKind::Constant(ConstantValue::Single(SingleValue::String(v))), location))
        }
        TokenKind::Keyword(Keyword::True) => {
            cursor.advance();
            Ok(Expression::new(ExpressionKind::Constant(ConstantValue::Single(SingleValue::Bool(true))), location))
        }
        TokenKind::Keyword(Keyword::False) => {
            cursor.advance();
            Ok(Expression::new(ExpressionKind::Constant(ConstantValue::Single(SingleValue::Bool(false))), location))
        }
        TokenKind::Keyword(Keyword::ConstSelect) => {
            cursor.advance();
            let (mut args, end_loc) = parse_argument_list(cursor)?;
            if args.len() != 3 {
                return Err(crate::parser::error::ParseError::UnexpectedToken {
                    source: cursor.source_code(),
                    position: location.position.clone(),
                    expected: "const_select(condition, if_true, if_false)".to_string(),
                });
            }
            let false_expr = args.pop().unwrap();
            let true_expr = args.pop().unwrap();
            let condition = args.pop().unwrap();
            let full_loc = location.extend_to(&end_loc);
            Ok(Expression::new(
                ExpressionKind::Conditional {
                    condition: Box::new(condition),
                    true_expr: Box::new(true_expr),
                    false_expr: Box::new(false_expr),
                },
                full_loc,
            ))
        }
        TokenKind::Identifier(name) => {
            cursor.advance();
            Ok(Expression::new(ExpressionKind::Identifier(name), location))
        }
        TokenKind::Punctuator(Punctuator::LParen) => {
            cursor.advance();
            if cursor.eat_punct(Punctuator::RParen) {
                let full_loc = location.extend_to(&cursor.previous_location());
                return Ok(Expression::new(ExpressionKind::TypeReference { ty: Box::new(ExpressionType::NoType) }, full_loc));
            }
            let inner = parse_expression(cursor)?;
            cursor.expect_punct(Punctuator::RParen, "`)`")?;
            Ok(inner)
        }
        _ => Err(crate::parser::error::ParseError::UnexpectedToken {
            source: cursor.source_code(),
            position: location.position.clone(),
            expected: "an expression".to_string(),
        }),
    }
}
