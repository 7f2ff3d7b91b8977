//! C1 — token set & lexer.
//!
//! Converts source text into a flat [`Vec<Token>`] terminated by
//! [`TokenKind::EndOfStream`], per spec §4.1. Built on `nom` character
//! combinators over a [`NomSpan`], the same combinator style the teacher's
//! parser uses directly on text; here it only drives tokenization; the
//! parser (`parser` module) consumes the resulting token stream.

use std::ops::Range;

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_while, take_while1},
    character::complete::{char, digit1, hex_digit1, multispace1, none_of, oct_digit1, one_of},
    combinator::{map, opt, recognize, value},
    error::ParseError as _,
    multi::many0,
    sequence::{pair, preceded},
    IResult, Parser,
};
use nzsl_diagnostics_macros::Diagnostic;

use crate::{
    file::SourceFile,
    nom_tools::{NomSpan, SourceLocation, State},
};

/// Keywords recognized post-identifier (spec §3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Module,
    Fn,
    Let,
    Const,
    If,
    Else,
    While,
    For,
    Return,
    Break,
    Continue,
    Discard,
    Struct,
    Alias,
    External,
    Option,
    Import,
    From,
    As,
    In,
    Out,
    Inout,
    True,
    False,
    ConstSelect,
}

impl Keyword {
    fn from_str(s: &str) -> Option<Keyword> {
        use Keyword::*;
        Some(match s {
            "module" => Module,
            "fn" => Fn,
            "let" => Let,
            "const" => Const,
            "if" => If,
            "else" => Else,
            "while" => While,
            "for" => For,
            "return" => Return,
            "break" => Break,
            "continue" => Continue,
            "discard" => Discard,
            "struct" => Struct,
            "alias" => Alias,
            "external" => External,
            "option" => Option,
            "import" => Import,
            "from" => From,
            "as" => As,
            "in" => In,
            "out" => Out,
            "inout" => Inout,
            "true" => True,
            "false" => False,
            "const_select" => ConstSelect,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Punctuator {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Assign,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Shl,
    Shr,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    ShlEq,
    ShrEq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(Keyword),
    Identifier(String),
    IntegerLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    Punctuator(Punctuator),
    Operator(Operator),
    EndOfStream,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: SourceLocation,
}

impl Token {
    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::EndOfStream)
    }
}

#[derive(Debug, Clone, Diagnostic, thiserror::Error)]
pub enum LexError {
    #[error("unterminated string literal")]
    #[diagnostic(code = "lex::unterminated-string")]
    UnterminatedString {
        #[source_code]
        source: nzsl_diagnostics_core::SourceCode,
        #[label("string starts here and is never closed")]
        position: Range<usize>,
    },

    #[error("unterminated block comment")]
    #[diagnostic(code = "lex::unterminated-comment")]
    UnterminatedComment {
        #[source_code]
        source: nzsl_diagnostics_core::SourceCode,
        #[label("comment starts here and `*/` is never found")]
        position: Range<usize>,
    },

    #[error("invalid escape sequence `\\{found}`")]
    #[diagnostic(code = "lex::invalid-escape")]
    InvalidEscape {
        #[source_code]
        source: nzsl_diagnostics_core::SourceCode,
        #[label("not a recognized escape")]
        position: Range<usize>,
        found: char,
    },

    #[error("invalid numeric literal `{text}`")]
    #[diagnostic(code = "lex::invalid-number")]
    InvalidNumber {
        #[source_code]
        source: nzsl_diagnostics_core::SourceCode,
        #[label("cannot be parsed as a number")]
        position: Range<usize>,
        text: String,
    },

    #[error("unexpected character `{found}`")]
    #[diagnostic(code = "lex::unexpected-character")]
    UnexpectedCharacter {
        #[source_code]
        source: nzsl_diagnostics_core::SourceCode,
        #[label("not a valid token start")]
        position: Range<usize>,
        found: char,
    },
}

type LResult<'a, O> = IResult<NomSpan<'a>, O>;

fn line_comment(input: NomSpan) -> LResult<()> {
    value((), pair(tag("//"), take_while(|c| c != '\n'))).parse(input)
}

fn block_comment(input: NomSpan) -> LResult<()> {
    let start = input;
    let (input, _) = tag("/*")(input)?;
    let mut rest = input;
    loop {
        if rest.fragment().is_empty() {
            return Err(nom::Err::Failure(nom::error::Error::from_error_kind(
                start,
                nom::error::ErrorKind::Eof,
            )));
        }
        if rest.fragment().starts_with("*/") {
            let (rest, _) = tag("*/")(rest)?;
            return Ok((rest, ()));
        }
        let (next, _) = nom::character::complete::anychar(rest)?;
        rest = next;
    }
}

fn whitespace_or_comment(input: NomSpan) -> LResult<()> {
    value((), many0(alt((value((), multispace1), line_comment, block_comment)))).parse(input)
}

fn ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lex_identifier_or_keyword(input: NomSpan) -> LResult<TokenKind> {
    map(
        recognize(pair(
            nom::character::complete::satisfy(ident_start),
            take_while(ident_continue),
        )),
        |span: NomSpan| match Keyword::from_str(span.fragment()) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Identifier(span.fragment().to_string()),
        },
    )
    .parse(input)
}

fn lex_number(input: NomSpan) -> LResult<(TokenKind, NomSpan)> {
    let start = input;

    if let Ok((rest, (prefix, digits))) = alt((
        pair(tag("0x"), hex_digit1),
        pair(tag("0b"), recognize(many0(one_of("01")))),
        pair(tag("0o"), oct_digit1),
    ))
    .parse(input)
    {
        let radix = match *prefix.fragment() {
            "0x" => 16,
            "0b" => 2,
            "0o" => 8,
            _ => unreachable!(),
        };
        let end = digits;
        let text = digits.fragment();
        return match i64::from_str_radix(text, radix) {
            Ok(v) => Ok((rest, (TokenKind::IntegerLiteral(v), end))),
            Err(_) => Err(nom::Err::Failure(nom::error::Error::from_error_kind(
                start,
                nom::error::ErrorKind::Digit,
            ))),
        };
    }

    let (rest, int_part) = digit1(input)?;
    let (rest, frac_part) = opt(preceded(char('.'), digit1)).parse(rest)?;
    let (rest, exp_part) = opt(pair(
        one_of("eE"),
        pair(opt(one_of("+-")), digit1),
    ))
    .parse(rest)?;
    let (rest, suffix) = opt(alt((char('f'), char('u'), char('i')))).parse(rest)?;

    let is_float = frac_part.is_some() || exp_part.is_some() || suffix == Some('f');
    let last = exp_part
        .as_ref()
        .map(|(_, (_, d))| *d)
        .or(frac_part)
        .unwrap_or(int_part);

    let full_text_end = suffix.map(|_| last).unwrap_or(last);
    let full_range = start.location_offset()..(full_text_end.location_offset() + full_text_end.fragment().len() + if suffix.is_some() { 1 } else { 0 });
    let full_text = &start.fragment()[0..(full_range.end - start.location_offset())];

    let kind = if is_float {
        match full_text.trim_end_matches(['f', 'u', 'i']).parse::<f64>() {
            Ok(v) => TokenKind::FloatLiteral(v),
            Err(_) => {
                return Err(nom::Err::Failure(nom::error::Error::from_error_kind(
                    start,
                    nom::error::ErrorKind::Float,
                )))
            }
        }
    } else {
        match full_text.trim_end_matches(['f', 'u', 'i']).parse::<i64>() {
            Ok(v) => TokenKind::IntegerLiteral(v),
            Err(_) => {
                return Err(nom::Err::Failure(nom::error::Error::from_error_kind(
                    start,
                    nom::error::ErrorKind::Digit,
                )))
            }
        }
    };

    Ok((rest, (kind, last)))
}

fn lex_string(input: NomSpan) -> LResult<(String, NomSpan)> {
    let start = input;
    let (rest, _) = char('"')(input)?;

    let (rest, content) = opt(escaped_transform(
        none_of("\"\\"),
        '\\',
        alt((
            value("\n", char('n')),
            value("\r", char('r')),
            value("\t", char('t')),
            value("\\", char('\\')),
            value("\"", char('"')),
            value("\0", char('0')),
        )),
    ))
    .parse(rest)?;

    match tag::<_, _, nom::error::Error<NomSpan>>("\"").parse(rest) {
        Ok((rest2, end)) => Ok((rest2, (content.unwrap_or_default(), end))),
        Err(_) => Err(nom::Err::Failure(nom::error::Error::from_error_kind(
            start,
            nom::error::ErrorKind::Tag,
        ))),
    }
}

macro_rules! op_table {
    ($input:expr, $( $text:literal => $kind:expr ),+ $(,)?) => {
        alt::<_, _, nom::error::Error<NomSpan>, _>(( $( value($kind, tag($text)) ),+ )).parse($input)
    };
}

fn lex_operator(input: NomSpan) -> LResult<TokenKind> {
    use Operator::*;
    // Longest-match-first so `<<=` beats `<<` beats `<`.
    let (rest, op) = op_table!(input,
        "<<=" => Shl,
        ">>=" => Shr,
        "<<" => Shl,
        ">>" => Shr,
        "==" => Eq,
        "!=" => NotEq,
        "<=" => Le,
        ">=" => Ge,
        "&&" => AndAnd,
        "||" => OrOr,
        "+=" => PlusEq,
        "-=" => MinusEq,
        "*=" => StarEq,
        "/=" => SlashEq,
        "%=" => PercentEq,
        "&=" => AmpEq,
        "|=" => PipeEq,
        "^=" => CaretEq,
        "+" => Plus,
        "-" => Minus,
        "*" => Star,
        "/" => Slash,
        "%" => Percent,
        "&" => Amp,
        "|" => Pipe,
        "^" => Caret,
        "~" => Tilde,
        "!" => Bang,
        "=" => Assign,
        "<" => Lt,
        ">" => Gt,
    )?;
    // Shift tokens are re-resolved as compound-assign above; plain Shl/Shr
    // never reach here twice because `alt` short-circuits on first match.
    Ok((rest, TokenKind::Operator(op)))
}

fn lex_punctuator(input: NomSpan) -> LResult<TokenKind> {
    use Punctuator::*;
    map(
        alt((
            value(LParen, char('(')),
            value(RParen, char(')')),
            value(LBrace, char('{')),
            value(RBrace, char('}')),
            value(LBracket, char('[')),
            value(RBracket, char(']')),
            value(Comma, char(',')),
            value(Semicolon, char(';')),
            value(Colon, char(':')),
            value(Dot, char('.')),
        )),
        TokenKind::Punctuator,
    )
    .parse(input)
}

/// Tokenizes `source_text`, tagging every token with a [`SourceLocation`]
/// rooted at `file`.
pub fn tokenize(source_text: &str, file: SourceFile) -> Result<Vec<Token>, LexError> {
    let state = State::new(file.clone());
    let mut input = NomSpan::new_extra(source_text, state);
    let mut tokens = Vec::new();

    loop {
        let (rest, _) = whitespace_or_comment(input).map_err(|_| LexError::UnterminatedComment {
            source: (&file).into(),
            position: input.location_offset()..input.location_offset(),
        })?;
        input = rest;

        if input.fragment().is_empty() {
            tokens.push(Token {
                kind: TokenKind::EndOfStream,
                location: SourceLocation::single(&input),
            });
            break;
        }

        let start = input;
        let first = start.fragment().chars().next().unwrap();

        if first == '"' {
            let (rest, (text, end)) = lex_string(input).map_err(|_| LexError::UnterminatedString {
                source: (&file).into(),
                position: start.location_offset()..start.location_offset() + 1,
            })?;
            tokens.push(Token {
                kind: TokenKind::StringLiteral(text),
                location: SourceLocation::spanning(&start, &end),
            });
            input = rest;
            continue;
        }

        if first.is_ascii_digit() {
            let (rest, (kind, end)) = lex_number(input).map_err(|_| LexError::InvalidNumber {
                source: (&file).into(),
                position: start.location_offset()..start.location_offset() + 1,
                text: start.fragment().chars().take(8).collect(),
            })?;
            tokens.push(Token { kind, location: SourceLocation::spanning(&start, &end) });
            input = rest;
            continue;
        }

        if ident_start(first) {
            let (rest, kind) = lex_identifier_or_keyword(input).expect("ident_start guarantees match");
            let end_offset = rest.location_offset();
            let len = end_offset - start.location_offset();
            let location = SourceLocation {
                file: std::sync::Arc::new(file.clone()),
                start_line: start.location_line(),
                start_column: start.get_column() as u32,
                end_line: start.location_line(),
                end_column: start.get_column() as u32 + len as u32 - 1,
                position: start.location_offset()..end_offset,
            };
            tokens.push(Token { kind, location });
            input = rest;
            continue;
        }

        if let Ok((rest, kind)) = lex_operator(input) {
            let len = start.fragment().len() - rest.fragment().len();
            let location = SourceLocation {
                file: std::sync::Arc::new(file.clone()),
                start_line: start.location_line(),
                start_column: start.get_column() as u32,
                end_line: start.location_line(),
                end_column: start.get_column() as u32 + len as u32 - 1,
                position: start.location_offset()..start.location_offset() + len,
            };
            tokens.push(Token { kind, location });
            input = rest;
            continue;
        }

        if let Ok((rest, kind)) = lex_punctuator(input) {
            tokens.push(Token { kind, location: SourceLocation::single(&start) });
            input = rest;
            continue;
        }

        return Err(LexError::UnexpectedCharacter {
            source: (&file).into(),
            position: start.location_offset()..start.location_offset() + 1,
            found: first,
        });
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn file() -> SourceFile {
        SourceFile::new(vec!["test".into()], String::new())
    }

    #[rstest]
    #[case("module;", 3)]
    #[case("fn main() {}", 7)]
    #[case("let x = 1.0;", 7)]
    fn tokenizes_basic_shapes(#[case] src: &str, #[case] expected_non_eof: usize) {
        let tokens = tokenize(src, file()).unwrap();
        assert_eq!(tokens.len() - 1, expected_non_eof);
        assert!(tokens.last().unwrap().is_eof());
    }

    #[test]
    fn distinguishes_int_and_float_literals() {
        let tokens = tokenize("1 1.0 1e3 0x1F 0b101", file()).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::IntegerLiteral(1));
        assert_eq!(tokens[1].kind, TokenKind::FloatLiteral(1.0));
        assert_eq!(tokens[2].kind, TokenKind::FloatLiteral(1000.0));
        assert_eq!(tokens[3].kind, TokenKind::IntegerLiteral(31));
        assert_eq!(tokens[4].kind, TokenKind::IntegerLiteral(5));
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(matches!(tokenize("\"abc", file()), Err(LexError::UnterminatedString { .. })));
    }

    #[test]
    fn skips_line_and_block_comments() {
        let tokens = tokenize("// hi\n/* block */ let", file()).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Let));
    }

    #[test]
    fn shift_operators_tokenize_before_lt_gt() {
        let tokens = tokenize("a << b >> c", file()).unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Operator(Operator::Shl));
        assert_eq!(tokens[3].kind, TokenKind::Operator(Operator::Shr));
    }
}
