//! C3 — recursive-descent parser with Pratt-style expression parsing
//! (spec §4.3). Consumes the token stream produced by [`crate::lexer`] and
//! produces an unresolved [`Module`]; no identifier is looked up and no
//! type is assigned here — that's C6's job.

pub mod error;
pub mod expression;

use crate::ast::*;
use crate::file::SourceFile;
use crate::lexer::{Keyword, Operator, Punctuator, Token, TokenKind};
use crate::map::OrderedMap;
use crate::nom_tools::SourceLocation;
use error::ParseError;

pub type ParseResult<T> = Result<T, ParseError>;

pub struct Cursor<'t> {
    tokens: &'t [Token],
    pos: usize,
    file: SourceFile,
}

impl<'t> Cursor<'t> {
    pub fn new(tokens: &'t [Token], file: SourceFile) -> Self {
        Self { tokens, pos: 0, file }
    }

    pub fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    pub fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    pub fn is_eof(&self) -> bool {
        self.peek().is_eof()
    }

    pub fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if !tok.is_eof() {
            self.pos += 1;
        }
        tok
    }

    pub fn location(&self) -> SourceLocation {
        self.peek().location.clone()
    }

    pub fn previous_location(&self) -> SourceLocation {
        let idx = self.pos.saturating_sub(1);
        self.tokens[idx].location.clone()
    }

    pub fn source_code(&self) -> nzsl_diagnostics_core::SourceCode {
        (&self.file).into()
    }

    fn err_unexpected(&self, expected: &str) -> ParseError {
        ParseError::UnexpectedToken {
            source: self.source_code(),
            position: self.location().position,
            expected: expected.to_string(),
        }
    }

    pub fn eat_punct(&mut self, p: Punctuator) -> bool {
        if matches!(&self.peek().kind, TokenKind::Punctuator(found) if *found == p) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn expect_punct(&mut self, p: Punctuator, what: &str) -> ParseResult<SourceLocation> {
        if self.eat_punct(p) {
            Ok(self.previous_location())
        } else {
            Err(self.err_unexpected(what))
        }
    }

    pub fn eat_keyword(&mut self, k: Keyword) -> bool {
        if matches!(&self.peek().kind, TokenKind::Keyword(found) if *found == k) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn expect_keyword(&mut self, k: Keyword, what: &str) -> ParseResult<SourceLocation> {
        if self.eat_keyword(k) {
            Ok(self.previous_location())
        } else {
            Err(self.err_unexpected(what))
        }
    }

    pub fn eat_operator(&mut self, op: Operator) -> bool {
        if matches!(&self.peek().kind, TokenKind::Operator(found) if *found == op) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn peek_operator(&self) -> Option<Operator> {
        match &self.peek().kind {
            TokenKind::Operator(op) => Some(*op),
            _ => None,
        }
    }

    pub fn expect_identifier(&mut self, what: &str) -> ParseResult<(String, SourceLocation)> {
        match self.peek().kind.clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok((name, self.previous_location()))
            }
            _ => Err(self.err_unexpected(what)),
        }
    }
}

// ---------------------------------------------------------------------
// Attributes — spec §4.3
// ---------------------------------------------------------------------

/// Attribute names allowed to repeat across separate bracket groups and
/// fuse their argument lists, rather than being flagged as duplicates
/// (open question resolved in DESIGN.md): a struct member can legitimately
/// carry more than one `cond`/`feature`/`tag`.
fn attribute_is_fusable(name: AttributeName) -> bool {
    matches!(name, AttributeName::Cond | AttributeName::Feature | AttributeName::Tag)
}

fn parse_one_attribute(cursor: &mut Cursor) -> ParseResult<Attribute> {
    let (name_str, name_loc) = cursor.expect_identifier("an attribute name")?;
    let name = AttributeName::from_str(&name_str).ok_or_else(|| ParseError::UnknownAttribute {
        source: cursor.source_code(),
        position: name_loc.position.clone(),
        name: name_str.clone(),
    })?;

    let mut args = Vec::new();
    let mut end_loc = name_loc.clone();
    if cursor.eat_punct(Punctuator::LParen) {
        if !matches!(cursor.peek().kind, TokenKind::Punctuator(Punctuator::RParen)) {
            loop {
                args.push(parse_attribute_arg(cursor)?);
                if cursor.eat_punct(Punctuator::Comma) {
                    continue;
                }
                break;
            }
        }
        end_loc = cursor.expect_punct(Punctuator::RParen, "`)`")?;
    }

    Ok(Attribute { name, args, location: name_loc.extend_to(&end_loc) })
}

fn parse_attribute_arg(cursor: &mut Cursor) -> ParseResult<AttributeArg> {
    match cursor.peek().kind.clone() {
        TokenKind::StringLiteral(s) => {
            cursor.advance();
            Ok(AttributeArg::StringLiteral(s))
        }
        TokenKind::IntegerLiteral(v) => {
            cursor.advance();
            Ok(AttributeArg::IntegerLiteral(v))
        }
        TokenKind::Identifier(name) => {
            cursor.advance();
            Ok(AttributeArg::Identifier(name))
        }
        _ => {
            let expr = expression::parse_expression(cursor)?;
            Ok(AttributeArg::Expression(expr))
        }
    }
}

/// Parses zero or more consecutive `[name(args), ...]` bracket groups,
/// fusing same-named fusable attributes and rejecting true duplicates.
pub fn parse_attributes(cursor: &mut Cursor) -> ParseResult<Attributes> {
    let mut result: Attributes = Vec::new();

    while matches!(cursor.peek().kind, TokenKind::Punctuator(Punctuator::LBracket)) {
        cursor.advance();
        loop {
            let attr = parse_one_attribute(cursor)?;

            if let Some(existing) = result.iter_mut().find(|a: &&mut Attribute| a.name == attr.name) {
                if attribute_is_fusable(attr.name) {
                    existing.args.extend(attr.args);
                } else {
                    return Err(ParseError::DuplicateAttribute {
                        source: cursor.source_code(),
                        position: attr.location.position,
                        name: format!("{:?}", attr.name),
                    });
                }
            } else {
                result.push(attr);
            }

            if cursor.eat_punct(Punctuator::Comma) {
                continue;
            }
            break;
        }
        cursor.expect_punct(Punctuator::RBracket, "`]`")?;
    }

    Ok(result)
}

fn find_attr(attrs: &Attributes, name: AttributeName) -> Option<&Attribute> {
    attrs.iter().find(|a| a.name == name)
}

fn attr_string(attr: &Attribute) -> Option<String> {
    match attr.args.first()? {
        AttributeArg::StringLiteral(s) => Some(s.clone()),
        AttributeArg::Identifier(s) => Some(s.clone()),
        _ => None,
    }
}

// ---------------------------------------------------------------------
// Type expressions
// ---------------------------------------------------------------------

/// Parses a type name, reusing the expression grammar: a type is just an
/// identifier optionally followed by `[args]` (e.g. `vec3[f32]`,
/// `array[f32, 4]`) or `.` path access (`Module.Block`). The resolver
/// turns this into a concrete [`ExpressionType`]; the parser only builds
/// the syntax tree.
pub fn parse_type_expression(cursor: &mut Cursor) -> ParseResult<Expression> {
    expression::parse_expression(cursor)
}

// ---------------------------------------------------------------------
// Module-level declarations — spec §4.3
// ---------------------------------------------------------------------

pub fn parse(tokens: &[Token], file: SourceFile) -> ParseResult<Module> {
    let mut cursor = Cursor::new(tokens, file);

    let module_attrs = parse_attributes(&mut cursor)?;
    let module_kw_loc = cursor.expect_keyword(Keyword::Module, "`module`")?;
    let module_name = match cursor.peek().kind.clone() {
        TokenKind::Identifier(name) => {
            cursor.advance();
            Some(name)
        }
        _ => None,
    };
    cursor.expect_punct(Punctuator::Semicolon, "`;`")?;

    let version_attr = find_attr(&module_attrs, AttributeName::NzslVersion).ok_or_else(|| {
        ParseError::ModuleMissingVersion { source: cursor.source_code(), position: module_kw_loc.position.clone() }
    })?;
    let version_text = attr_string(version_attr).unwrap_or_default();
    let lang_version = LangVersion::parse(&version_text).ok_or_else(|| ParseError::InvalidVersion {
        source: cursor.source_code(),
        position: version_attr.location.position.clone(),
        text: version_text.clone(),
    })?;
    if lang_version > LangVersion::CURRENT_MAX {
        return Err(ParseError::VersionTooHigh {
            source: cursor.source_code(),
            position: version_attr.location.position.clone(),
            requested: version_text,
            max: format!("{}.{}.{}", LangVersion::CURRENT_MAX.major, LangVersion::CURRENT_MAX.minor, LangVersion::CURRENT_MAX.patch),
        });
    }

    let metadata = build_metadata(&module_attrs, module_name, lang_version);

    let mut statements = Vec::new();
    let mut imports = Vec::new();

    while !cursor.is_eof() {
        let item_attrs = parse_attributes(&mut cursor)?;
        if matches!(cursor.peek().kind, TokenKind::Keyword(Keyword::Module)) {
            let nested = parse_nested_module(&mut cursor, item_attrs, lang_version)?;
            match nested {
                NestedModuleResult::Imported(im) => imports.push(im),
                NestedModuleResult::DuplicateRoot(loc) => {
                    return Err(ParseError::DuplicateModule { source: cursor.source_code(), position: loc.position });
                }
            }
            continue;
        }
        statements.push(parse_module_item(&mut cursor, item_attrs, lang_version)?);
    }

    let root_loc = statements
        .first()
        .map(|s: &Statement| s.location.clone())
        .unwrap_or_else(dummy_location);
    let root_loc = statements.iter().fold(root_loc, |acc, s| acc.extend_to(&s.location));

    Ok(Module {
        metadata,
        imports,
        root: Statement::new(StatementKind::Multi(statements), root_loc),
        structs: OrderedMap::new(),
        functions: OrderedMap::new(),
        constants: OrderedMap::new(),
        externals: OrderedMap::new(),
        aliases: OrderedMap::new(),
        options: OrderedMap::new(),
    })
}

/// Registries (`structs`/`functions`/...) start empty — C6 forward
/// registration fills them in from `root`'s declarations.
fn build_metadata(attrs: &Attributes, module_name: Option<String>, lang_version: LangVersion) -> ModuleMetadata {
    ModuleMetadata {
        module_name,
        lang_version: Some(lang_version),
        author: find_attr(attrs, AttributeName::Author).and_then(attr_string),
        description: find_attr(attrs, AttributeName::Desc).and_then(attr_string),
        license: find_attr(attrs, AttributeName::License).and_then(attr_string),
        features: attrs
            .iter()
            .filter(|a| a.name == AttributeName::Feature)
            .filter_map(attr_string)
            .filter_map(|s| LanguageFeature::from_str(&s))
            .collect(),
    }
}

enum NestedModuleResult {
    Imported(ImportedModule),
    DuplicateRoot(SourceLocation),
}

fn parse_nested_module(cursor: &mut Cursor, attrs: Attributes, parent_version: LangVersion) -> ParseResult<NestedModuleResult> {
    let kw_loc = cursor.expect_keyword(Keyword::Module, "`module`")?;
    let (name, _) = cursor.expect_identifier("a module name")?;

    if cursor.eat_punct(Punctuator::Semicolon) {
        return Ok(NestedModuleResult::DuplicateRoot(kw_loc));
    }

    cursor.expect_punct(Punctuator::LBrace, "`{`")?;
    let mut statements = Vec::new();
    while !matches!(cursor.peek().kind, TokenKind::Punctuator(Punctuator::RBrace)) {
        if cursor.is_eof() {
            return Err(cursor.err_unexpected("`}`"));
        }
        let item_attrs = parse_attributes(cursor)?;
        if matches!(cursor.peek().kind, TokenKind::Keyword(Keyword::Module)) {
            return Err(ParseError::NestedModule { source: cursor.source_code(), position: cursor.location().position });
        }
        statements.push(parse_module_item(cursor, item_attrs, parent_version)?);
    }
    let end_loc = cursor.expect_punct(Punctuator::RBrace, "`}`")?;

    let root_loc = kw_loc.extend_to(&end_loc);
    let nested_metadata = build_metadata(&attrs, Some(name.clone()), parent_version);

    let module = Module {
        metadata: nested_metadata,
        imports: Vec::new(),
        root: Statement::new(StatementKind::Multi(statements), root_loc),
        structs: OrderedMap::new(),
        functions: OrderedMap::new(),
        constants: OrderedMap::new(),
        externals: OrderedMap::new(),
        aliases: OrderedMap::new(),
        options: OrderedMap::new(),
    };

    Ok(NestedModuleResult::Imported(ImportedModule { identifier: name, module: std::sync::Arc::new(module) }))
}

fn parse_module_item(cursor: &mut Cursor, attrs: Attributes, version: LangVersion) -> ParseResult<Statement> {
    match cursor.peek().kind.clone() {
        TokenKind::Keyword(Keyword::Import) => parse_import(cursor),
        TokenKind::Keyword(Keyword::Option) => parse_option_decl(cursor, attrs),
        TokenKind::Keyword(Keyword::Const) => parse_const_decl(cursor, attrs, version),
        TokenKind::Keyword(Keyword::External) => parse_external_decl(cursor, attrs),
        TokenKind::Keyword(Keyword::Struct) => parse_struct_decl(cursor, attrs),
        TokenKind::Keyword(Keyword::Fn) => parse_function_decl(cursor, attrs),
        TokenKind::Keyword(Keyword::Alias) => parse_alias_decl(cursor, attrs),
        _ => Err(cursor.err_unexpected("a module-level declaration (import/option/const/external/struct/fn/alias)")),
    }
}

fn parse_import(cursor: &mut Cursor) -> ParseResult<Statement> {
    let start = cursor.expect_keyword(Keyword::Import, "`import`")?;

    // `import a.b.c as M;` or `import a, b from Module.Path;`
    let mut first_path = vec![cursor.expect_identifier("a module path segment")?.0];
    while cursor.eat_punct(Punctuator::Dot) {
        first_path.push(cursor.expect_identifier("a module path segment")?.0);
    }

    if cursor.eat_keyword(Keyword::As) {
        let (alias, _) = cursor.expect_identifier("an alias name")?;
        let end = cursor.expect_punct(Punctuator::Semicolon, "`;`")?;
        return Ok(Statement::new(
            StatementKind::Import { module_path: first_path, alias: Some(alias), identifiers: Vec::new(), module_index: None },
            start.extend_to(&end),
        ));
    }

    // Treated as `import <identifiers> from <module path>;` where the
    // first-parsed dotted path was actually the identifier list.
    let mut identifiers = vec![(first_path.remove(0), None)];
    while cursor.eat_punct(Punctuator::Comma) {
        let (name, _) = cursor.expect_identifier("an imported identifier")?;
        let alias = if cursor.eat_keyword(Keyword::As) {
            Some(cursor.expect_identifier("an alias name")?.0)
        } else {
            None
        };
        identifiers.push((name, alias));
    }
    cursor.expect_keyword(Keyword::From, "`from`")?;
    let mut module_path = vec![cursor.expect_identifier("a module path segment")?.0];
    while cursor.eat_punct(Punctuator::Dot) {
        module_path.push(cursor.expect_identifier("a module path segment")?.0);
    }
    let end = cursor.expect_punct(Punctuator::Semicolon, "`;`")?;

    Ok(Statement::new(
        StatementKind::Import { module_path, alias: None, identifiers, module_index: None },
        start.extend_to(&end),
    ))
}

fn parse_option_decl(cursor: &mut Cursor, attrs: Attributes) -> ParseResult<Statement> {
    let start = cursor.expect_keyword(Keyword::Option, "`option`")?;
    let (name, _) = cursor.expect_identifier("an option name")?;
    cursor.expect_punct(Punctuator::Colon, "`:`")?;
    let ty_expr = parse_type_expression(cursor)?;
    let default_expr = if cursor.eat_operator(Operator::Assign) {
        Some(Box::new(expression::parse_expression(cursor)?))
    } else {
        None
    };
    let end = cursor.expect_punct(Punctuator::Semicolon, "`;`")?;
    let _ = attrs;
    let default = match &default_expr {
        Some(e) => ExpressionValue::Expression(e.clone()),
        None => ExpressionValue::Absent,
    };
    Ok(Statement::new(
        StatementKind::DeclareOption { name, ty: expr_to_placeholder_type(&ty_expr), default, default_expr, index: None },
        start.extend_to(&end),
    ))
}

fn parse_const_decl(cursor: &mut Cursor, attrs: Attributes, _version: LangVersion) -> ParseResult<Statement> {
    let start = cursor.expect_keyword(Keyword::Const, "`const`")?;
    let (name, _) = cursor.expect_identifier("a constant name")?;
    let ty = if cursor.eat_punct(Punctuator::Colon) {
        Some(expr_to_placeholder_type(&parse_type_expression(cursor)?))
    } else {
        None
    };
    cursor.expect_operator(Operator::Assign, "`=`")?;
    let expr = expression::parse_expression(cursor)?;
    let end = cursor.expect_punct(Punctuator::Semicolon, "`;`")?;
    let _ = attrs;
    Ok(Statement::new(
        StatementKind::DeclareConst { name, ty, value: ExpressionValue::Absent, expr: Some(Box::new(expr)), index: None },
        start.extend_to(&end),
    ))
}

fn parse_external_decl(cursor: &mut Cursor, attrs: Attributes) -> ParseResult<Statement> {
    let start = cursor.expect_keyword(Keyword::External, "`external`")?;
    let name = if let TokenKind::Identifier(n) = cursor.peek().kind.clone() {
        if matches!(cursor.peek_at(1).kind, TokenKind::Punctuator(Punctuator::LBrace)) {
            cursor.advance();
            Some(n)
        } else {
            None
        }
    } else {
        None
    };
    cursor.expect_punct(Punctuator::LBrace, "`{`")?;
    let mut vars = Vec::new();
    while !matches!(cursor.peek().kind, TokenKind::Punctuator(Punctuator::RBrace)) {
        let var_attrs = parse_attributes(cursor)?;
        let (var_name, var_loc) = cursor.expect_identifier("an external variable name")?;
        cursor.expect_punct(Punctuator::Colon, "`:`")?;
        let ty_expr = parse_type_expression(cursor)?;
        vars.push(ExternalVar {
            name: var_name,
            ty: expr_to_placeholder_type(&ty_expr),
            attributes: var_attrs,
            location: var_loc,
            index: None,
        });
        if !cursor.eat_punct(Punctuator::Comma) {
            break;
        }
    }
    cursor.expect_punct(Punctuator::RBrace, "`}`")?;
    let end = cursor.previous_location();
    Ok(Statement::new(
        StatementKind::DeclareExternal { name, vars, attributes: attrs, index: None },
        start.extend_to(&end),
    ))
}

fn parse_struct_decl(cursor: &mut Cursor, attrs: Attributes) -> ParseResult<Statement> {
    let start = cursor.expect_keyword(Keyword::Struct, "`struct`")?;
    let (name, _) = cursor.expect_identifier("a struct name")?;
    cursor.expect_punct(Punctuator::LBrace, "`{`")?;
    let mut fields = Vec::new();
    while !matches!(cursor.peek().kind, TokenKind::Punctuator(Punctuator::RBrace)) {
        let field_attrs = parse_attributes(cursor)?;
        let (field_name, field_loc) = cursor.expect_identifier("a field name")?;
        cursor.expect_punct(Punctuator::Colon, "`:`")?;
        let ty_expr = parse_type_expression(cursor)?;
        fields.push(StructField {
            name: field_name,
            ty: expr_to_placeholder_type(&ty_expr),
            attributes: field_attrs,
            location: field_loc,
        });
        if !cursor.eat_punct(Punctuator::Comma) {
            break;
        }
    }
    let end = cursor.expect_punct(Punctuator::RBrace, "`}`")?;
    Ok(Statement::new(
        StatementKind::DeclareStruct(Box::new(StructDeclaration {
            name,
            fields,
            attributes: attrs,
            location: start.extend_to(&end),
            index: None,
        })),
        start.extend_to(&end),
    ))
}

fn parse_alias_decl(cursor: &mut Cursor, attrs: Attributes) -> ParseResult<Statement> {
    let start = cursor.expect_keyword(Keyword::Alias, "`alias`")?;
    let (name, _) = cursor.expect_identifier("an alias name")?;
    cursor.expect_operator(Operator::Assign, "`=`")?;
    let target = expression::parse_expression(cursor)?;
    let end = cursor.expect_punct(Punctuator::Semicolon, "`;`")?;
    Ok(Statement::new(
        StatementKind::DeclareAlias { name, target: Box::new(target), attributes: attrs, index: None },
        start.extend_to(&end),
    ))
}

fn parse_function_decl(cursor: &mut Cursor, attrs: Attributes) -> ParseResult<Statement> {
    let start = cursor.expect_keyword(Keyword::Fn, "`fn`")?;
    let (name, _) = cursor.expect_identifier("a function name")?;
    cursor.expect_punct(Punctuator::LParen, "`(`")?;
    let mut parameters = Vec::new();
    while !matches!(cursor.peek().kind, TokenKind::Punctuator(Punctuator::RParen)) {
        let semantic = if cursor.eat_keyword(Keyword::Out) {
            ParameterSemantic::Out
        } else if cursor.eat_keyword(Keyword::Inout) {
            ParameterSemantic::Inout
        } else {
            cursor.eat_keyword(Keyword::In);
            ParameterSemantic::In
        };
        let (param_name, param_loc) = cursor.expect_identifier("a parameter name")?;
        cursor.expect_punct(Punctuator::Colon, "`:`")?;
        let ty_expr = parse_type_expression(cursor)?;
        parameters.push(FunctionParameter {
            name: param_name,
            ty: expr_to_placeholder_type(&ty_expr),
            semantic,
            location: param_loc,
            index: None,
        });
        if !cursor.eat_punct(Punctuator::Comma) {
            break;
        }
    }
    cursor.expect_punct(Punctuator::RParen, "`)`")?;

    // `fn f(...) : T { ... }`; omitted entirely means a void function.
    let return_type = if cursor.eat_punct(Punctuator::Colon) {
        Some(expr_to_placeholder_type(&parse_type_expression(cursor)?))
    } else {
        None
    };

    let body = parse_block(cursor)?;
    let end = body.location.clone();

    Ok(Statement::new(
        StatementKind::DeclareFunction(Box::new(FunctionDeclaration {
            name,
            parameters,
            return_type,
            body,
            attributes: attrs,
            location: start.extend_to(&end),
            index: None,
        })),
        start.extend_to(&end),
    ))
}

/// The parser doesn't resolve a type expression to an [`ExpressionType`]
/// yet (that's C6). A bare builtin primitive name resolves immediately
/// since it never depends on imports or declaration order; anything else
/// (a struct name, `vec3[f32]`, `Module.Type`, ...) is kept as raw syntax
/// under [`ExpressionType::Unresolved`] for the resolver to reinterpret.
fn expr_to_placeholder_type(expr: &Expression) -> ExpressionType {
    if let ExpressionKind::Identifier(name) = &expr.kind {
        if let Some(prim) = primitive_from_name(name) {
            return ExpressionType::Primitive(prim);
        }
    }
    ExpressionType::Unresolved(Box::new(expr.clone()))
}

fn primitive_from_name(name: &str) -> Option<PrimitiveType> {
    Some(match name {
        "bool" => PrimitiveType::Bool,
        "f32" => PrimitiveType::F32,
        "f64" => PrimitiveType::F64,
        "i32" => PrimitiveType::I32,
        "u32" => PrimitiveType::U32,
        "string" => PrimitiveType::String,
        _ => return None,
    })
}

// ---------------------------------------------------------------------
// Statements inside function bodies — spec §3.4
// ---------------------------------------------------------------------

pub fn parse_block(cursor: &mut Cursor) -> ParseResult<Statement> {
    let start = cursor.expect_punct(Punctuator::LBrace, "`{`")?;
    let mut statements = Vec::new();
    while !matches!(cursor.peek().kind, TokenKind::Punctuator(Punctuator::RBrace)) {
        if cursor.is_eof() {
            return Err(cursor.err_unexpected("`}`"));
        }
        statements.push(parse_statement(cursor)?);
    }
    let end = cursor.expect_punct(Punctuator::RBrace, "`}`")?;
    Ok(Statement::new(StatementKind::Scoped(Box::new(Statement::new(StatementKind::Multi(statements), start.extend_to(&end)))), start.extend_to(&end)))
}

pub fn parse_statement(cursor: &mut Cursor) -> ParseResult<Statement> {
    match cursor.peek().kind.clone() {
        TokenKind::Punctuator(Punctuator::LBrace) => parse_block(cursor),
        TokenKind::Keyword(Keyword::If) => parse_if(cursor, false),
        TokenKind::Keyword(Keyword::While) => parse_while(cursor),
        TokenKind::Keyword(Keyword::For) => parse_for(cursor),
        TokenKind::Keyword(Keyword::Break) => {
            let loc = cursor.expect_keyword(Keyword::Break, "`break`")?;
            let end = cursor.expect_punct(Punctuator::Semicolon, "`;`")?;
            Ok(Statement::new(StatementKind::Break, loc.extend_to(&end)))
        }
        TokenKind::Keyword(Keyword::Continue) => {
            let loc = cursor.expect_keyword(Keyword::Continue, "`continue`")?;
            let end = cursor.expect_punct(Punctuator::Semicolon, "`;`")?;
            Ok(Statement::new(StatementKind::Continue, loc.extend_to(&end)))
        }
        TokenKind::Keyword(Keyword::Discard) => {
            let loc = cursor.expect_keyword(Keyword::Discard, "`discard`")?;
            let end = cursor.expect_punct(Punctuator::Semicolon, "`;`")?;
            Ok(Statement::new(StatementKind::Discard, loc.extend_to(&end)))
        }
        TokenKind::Keyword(Keyword::Return) => {
            let loc = cursor.expect_keyword(Keyword::Return, "`return`")?;
            let value = if matches!(cursor.peek().kind, TokenKind::Punctuator(Punctuator::Semicolon)) {
                None
            } else {
                Some(Box::new(expression::parse_expression(cursor)?))
            };
            let end = cursor.expect_punct(Punctuator::Semicolon, "`;`")?;
            Ok(Statement::new(StatementKind::Return(value), loc.extend_to(&end)))
        }
        TokenKind::Keyword(Keyword::Let) => parse_let(cursor),
        TokenKind::Keyword(Keyword::Const) if matches!(cursor.peek_at(1).kind, TokenKind::Keyword(Keyword::If)) => {
            cursor.advance();
            parse_if(cursor, true)
        }
        TokenKind::Keyword(Keyword::Const) => parse_const_decl(cursor, Vec::new(), LangVersion::CURRENT_MAX),
        _ => parse_expression_statement(cursor),
    }
}

/// `is_const` distinguishes `const if` (every arm must be an evaluable
/// constant, per spec §4.4 — the constant propagator later collapses it to
/// whichever single arm survives) from a plain runtime `if`. Every arm in
/// a chain shares the leading statement's const-ness: `if (a) {} else if
/// (b) {}` can't mix a const and a runtime condition.
fn parse_if(cursor: &mut Cursor, is_const: bool) -> ParseResult<Statement> {
    let start = cursor.expect_keyword(Keyword::If, "`if`")?;
    cursor.expect_punct(Punctuator::LParen, "`(`")?;
    let condition = expression::parse_expression(cursor)?;
    cursor.expect_punct(Punctuator::RParen, "`)`")?;
    let body = parse_block(cursor)?;

    let mut arms = vec![BranchArm { condition: Some(condition), body: Box::new(body), is_const }];
    let mut else_body = None;

    loop {
        if cursor.eat_keyword(Keyword::Else) {
            if cursor.eat_keyword(Keyword::If) {
                cursor.expect_punct(Punctuator::LParen, "`(`")?;
                let cond = expression::parse_expression(cursor)?;
                cursor.expect_punct(Punctuator::RParen, "`)`")?;
                let body = parse_block(cursor)?;
                arms.push(BranchArm { condition: Some(cond), body: Box::new(body), is_const });
                continue;
            } else {
                else_body = Some(Box::new(parse_block(cursor)?));
            }
        }
        break;
    }

    let end = else_body.as_ref().map(|b| b.location.clone()).unwrap_or_else(|| arms.last().unwrap().body.location.clone());
    Ok(Statement::new(StatementKind::Branch { arms, else_body }, start.extend_to(&end)))
}

fn parse_while(cursor: &mut Cursor) -> ParseResult<Statement> {
    let start = cursor.expect_keyword(Keyword::While, "`while`")?;
    cursor.expect_punct(Punctuator::LParen, "`(`")?;
    let condition = expression::parse_expression(cursor)?;
    cursor.expect_punct(Punctuator::RParen, "`)`")?;
    let body = parse_block(cursor)?;
    let end = body.location.clone();
    Ok(Statement::new(
        StatementKind::While { condition: Box::new(condition), body: Box::new(body) },
        start.extend_to(&end),
    ))
}

fn parse_for(cursor: &mut Cursor) -> ParseResult<Statement> {
    let start = cursor.expect_keyword(Keyword::For, "`for`")?;
    let (variable, _) = cursor.expect_identifier("a loop variable name")?;
    cursor.expect_keyword(Keyword::In, "`in`")?;
    let first = expression::parse_expression(cursor)?;

    if cursor.eat_punct(Punctuator::Colon) {
        // `for i in from:to` or `for i in from:to:step`
        let to = expression::parse_expression(cursor)?;
        let step = if cursor.eat_punct(Punctuator::Colon) {
            Some(Box::new(expression::parse_expression(cursor)?))
        } else {
            None
        };
        let body = parse_block(cursor)?;
        let end = body.location.clone();
        return Ok(Statement::new(
            StatementKind::For { variable, from: Box::new(first), to: Box::new(to), step, body: Box::new(body), variable_index: None },
            start.extend_to(&end),
        ));
    }

    let body = parse_block(cursor)?;
    let end = body.location.clone();
    Ok(Statement::new(
        StatementKind::ForEach { variable, container: Box::new(first), body: Box::new(body), variable_index: None },
        start.extend_to(&end),
    ))
}

fn parse_let(cursor: &mut Cursor) -> ParseResult<Statement> {
    let start = cursor.expect_keyword(Keyword::Let, "`let`")?;
    let (name, _) = cursor.expect_identifier("a variable name")?;
    let ty = if cursor.eat_punct(Punctuator::Colon) {
        Some(expr_to_placeholder_type(&parse_type_expression(cursor)?))
    } else {
        None
    };
    let value = if cursor.eat_operator(Operator::Assign) {
        Some(Box::new(expression::parse_expression(cursor)?))
    } else {
        None
    };
    let end = cursor.expect_punct(Punctuator::Semicolon, "`;`")?;
    Ok(Statement::new(
        StatementKind::DeclareVariable { name, ty, value, index: None },
        start.extend_to(&end),
    ))
}

fn parse_expression_statement(cursor: &mut Cursor) -> ParseResult<Statement> {
    let expr = expression::parse_expression(cursor)?;
    let start = expr.location.clone();

    let assign_op = match cursor.peek().kind {
        TokenKind::Operator(Operator::Assign) => Some(None),
        TokenKind::Operator(Operator::PlusEq) => Some(Some(BinaryOp::Add)),
        TokenKind::Operator(Operator::MinusEq) => Some(Some(BinaryOp::Sub)),
        TokenKind::Operator(Operator::StarEq) => Some(Some(BinaryOp::Mul)),
        TokenKind::Operator(Operator::SlashEq) => Some(Some(BinaryOp::Div)),
        TokenKind::Operator(Operator::PercentEq) => Some(Some(BinaryOp::Mod)),
        TokenKind::Operator(Operator::AmpEq) => Some(Some(BinaryOp::BitAnd)),
        TokenKind::Operator(Operator::PipeEq) => Some(Some(BinaryOp::BitOr)),
        TokenKind::Operator(Operator::CaretEq) => Some(Some(BinaryOp::BitXor)),
        TokenKind::Operator(Operator::ShlEq) => Some(Some(BinaryOp::Shl)),
        TokenKind::Operator(Operator::ShrEq) => Some(Some(BinaryOp::Shr)),
        _ => None,
    };

    if let Some(compound_op) = assign_op {
        cursor.advance();
        let rhs = expression::parse_expression(cursor)?;
        let end = cursor.expect_punct(Punctuator::Semicolon, "`;`")?;
        let value = match compound_op {
            None => rhs,
            Some(op) => {
                let loc = expr.location.extend_to(&rhs.location);
                Expression::new(ExpressionKind::Binary { op, left: Box::new(expr.clone()), right: Box::new(rhs) }, loc)
            }
        };
        let loc = start.extend_to(&end);
        return Ok(Statement::new(
            StatementKind::Expression(Box::new(Expression::new(
                ExpressionKind::Assign { target: Box::new(expr), value: Box::new(value) },
                loc.clone(),
            ))),
            loc,
        ));
    }

    let end = cursor.expect_punct(Punctuator::Semicolon, "`;`")?;
    let loc = start.extend_to(&end);
    Ok(Statement::new(StatementKind::Expression(Box::new(expr)), loc))
}

// small convenience extension used by a couple of call sites above
trait CursorExt {
    fn expect_operator(&mut self, op: Operator, what: &str) -> ParseResult<SourceLocation>;
}

impl<'t> CursorExt for Cursor<'t> {
    fn expect_operator(&mut self, op: Operator, what: &str) -> ParseResult<SourceLocation> {
        if self.eat_operator(op) {
            Ok(self.previous_location())
        } else {
            Err(self.err_unexpected(what))
        }
    }
}
