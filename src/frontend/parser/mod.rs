//! The construction driver. There is no syntax tree: the parser emits graph
//! nodes through the [`NodeBuilder`] as it recognizes each construct, keeping
//! the [`Scope`] up to date as it goes.
//!
//! Items are read in three passes over the token stream. Struct types come
//! first, then function signatures and global constants, so bodies can refer
//! to anything declared in the file. Bodies are built last, each from a
//! lexer checkpoint saved during the second pass.

use hashbrown::HashSet;
use tracing::debug;

use crate::{
    error::CompileError,
    frontend::{
        SourceFile,
        intern::InternedSymbol,
        lexer::{Keyword, Lexer, Span, Token, TokenKind},
    },
    middle::{
        graph::{Graph, NodeId},
        lattice::{IntWidth, MAX_SCALARS, Type},
        nodegen::{
            Call, Constant, Cursor, Exit, FunctionEntry, NodeBuilder, Parameter, Phi, Region,
            Return,
        },
        primitive::PrimitiveKind,
        scope::{Arm, Binding, Scope},
    },
};

mod expression;
mod statement;

pub(crate) type ParseResult<T> = Result<T, CompileError>;

/// The graph built for a whole file
#[derive(Debug)]
pub struct Construction {
    pub graph: Graph,
    /// The `Exit` node ending the program
    pub exit: NodeId,
    pub functions: usize,
}

struct FunctionDeclaration<'source> {
    name: InternedSymbol,
    span: Span,
    entry: NodeId,
    params: Vec<(InternedSymbol, Type, Span)>,
    ret: Type,
    body: Lexer<'source>,
}

struct FunctionContext {
    span: Span,
    ret: Type,
    returns: Vec<(Option<NodeId>, Cursor)>,
}

struct LoopContext {
    defer_depth: usize,
    breaks: Vec<Arm>,
    continues: Vec<Arm>,
}

/// A `defer`red statement, re-parsed from its checkpoint each time the
/// enclosing block is left
#[derive(Clone)]
struct Deferred<'source> {
    lexer: Lexer<'source>,
    scope: Scope,
}

pub struct Parser<'source> {
    lexer: Lexer<'source>,
    builder: NodeBuilder,
    scope: Scope,
    function: Option<FunctionContext>,
    loops: Vec<LoopContext>,
    /// Deferred statements of every open block, outermost first
    defers: Vec<Vec<Deferred<'source>>>,
    /// Names whose address is taken somewhere in the current function
    address_taken: HashSet<InternedSymbol>,
    /// Keep locals whose address is never taken as SSA values instead of
    /// stack slots
    promote_locals: bool,
    struct_literals: bool,
    deferring: bool,
}

impl<'source> Parser<'source> {
    pub fn construct(source: &'source SourceFile, promote_locals: bool) -> ParseResult<Construction> {
        let mut parser = Self {
            lexer: Lexer::new(source),
            builder: NodeBuilder::new(),
            scope: Scope::new(),
            function: None,
            loops: Vec::new(),
            defers: Vec::new(),
            address_taken: HashSet::new(),
            promote_locals,
            struct_literals: true,
            deferring: false,
        };

        parser.declare_types()?;
        let functions = parser.declare_functions()?;
        let main = parser.find_main()?;
        let count = functions.len();

        for function in functions {
            parser.build_function(function)?;
        }

        let exit = parser.finish(main);

        Ok(Construction {
            graph: parser.builder.into_graph(),
            exit,
            functions: count,
        })
    }

    /* Tokens */

    fn eof_span(&self) -> Span {
        let end = self.lexer.source().contents.len();
        Span::new(end, end)
    }

    fn text(&self, span: Span) -> &'source str {
        self.lexer.source().value_of_span(span)
    }

    fn symbol(&self, span: Span) -> InternedSymbol {
        InternedSymbol::new(self.text(span))
    }

    fn peek_kind(&mut self) -> ParseResult<Option<TokenKind>> {
        Ok(self.lexer.peek()?.map(|token| token.kind))
    }

    fn at(&mut self, kind: TokenKind) -> ParseResult<bool> {
        Ok(self.peek_kind()? == Some(kind))
    }

    /// Consumes the next token if it is a `kind`
    fn eat(&mut self, kind: TokenKind) -> ParseResult<Option<Token>> {
        if self.at(kind)? {
            self.lexer.next()
        } else {
            Ok(None)
        }
    }

    fn unexpected(&self, token: Token, expected: &str) -> CompileError {
        CompileError::UnexpectedToken {
            expected: expected.into(),
            found: self.text(token.span).into(),
            span: token.span,
        }
    }

    fn expect_peek(&mut self, expecting: &str) -> ParseResult<Token> {
        match self.lexer.peek()? {
            Some(token) => Ok(token),
            None => Err(CompileError::UnexpectedEof {
                context: expecting.into(),
                span: self.eof_span(),
            }),
        }
    }

    fn expect_next(&mut self, expecting: &str) -> ParseResult<Token> {
        match self.lexer.next()? {
            Some(token) => Ok(token),
            None => Err(CompileError::UnexpectedEof {
                context: expecting.into(),
                span: self.eof_span(),
            }),
        }
    }

    fn expect_next_to_be(&mut self, kind: TokenKind) -> ParseResult<Token> {
        let token = self.expect_next(kind.describe())?;

        if token.kind != kind {
            return Err(self.unexpected(token, &format!("`{}`", kind.describe())));
        }

        Ok(token)
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> ParseResult<Token> {
        self.expect_next_to_be(TokenKind::Keyword(keyword))
    }

    fn parse_identifier(&mut self) -> ParseResult<(InternedSymbol, Span)> {
        let token = self.expect_next("identifier")?;

        if token.kind != TokenKind::Identifier {
            return Err(self.unexpected(token, "identifier"));
        }

        Ok((self.symbol(token.span), token.span))
    }

    /// Skips a bracketed group whose opening token is next
    fn skip_group(&mut self) -> ParseResult<Span> {
        let open = self.expect_next("opening bracket")?;
        let mut depth = 0usize;
        let mut token = open;

        loop {
            match token.kind {
                TokenKind::OpenParen | TokenKind::OpenBracket | TokenKind::OpenBrace => depth += 1,
                TokenKind::CloseParen | TokenKind::CloseBracket | TokenKind::CloseBrace => {
                    depth -= 1
                }
                _ => {}
            }

            if depth == 0 {
                return Ok(open.span.to(token.span));
            }

            token = self.expect_next("closing bracket")?;
        }
    }

    /// Skips tokens up to and including the next `;` outside any brackets
    fn skip_statement(&mut self) -> ParseResult<()> {
        loop {
            let token = self.expect_peek("`;`")?;

            match token.kind {
                TokenKind::Semicolon => {
                    self.lexer.next()?;
                    return Ok(());
                }
                TokenKind::OpenParen | TokenKind::OpenBracket | TokenKind::OpenBrace => {
                    self.skip_group()?;
                }
                _ => {
                    self.lexer.next()?;
                }
            }
        }
    }

    /// Skips a function signature and body, positioned after `func`
    fn skip_function(&mut self) -> ParseResult<()> {
        while !self.at(TokenKind::OpenBrace)? {
            self.expect_next("function body")?;
        }

        self.skip_group()?;
        Ok(())
    }

    /* Types */

    // type = "*" type
    //      | "[" INTEGER "]" type
    //      | "(" type ( "," type )+ ")"
    //      | "func" "(" ( type ( "," type )* )? ")" type?
    //      | IDENTIFIER
    fn parse_type(&mut self) -> ParseResult<Type> {
        let token = self.expect_next("type")?;

        match token.kind {
            TokenKind::Asterisk => Ok(Type::pointer_to(self.parse_type()?)),
            TokenKind::OpenBracket => {
                let length = self.expect_next_to_be(TokenKind::IntegerLiteral)?;
                let Ok(length) = self.text(length.span).replace('_', "").parse::<usize>() else {
                    return Err(self.unexpected(length, "array length"));
                };

                self.expect_next_to_be(TokenKind::CloseBracket)?;
                let element = self.parse_type()?;
                Self::array_type(element, length, token.span)
            }
            TokenKind::OpenParen => {
                let mut members = vec![self.parse_type()?];

                while self.eat(TokenKind::Comma)?.is_some() {
                    members.push(self.parse_type()?);
                }

                self.expect_next_to_be(TokenKind::CloseParen)?;

                match members.len() {
                    1 => Ok(members.remove(0)),
                    _ => Self::bounded(Type::tuple(members), token.span),
                }
            }
            TokenKind::Keyword(Keyword::Func) => {
                self.expect_next_to_be(TokenKind::OpenParen)?;
                let mut params = Vec::new();

                if !self.at(TokenKind::CloseParen)? {
                    params.push(self.parse_type()?);

                    while self.eat(TokenKind::Comma)?.is_some() {
                        params.push(self.parse_type()?);
                    }
                }

                self.expect_next_to_be(TokenKind::CloseParen)?;

                let ret = if self.starts_type()? {
                    self.parse_type()?
                } else {
                    Type::Void
                };

                Ok(Type::function(params, ret, None))
            }
            TokenKind::Identifier => self.resolve_type(token.span),
            _ => Err(self.unexpected(token, "type")),
        }
    }

    fn starts_type(&mut self) -> ParseResult<bool> {
        Ok(matches!(
            self.peek_kind()?,
            Some(
                TokenKind::Asterisk
                    | TokenKind::OpenBracket
                    | TokenKind::OpenParen
                    | TokenKind::Identifier
                    | TokenKind::Keyword(Keyword::Func)
            )
        ))
    }

    fn resolve_type(&self, span: Span) -> ParseResult<Type> {
        let name = self.text(span);

        if let Ok(primitive) = name.parse::<PrimitiveKind>() {
            return Ok(primitive.bottom_type());
        }

        match self.scope.lookup(InternedSymbol::new(name)) {
            Some(Binding::Type(ty)) => Ok(ty.clone()),
            _ => Err(CompileError::UnknownType {
                name: name.into(),
                span,
            }),
        }
    }

    /* Declarations */

    fn declare_global(&mut self, name: InternedSymbol, span: Span, binding: Binding) -> ParseResult<()> {
        if self.scope.declare(name, binding) {
            Ok(())
        } else {
            Err(CompileError::Redeclaration {
                name: name.to_string(),
                span,
            })
        }
    }

    /// First pass: struct types, in source order
    fn declare_types(&mut self) -> ParseResult<()> {
        let start = self.lexer.clone();

        while let Some(token) = self.lexer.next()? {
            match token.kind {
                TokenKind::Keyword(Keyword::Type) => self.parse_struct_declaration()?,
                TokenKind::Keyword(Keyword::Func) => self.skip_function()?,
                TokenKind::Keyword(Keyword::Const) => self.skip_statement()?,
                _ => return Err(self.unexpected(token, "`func`, `type` or `const`")),
            }
        }

        self.lexer = start;
        Ok(())
    }

    // "type" IDENTIFIER "struct" "{" ( IDENTIFIER type ";" )* "}"
    fn parse_struct_declaration(&mut self) -> ParseResult<()> {
        let (name, span) = self.parse_identifier()?;
        self.expect_keyword(Keyword::Struct)?;
        self.expect_next_to_be(TokenKind::OpenBrace)?;

        let mut fields: Vec<(InternedSymbol, Type)> = Vec::new();

        while self.eat(TokenKind::CloseBrace)?.is_none() {
            let (field, field_span) = self.parse_identifier()?;
            let ty = self.parse_type()?;
            self.expect_next_to_be(TokenKind::Semicolon)?;

            if fields.iter().any(|(existing, _)| *existing == field) {
                return Err(CompileError::Redeclaration {
                    name: field.to_string(),
                    span: field_span,
                });
            }

            fields.push((field, ty));
        }

        let ty = Type::Struct {
            name,
            fields: fields.into(),
        };

        let ty = Self::bounded(ty, span)?;

        debug!(%name, size = ty.layout().size, "declared struct");
        self.declare_global(name, span, Binding::Type(ty))
    }

    fn array_type(element: Type, length: usize, span: Span) -> ParseResult<Type> {
        let element_name = element.name();

        Type::array(element, length).ok_or_else(|| CompileError::TypeTooLarge {
            ty: format!("[{length}]{element_name}"),
            span,
        })
    }

    /// Rejects aggregates holding more than [`MAX_SCALARS`] scalars
    fn bounded(ty: Type, span: Span) -> ParseResult<Type> {
        if ty.scalar_count() > MAX_SCALARS {
            return Err(CompileError::TypeTooLarge { ty: ty.name(), span });
        }

        Ok(ty)
    }

    /// Second pass: function signatures and global constants. Bodies are
    /// skipped and returned for the last pass.
    fn declare_functions(&mut self) -> ParseResult<Vec<FunctionDeclaration<'source>>> {
        let mut functions = Vec::new();

        while let Some(token) = self.lexer.next()? {
            match token.kind {
                TokenKind::Keyword(Keyword::Type) => {
                    self.parse_identifier()?;
                    self.expect_keyword(Keyword::Struct)?;
                    self.skip_group()?;
                }
                TokenKind::Keyword(Keyword::Func) => {
                    functions.push(self.parse_function_signature()?);
                }
                TokenKind::Keyword(Keyword::Const) => self.parse_global_constant()?,
                _ => return Err(self.unexpected(token, "`func`, `type` or `const`")),
            }
        }

        Ok(functions)
    }

    // IDENTIFIER "(" ( IDENTIFIER type ( "," IDENTIFIER type )* )? ")" type? block
    fn parse_function_signature(&mut self) -> ParseResult<FunctionDeclaration<'source>> {
        let (name, span) = self.parse_identifier()?;
        self.expect_next_to_be(TokenKind::OpenParen)?;

        let mut params = Vec::new();

        if !self.at(TokenKind::CloseParen)? {
            loop {
                let (param, param_span) = self.parse_identifier()?;
                let ty = self.parse_type()?;

                if params.iter().any(|(existing, _, _)| *existing == param) {
                    return Err(CompileError::Redeclaration {
                        name: param.to_string(),
                        span: param_span,
                    });
                }

                params.push((param, ty, param_span));

                if self.eat(TokenKind::Comma)?.is_none() {
                    break;
                }
            }
        }

        self.expect_next_to_be(TokenKind::CloseParen)?;

        let ret = if self.at(TokenKind::OpenBrace)? {
            Type::Void
        } else {
            self.parse_type()?
        };

        let ty = Type::function(
            params.iter().map(|(_, ty, _)| ty.clone()).collect(),
            ret.clone(),
            None,
        );

        self.builder.set_span(span);
        let entry = self.builder.make(FunctionEntry { name, ty });
        self.declare_global(name, span, Binding::Value(entry))?;

        let body = self.lexer.clone();
        let open = self.expect_peek("function body")?;

        if open.kind != TokenKind::OpenBrace {
            return Err(self.unexpected(open, "`{`"));
        }

        self.skip_group()?;

        Ok(FunctionDeclaration {
            name,
            span,
            entry,
            params,
            ret,
            body,
        })
    }

    // "const" IDENTIFIER type? "=" expression ";"
    fn parse_global_constant(&mut self) -> ParseResult<()> {
        let (name, span) = self.parse_identifier()?;
        let value = self.parse_constant_initializer()?;

        if !self.builder.graph.ty(value).is_constant() && !self.builder.graph.ty(value).is_error() {
            self.builder.set_span(span);
            let error = self
                .builder
                .error(format!("initializer of `{name}` is not a constant"));
            return self.declare_global(name, span, Binding::Value(error));
        }

        self.declare_global(name, span, Binding::Value(value))
    }

    fn find_main(&self) -> ParseResult<NodeId> {
        let main = InternedSymbol::new("main");

        let Some(Binding::Value(entry)) = self.scope.lookup(main) else {
            return Err(CompileError::MissingMain {
                span: self.eof_span(),
            });
        };

        match self.builder.graph.ty(*entry) {
            Type::Function { params, ret, .. } if params.is_empty() && **ret == Type::Void => {
                Ok(*entry)
            }
            _ => Err(CompileError::InvalidMain {
                span: self.eof_span(),
            }),
        }
    }

    /* Function bodies */

    fn build_function(&mut self, declaration: FunctionDeclaration<'source>) -> ParseResult<()> {
        let FunctionDeclaration {
            name,
            span,
            entry,
            params,
            ret,
            body,
        } = declaration;

        let nodes_before = self.builder.graph.len();

        self.address_taken = Self::scan_address_taken(body.clone())?;
        self.lexer = body;
        self.builder.cursor = Cursor {
            control: entry,
            memory: entry,
        };
        self.function = Some(FunctionContext {
            span,
            ret: ret.clone(),
            returns: Vec::new(),
        });
        self.defers.clear();
        self.loops.clear();

        self.scope.push();

        for (index, (param, ty, param_span)) in params.into_iter().enumerate() {
            self.builder.set_span(param_span);
            let value = self.builder.make(Parameter {
                function: entry,
                index,
            });
            self.bind_local(param, param_span, ty, value)?;
        }

        self.parse_block()?;

        if !self.builder.is_dead() {
            if ret != Type::Void {
                return Err(CompileError::MissingReturn {
                    name: name.to_string(),
                    ty: ret.name(),
                    span,
                });
            }

            if let Some(function) = &mut self.function {
                function.returns.push((None, self.builder.cursor));
            }
        }

        self.scope.pop();
        self.finish_function(entry);

        debug!(
            function = %name,
            nodes = self.builder.graph.len() - nodes_before,
            "built function"
        );

        Ok(())
    }

    /// Joins every return point into a single `Return` hanging off `entry`
    fn finish_function(&mut self, entry: NodeId) {
        let Some(function) = self.function.take() else {
            return;
        };

        let points = function.returns;

        let value = match points.as_slice() {
            [] => return,
            [(value, cursor)] => {
                self.builder.cursor = *cursor;
                *value
            }
            _ => {
                let region = self.builder.make(Region {
                    predecessors: points.iter().map(|(_, cursor)| cursor.control).collect(),
                });
                let memory = self.builder.make(Phi::memory(
                    region,
                    points.iter().map(|(_, cursor)| cursor.memory).collect(),
                ));

                let values = points
                    .iter()
                    .map(|(value, _)| *value)
                    .collect::<Option<Vec<_>>>();
                let value = values.map(|values| self.builder.make(Phi::value(region, values)));

                self.builder.cursor = Cursor {
                    control: region,
                    memory,
                };
                value
            }
        };

        self.builder.set_span(function.span);
        let ret = self.builder.make(Return { value });
        self.builder.graph.append_input(entry, ret);
    }

    /// Names following a `&`, possibly behind opening parentheses, anywhere in
    /// the body starting at `lexer`. These locals keep their stack slots even
    /// when promotion is on.
    fn scan_address_taken(mut lexer: Lexer<'source>) -> ParseResult<HashSet<InternedSymbol>> {
        let mut names = HashSet::new();
        let mut depth = 0usize;

        while let Some(token) = lexer.next()? {
            match token.kind {
                TokenKind::OpenBrace => depth += 1,
                TokenKind::CloseBrace => {
                    depth = depth.saturating_sub(1);

                    if depth == 0 {
                        break;
                    }
                }
                TokenKind::BitwiseAnd => {
                    // `&(x)`, `&((x).field)` and `&x[0]` all take the address of `x`
                    let mut ahead = 0;

                    while let Some(next) = lexer.peek_nth(ahead)? {
                        match next.kind {
                            TokenKind::OpenParen => ahead += 1,
                            TokenKind::Identifier => {
                                let name = lexer.source().value_of_span(next.span);
                                names.insert(InternedSymbol::new(name));
                                break;
                            }
                            _ => break,
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(names)
    }

    /// Binds a new local in a stack slot, or as a plain value when promotion
    /// is on and its address is never taken
    fn bind_local(&mut self, name: InternedSymbol, span: Span, ty: Type, value: NodeId) -> ParseResult<()> {
        let binding = if self.promote_locals && !self.address_taken.contains(&name) {
            Binding::Variable { value, ty }
        } else {
            let address = self.builder.spill_as(value, &ty);
            Binding::Slot { address, ty }
        };

        if self.scope.declare(name, binding) {
            Ok(())
        } else {
            Err(CompileError::Redeclaration {
                name: name.to_string(),
                span,
            })
        }
    }

    /// Calls `main` from the start node and exits with status 0
    fn finish(&mut self, main: NodeId) -> NodeId {
        let start = self.builder.start();
        self.builder.cursor = Cursor {
            control: start,
            memory: start,
        };

        let call = self.builder.make(Call {
            callee: main,
            arguments: Vec::new(),
        });
        self.builder.cursor = Cursor {
            control: call,
            memory: call,
        };

        let status = self.builder.make(Constant(Type::int_of(IntWidth::Int, 0)));
        self.builder.make(Exit { value: status })
    }
}
