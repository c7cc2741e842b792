use crate::{
    error::CompileError,
    frontend::{
        intern::InternedSymbol,
        lexer::{Keyword, Span, TokenKind, unescape},
        parser::{ParseResult, Parser},
    },
    middle::{
        graph::{
            NodeId,
            op::{BinaryOp, CompareOp, UnaryOp},
        },
        lattice::{Level, Type, pointer},
        nodegen::{
            AddressOf, Binary, Branch, Build, Call, Cast, Coerce, Compare, Constant, Cursor,
            Projection, Unary,
        },
        scope::{Arm, Binding, merge},
    },
};

/// What an expression denotes. Places (`Memory` and `Local`) can also be
/// assigned to and have their address taken.
#[derive(Debug, Clone)]
pub(super) enum Operand {
    Value(NodeId),
    /// A value of declared type `ty` stored at `base + offset`
    Memory { base: NodeId, offset: u32, ty: Type },
    /// Member `path` of a local held as an SSA value
    Local {
        name: InternedSymbol,
        path: Vec<usize>,
        ty: Type,
    },
}

#[derive(Debug, Clone, Copy)]
enum Infix {
    Binary(BinaryOp),
    Compare(CompareOp),
    ShortCircuit(BinaryOp),
}

#[derive(Debug, Clone, Copy)]
enum MemberKey {
    Name(InternedSymbol),
    Index(usize),
}

/// Number of binary precedence levels, loosest first
const LEVELS: usize = 9;

fn infix(level: usize, kind: TokenKind) -> Option<Infix> {
    use TokenKind as T;

    Some(match (level, kind) {
        (0, T::LogicalOr) => Infix::ShortCircuit(BinaryOp::LogicalOr),
        (1, T::LogicalAnd) => Infix::ShortCircuit(BinaryOp::LogicalAnd),
        (2, T::DoubleEquals) => Infix::Compare(CompareOp::Equal),
        (2, T::NotEquals) => Infix::Compare(CompareOp::NotEqual),
        (2, T::LessThan) => Infix::Compare(CompareOp::Less),
        (2, T::LessThanOrEqualTo) => Infix::Compare(CompareOp::LessEqual),
        (2, T::GreaterThan) => Infix::Compare(CompareOp::Greater),
        (2, T::GreaterThanOrEqualTo) => Infix::Compare(CompareOp::GreaterEqual),
        (3, T::BitwiseOr) => Infix::Binary(BinaryOp::BitwiseOr),
        (4, T::BitwiseXor) => Infix::Binary(BinaryOp::BitwiseXor),
        (5, T::BitwiseAnd) => Infix::Binary(BinaryOp::BitwiseAnd),
        (6, T::ShiftLeft) => Infix::Binary(BinaryOp::ShiftLeft),
        (6, T::ShiftRight) => Infix::Binary(BinaryOp::ShiftRight),
        (7, T::Plus) => Infix::Binary(BinaryOp::Add),
        (7, T::Minus) => Infix::Binary(BinaryOp::Subtract),
        (8, T::Asterisk) => Infix::Binary(BinaryOp::Multiply),
        (8, T::Divide) => Infix::Binary(BinaryOp::Divide),
        (8, T::Modulus) => Infix::Binary(BinaryOp::Modulus),
        _ => return None,
    })
}

impl<'source> Parser<'source> {
    pub(super) fn parse_expression(&mut self) -> ParseResult<NodeId> {
        let operand = self.parse_operand()?;
        Ok(self.read(operand))
    }

    pub(super) fn parse_operand(&mut self) -> ParseResult<Operand> {
        self.parse_binary(0)
    }

    /// An expression followed by a block. A struct literal would be ambiguous
    /// with the block here, so it needs parentheses.
    pub(super) fn parse_condition(&mut self) -> ParseResult<NodeId> {
        let allowed = std::mem::replace(&mut self.struct_literals, false);
        let result = self.parse_expression();
        self.struct_literals = allowed;
        result
    }

    /// Runs `parse` inside brackets, where struct literals are unambiguous
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        let allowed = std::mem::replace(&mut self.struct_literals, true);
        let result = parse(self);
        self.struct_literals = allowed;
        result
    }

    /// The declared type of a place, or the type of a value
    pub(super) fn operand_type(&self, operand: &Operand) -> Type {
        match operand {
            Operand::Value(value) => self.builder.graph.ty(*value).clone(),
            Operand::Memory { ty, .. } | Operand::Local { ty, .. } => ty.clone(),
        }
    }

    /// The current value of `operand`
    pub(super) fn read(&mut self, operand: Operand) -> NodeId {
        match operand {
            Operand::Value(value) => value,
            Operand::Memory { base, offset, ty } => self.builder.load_value(base, offset, &ty),
            Operand::Local { name, path, .. } => {
                let value = match self.scope.lookup(name) {
                    Some(Binding::Variable { value, .. }) => *value,
                    _ => return self.builder.error(format!("`{name}` is not a variable")),
                };

                path.into_iter().fold(value, |value, index| {
                    self.builder.make(Projection { value, index })
                })
            }
        }
    }

    fn parse_binary(&mut self, level: usize) -> ParseResult<Operand> {
        if level == LEVELS {
            return self.parse_cast();
        }

        let mut lhs = self.parse_binary(level + 1)?;

        while let Some(token) = self.lexer.peek()? {
            let Some(op) = infix(level, token.kind) else {
                break;
            };

            self.lexer.next()?;
            let lhs_value = self.read(lhs);

            let value = match op {
                Infix::ShortCircuit(op) => {
                    self.parse_short_circuit(op, lhs_value, level + 1, token.span)?
                }
                Infix::Binary(op) => {
                    let rhs = self.parse_binary(level + 1)?;
                    let rhs = self.read(rhs);

                    self.builder.set_span(token.span);
                    self.builder.make(Binary {
                        op,
                        lhs: lhs_value,
                        rhs,
                    })
                }
                Infix::Compare(op) => {
                    let rhs = self.parse_binary(level + 1)?;
                    let rhs = self.read(rhs);

                    self.builder.set_span(token.span);
                    self.builder.make(Compare {
                        op,
                        lhs: lhs_value,
                        rhs,
                    })
                }
            };

            lhs = Operand::Value(value);
        }

        Ok(lhs)
    }

    /// `lhs && rhs` evaluates `rhs` only when `lhs` is true, `lhs || rhs` only
    /// when it is false. Both sides join in a phi.
    fn parse_short_circuit(
        &mut self,
        op: BinaryOp,
        lhs: NodeId,
        rhs_level: usize,
        span: Span,
    ) -> ParseResult<NodeId> {
        if !matches!(self.builder.graph.ty(lhs), Type::Bool(_)) {
            let rhs = self.parse_binary(rhs_level)?;
            let rhs = self.read(rhs);

            self.builder.set_span(span);
            return Ok(self.builder.make(Binary { op, lhs, rhs }));
        }

        let evaluate_when = op == BinaryOp::LogicalAnd;
        let parent = self.scope.clone();
        let before = self.builder.cursor;

        self.builder.set_span(span);
        let evaluate = self.builder.make(Branch {
            condition: lhs,
            control: before.control,
            taken: evaluate_when,
        });
        let skip = self.builder.make(Branch {
            condition: lhs,
            control: before.control,
            taken: !evaluate_when,
        });

        self.builder.cursor = Cursor {
            control: evaluate,
            memory: before.memory,
        };

        let rhs = self.parse_binary(rhs_level)?;
        let rhs = self.read(rhs);

        self.builder.set_span(span);
        let rhs = self.builder.make(Coerce {
            value: rhs,
            target: Type::Bool(Level::Bottom),
        });

        let evaluated = Arm {
            scope: self.scope.clone(),
            cursor: self.builder.cursor,
        };
        let skipped = Arm {
            scope: parent.clone(),
            cursor: Cursor {
                control: skip,
                memory: before.memory,
            },
        };

        let join = merge(&mut self.builder, &parent, evaluated, skipped);
        let short = self.builder.make(Constant(Type::bool(!evaluate_when)));
        let value = join.merge_values(&mut self.builder, &[rhs, short]);

        self.scope = join.scope;
        self.builder.cursor = join.cursor;

        Ok(value)
    }

    // cast = unary ( "as" type )*
    fn parse_cast(&mut self) -> ParseResult<Operand> {
        let mut operand = self.parse_unary()?;

        while let Some(token) = self.eat(TokenKind::Keyword(Keyword::As))? {
            let target = self.parse_type()?;
            let value = self.read(operand);

            self.builder.set_span(token.span);
            operand = Operand::Value(self.builder.make(Cast { value, target }));
        }

        Ok(operand)
    }

    fn parse_unary(&mut self) -> ParseResult<Operand> {
        let token = self.expect_peek("expression")?;

        let op = match token.kind {
            TokenKind::Minus => Some(UnaryOp::Negate),
            TokenKind::Bang => Some(UnaryOp::LogicalNot),
            TokenKind::Tilde => Some(UnaryOp::BitwiseNot),
            TokenKind::Asterisk | TokenKind::BitwiseAnd => None,
            _ => return self.parse_postfix(),
        };

        self.lexer.next()?;
        let operand = self.parse_unary()?;
        self.builder.set_span(token.span);

        Ok(match (op, token.kind) {
            (Some(op), _) => {
                let operand = self.read(operand);
                Operand::Value(self.builder.make(Unary { op, operand }))
            }
            (None, TokenKind::Asterisk) => self.dereference(operand),
            (None, _) => Operand::Value(self.address_of(operand)),
        })
    }

    fn dereference(&mut self, operand: Operand) -> Operand {
        let base = self.read(operand);

        match self.builder.graph.ty(base) {
            Type::Pointer { pointee, level } if pointer::is_untyped_nil(pointee, level) => {
                Operand::Value(self.builder.error("cannot dereference `nil`"))
            }
            Type::Pointer { pointee, .. } => Operand::Memory {
                base,
                offset: 0,
                ty: (**pointee).clone(),
            },
            Type::Error(_) => Operand::Value(base),
            other => {
                let message = format!("cannot dereference a value of type `{}`", other.name());
                Operand::Value(self.builder.error(message))
            }
        }
    }

    /// Address of a place. Temporaries are copied to a fresh slot first.
    fn address_of(&mut self, operand: Operand) -> NodeId {
        match operand {
            Operand::Memory { base, offset, ty } => {
                self.builder.make(AddressOf { base, offset, ty })
            }
            // A copy would detach writes through the pointer from the local
            Operand::Local { name, .. } => self
                .builder
                .error(format!("cannot take the address of `{name}` held as a value")),
            operand => {
                let value = self.read(operand);

                if self.builder.graph.ty(value).is_error() {
                    value
                } else {
                    self.builder.spill(value)
                }
            }
        }
    }

    // postfix = primary ( "." ( IDENTIFIER | INTEGER ) | "[" expression "]" | arguments )*
    fn parse_postfix(&mut self) -> ParseResult<Operand> {
        let mut operand = self.parse_primary()?;

        while let Some(token) = self.lexer.peek()? {
            match token.kind {
                TokenKind::Dot => {
                    self.lexer.next()?;
                    let member = self.expect_next("member name")?;

                    let key = match member.kind {
                        TokenKind::Identifier => MemberKey::Name(self.symbol(member.span)),
                        TokenKind::IntegerLiteral => {
                            match self.text(member.span).replace('_', "").parse() {
                                Ok(index) => MemberKey::Index(index),
                                Err(_) => return Err(self.unexpected(member, "member index")),
                            }
                        }
                        _ => return Err(self.unexpected(member, "member name or index")),
                    };

                    self.builder.set_span(member.span);
                    operand = self.member(operand, key);
                }
                TokenKind::OpenBracket => {
                    self.lexer.next()?;
                    let index = self.nested(Self::parse_expression)?;
                    let close = self.expect_next_to_be(TokenKind::CloseBracket)?;

                    self.builder.set_span(token.span.to(close.span));
                    operand = self.index(operand, index);
                }
                TokenKind::OpenParen => {
                    self.lexer.next()?;
                    let arguments = self.nested(Self::parse_arguments)?;
                    operand = Operand::Value(self.call(operand, arguments, token.span)?);
                }
                _ => break,
            }
        }

        Ok(operand)
    }

    fn member(&mut self, operand: Operand, key: MemberKey) -> Operand {
        let ty = self.operand_type(&operand);

        if ty.is_error() {
            return Operand::Value(self.read(operand));
        }

        // Members are reached through pointers to aggregates
        if let Type::Pointer { pointee, level } = &ty {
            if !pointer::is_untyped_nil(pointee, level) && pointee.is_aggregate() {
                let base = self.read(operand);
                let pointee = (**pointee).clone();

                return self.member(
                    Operand::Memory {
                        base,
                        offset: 0,
                        ty: pointee,
                    },
                    key,
                );
            }
        }

        let index = match key {
            MemberKey::Name(name) => match ty.member_index(name) {
                Some(index) => index,
                None => return self.error_operand(ty.member(name)),
            },
            MemberKey::Index(index) => index,
        };

        self.element(operand, &ty, index)
    }

    fn index(&mut self, operand: Operand, index: NodeId) -> Operand {
        let ty = self.operand_type(&operand);

        if ty.is_error() {
            return Operand::Value(self.read(operand));
        }

        let index_ty = self.builder.graph.ty(index).clone();

        if index_ty.is_error() {
            return Operand::Value(index);
        }

        let element = ty.index(&index_ty);

        match index_ty.as_int().and_then(|i| usize::try_from(i).ok()) {
            Some(i) if !element.is_error() => self.element(operand, &ty, i),
            _ => self.error_operand(element),
        }
    }

    /// Member `index` of an aggregate operand of declared type `ty`
    fn element(&mut self, operand: Operand, ty: &Type, index: usize) -> Operand {
        let member = ty.element(index);

        if member.is_error() {
            return self.error_operand(member);
        }

        match operand {
            Operand::Memory { base, offset, .. } => Operand::Memory {
                base,
                offset: offset + ty.member_offsets()[index],
                ty: member,
            },
            Operand::Local { name, mut path, .. } => {
                path.push(index);
                Operand::Local {
                    name,
                    path,
                    ty: member,
                }
            }
            Operand::Value(value) => Operand::Value(self.builder.make(Projection { value, index })),
        }
    }

    fn error_operand(&mut self, ty: Type) -> Operand {
        let message = match ty {
            Type::Error(message) => message.to_string(),
            other => format!("unexpected `{}`", other.name()),
        };

        Operand::Value(self.builder.error(message))
    }

    // arguments = "(" ( expression ( "," expression )* )? ")"
    fn parse_arguments(&mut self) -> ParseResult<Vec<(NodeId, Span)>> {
        let mut arguments = Vec::new();

        if self.eat(TokenKind::CloseParen)?.is_some() {
            return Ok(arguments);
        }

        loop {
            let start = self.expect_peek("argument")?;
            arguments.push((self.parse_expression()?, start.span));

            if self.eat(TokenKind::Comma)?.is_none() {
                self.expect_next_to_be(TokenKind::CloseParen)?;
                return Ok(arguments);
            }
        }
    }

    fn call(
        &mut self,
        callee: Operand,
        arguments: Vec<(NodeId, Span)>,
        span: Span,
    ) -> ParseResult<NodeId> {
        let callee = self.read(callee);

        let arguments = match self.builder.graph.ty(callee).clone() {
            Type::Function { params, level, .. } => {
                if params.len() != arguments.len() {
                    return Err(CompileError::ArityMismatch {
                        name: level
                            .as_const()
                            .map_or_else(|| "function value".into(), |name| name.to_string()),
                        expected: params.len(),
                        found: arguments.len(),
                        span,
                    });
                }

                params
                    .iter()
                    .zip(arguments)
                    .map(|(param, (argument, span))| {
                        self.builder.set_span(span);
                        self.builder.coerce(argument, param)
                    })
                    .collect()
            }
            _ => arguments.into_iter().map(|(argument, _)| argument).collect(),
        };

        self.builder.set_span(span);
        Ok(self.builder.make(Call { callee, arguments }))
    }

    fn parse_primary(&mut self) -> ParseResult<Operand> {
        let token = self.expect_next("expression")?;
        let text = self.text(token.span);
        self.builder.set_span(token.span);

        let ty = match token.kind {
            TokenKind::IntegerLiteral => match text.replace('_', "").parse::<i128>() {
                Ok(value) => Type::int(value),
                Err(_) => Type::error(format!("integer literal `{text}` is too large")),
            },
            TokenKind::FloatLiteral => match text.replace('_', "").parse::<f64>() {
                Ok(value) => Type::float(value),
                Err(_) => Type::error(format!("invalid float literal `{text}`")),
            },
            TokenKind::StringLiteral => Type::string(&unescape(&text[1..text.len() - 1])),
            TokenKind::RuneLiteral => {
                let value = unescape(&text[1..text.len() - 1]);
                let mut chars = value.chars();

                match (chars.next(), chars.next()) {
                    (Some(c), None) => Type::rune(c),
                    _ => Type::error(format!("rune literal {text} must hold exactly one character")),
                }
            }
            TokenKind::BooleanLiteral => Type::bool(text == "true"),
            TokenKind::Keyword(Keyword::Nil) => pointer::nil(),
            TokenKind::OpenParen => return self.nested(Self::parse_parenthesized),
            TokenKind::OpenBracket => return self.parse_array_literal(token.span),
            TokenKind::Identifier => return self.parse_name(token.span),
            _ => return Err(self.unexpected(token, "expression")),
        };

        Ok(Operand::Value(self.builder.make(Constant(ty))))
    }

    // "(" expression ")" | "(" expression ( "," expression )+ ")"
    fn parse_parenthesized(&mut self) -> ParseResult<Operand> {
        let first = self.parse_operand()?;

        if self.eat(TokenKind::Comma)?.is_none() {
            self.expect_next_to_be(TokenKind::CloseParen)?;
            return Ok(first);
        }

        let mut members = vec![self.read(first)];

        loop {
            members.push(self.parse_expression()?);

            if self.eat(TokenKind::Comma)?.is_none() {
                self.expect_next_to_be(TokenKind::CloseParen)?;
                break;
            }
        }

        let shape = Type::tuple(
            members
                .iter()
                .map(|member| self.builder.graph.ty(*member).concrete().bottom())
                .collect(),
        );

        Ok(Operand::Value(self.builder.make(Build { shape, members })))
    }

    // "[" INTEGER "]" type literal
    fn parse_array_literal(&mut self, open: Span) -> ParseResult<Operand> {
        let length = self.expect_next_to_be(TokenKind::IntegerLiteral)?;
        let Ok(length) = self.text(length.span).replace('_', "").parse::<usize>() else {
            return Err(self.unexpected(length, "array length"));
        };

        self.expect_next_to_be(TokenKind::CloseBracket)?;
        let element = self.parse_type()?;

        let ty = Self::array_type(element, length, open)?;

        self.builder.set_span(open);
        self.parse_composite_literal(ty)
    }

    fn parse_name(&mut self, span: Span) -> ParseResult<Operand> {
        let name = self.symbol(span);

        match self.scope.lookup(name).cloned() {
            Some(Binding::Value(value)) => Ok(Operand::Value(value)),
            Some(Binding::Variable { ty, .. }) => Ok(Operand::Local {
                name,
                path: Vec::new(),
                ty,
            }),
            Some(Binding::Slot { address, ty }) => Ok(Operand::Memory {
                base: address,
                offset: 0,
                ty,
            }),
            Some(Binding::Type(ty)) if self.struct_literals && self.at(TokenKind::OpenBrace)? => {
                self.parse_composite_literal(ty)
            }
            Some(Binding::Type(_)) => Err(CompileError::UnexpectedToken {
                expected: "expression".into(),
                found: format!("type `{name}`"),
                span,
            }),
            None => Err(CompileError::Unresolved {
                name: name.to_string(),
                span,
            }),
        }
    }

    // literal = "{" ( ( IDENTIFIER ":" )? expression ( "," ... )* ","? )? "}"
    fn parse_composite_literal(&mut self, ty: Type) -> ParseResult<Operand> {
        let literal_span = self.builder.span();
        self.expect_next_to_be(TokenKind::OpenBrace)?;

        let member_types = ty.member_types();
        let mut members: Vec<Option<NodeId>> = vec![None; member_types.len()];
        let mut position = 0;
        let mut overflow = false;

        loop {
            if self.eat(TokenKind::CloseBrace)?.is_some() {
                break;
            }

            let start = self.expect_peek("literal member")?;
            let named = matches!(ty, Type::Struct { .. })
                && start.kind == TokenKind::Identifier
                && self
                    .lexer
                    .peek_nth(1)?
                    .is_some_and(|token| token.kind == TokenKind::Colon);

            let index = if named {
                let (field, _) = self.parse_identifier()?;
                self.expect_next_to_be(TokenKind::Colon)?;
                ty.member_index(field).ok_or(field)
            } else {
                Ok(position)
            };

            let value = self.nested(Self::parse_expression)?;
            self.builder.set_span(start.span);

            match index {
                Ok(index) if index < member_types.len() => {
                    members[index] = Some(self.builder.coerce(value, &member_types[index]));
                    position = index + 1;
                }
                Ok(_) => overflow = true,
                Err(field) => {
                    self.error_operand(ty.member(field));
                }
            }

            if self.eat(TokenKind::Comma)?.is_none() {
                self.expect_next_to_be(TokenKind::CloseBrace)?;
                break;
            }
        }

        self.builder.set_span(literal_span);

        if overflow {
            let message = format!("too many values in `{}` literal", ty.name());
            return Ok(Operand::Value(self.builder.error(message)));
        }

        let members = members
            .into_iter()
            .zip(&member_types)
            .map(|(member, member_ty)| match member {
                Some(member) => member,
                None => self.builder.make(Constant(member_ty.zero())),
            })
            .collect();

        Ok(Operand::Value(self.builder.make(Build { shape: ty, members })))
    }
}
