use itertools::Itertools;

use crate::{
    error::CompileError,
    frontend::{
        lexer::{Keyword, TokenKind},
        parser::{Deferred, LoopContext, ParseResult, Parser, expression::Operand},
    },
    middle::{
        graph::{NodeId, op::BinaryOp},
        lattice::Type,
        nodegen::{Binary, Branch, Build, Constant, Cursor, LoopHeader, Projection},
        scope::{Arm, Binding, LoopPhis, merge, merge_many},
    },
};

fn compound_operator(kind: TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::PlusEquals => BinaryOp::Add,
        TokenKind::MinusEquals => BinaryOp::Subtract,
        TokenKind::MultiplyEquals => BinaryOp::Multiply,
        TokenKind::DivideEquals => BinaryOp::Divide,
        TokenKind::ModulusEquals => BinaryOp::Modulus,
        TokenKind::BitwiseAndEquals => BinaryOp::BitwiseAnd,
        TokenKind::BitwiseOrEquals => BinaryOp::BitwiseOr,
        TokenKind::BitwiseXorEquals => BinaryOp::BitwiseXor,
        TokenKind::ShiftLeftEquals => BinaryOp::ShiftLeft,
        TokenKind::ShiftRightEquals => BinaryOp::ShiftRight,
        _ => return None,
    })
}

impl<'source> Parser<'source> {
    // block = "{" statement* "}"
    pub(super) fn parse_block(&mut self) -> ParseResult<()> {
        self.expect_next_to_be(TokenKind::OpenBrace)?;
        self.scope.push();
        self.defers.push(Vec::new());

        while self.expect_peek("`}`")?.kind != TokenKind::CloseBrace {
            self.parse_statement()?;
        }

        self.run_defers(self.defers.len() - 1)?;
        self.defers.pop();
        self.scope.pop();

        self.expect_next_to_be(TokenKind::CloseBrace)?;
        Ok(())
    }

    fn parse_statement(&mut self) -> ParseResult<()> {
        let token = self.expect_peek("statement")?;
        self.builder.set_span(token.span);

        match token.kind {
            TokenKind::Keyword(Keyword::Var) => self.parse_variable_declaration(),
            TokenKind::Keyword(Keyword::Const) => self.parse_local_constant(),
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Break | Keyword::Continue) => self.parse_jump(),
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            TokenKind::Keyword(Keyword::Defer) => self.parse_defer(),
            TokenKind::OpenBrace => self.parse_block(),
            TokenKind::Semicolon => {
                self.lexer.next()?;
                Ok(())
            }
            _ => {
                self.parse_simple_statement()?;
                self.expect_next_to_be(TokenKind::Semicolon)?;
                Ok(())
            }
        }
    }

    // "var" IDENTIFIER type? ( "=" expression )? ";"
    fn parse_variable_declaration(&mut self) -> ParseResult<()> {
        self.expect_keyword(Keyword::Var)?;
        let (name, span) = self.parse_identifier()?;

        let declared = if self.at(TokenKind::Equals)? || self.at(TokenKind::Semicolon)? {
            None
        } else {
            Some(self.parse_type()?)
        };

        let initializer = match self.eat(TokenKind::Equals)? {
            Some(_) => Some(self.parse_expression()?),
            None => None,
        };

        let end = self.expect_next_to_be(TokenKind::Semicolon)?;
        self.builder.set_span(span);

        let (ty, value) = match (declared, initializer) {
            (Some(ty), Some(value)) => {
                let value = self.builder.coerce(value, &ty);
                (ty, value)
            }
            (Some(ty), None) => {
                let value = self.builder.make(Constant(ty.zero()));
                (ty, value)
            }
            (None, Some(value)) => match self.builder.graph.ty(value).concrete().bottom() {
                Type::Void => {
                    let error = self.builder.error(format!("`{name}` cannot hold a `void` value"));
                    (Type::Void, error)
                }
                ty => {
                    let value = self.builder.coerce(value, &ty);
                    (ty, value)
                }
            },
            (None, None) => {
                return Err(CompileError::UnexpectedToken {
                    expected: "type or initializer".into(),
                    found: ";".into(),
                    span: end.span,
                });
            }
        };

        self.bind_local(name, span, ty, value)
    }

    /// `type? "=" expression ";"`, the rest of a `const` declaration
    pub(super) fn parse_constant_initializer(&mut self) -> ParseResult<NodeId> {
        let declared = if self.at(TokenKind::Equals)? {
            None
        } else {
            Some(self.parse_type()?)
        };

        self.expect_next_to_be(TokenKind::Equals)?;
        let value = self.parse_expression()?;
        self.expect_next_to_be(TokenKind::Semicolon)?;

        Ok(match declared {
            Some(ty) => self.builder.coerce(value, &ty),
            None => value,
        })
    }

    fn parse_local_constant(&mut self) -> ParseResult<()> {
        self.expect_keyword(Keyword::Const)?;
        let (name, span) = self.parse_identifier()?;
        let value = self.parse_constant_initializer()?;

        if self.scope.declare(name, Binding::Value(value)) {
            Ok(())
        } else {
            Err(CompileError::Redeclaration {
                name: name.to_string(),
                span,
            })
        }
    }

    // expression ( assignment-operator expression )?
    fn parse_simple_statement(&mut self) -> ParseResult<()> {
        let target = self.parse_operand()?;

        let Some(token) = self.lexer.peek()? else {
            return Ok(());
        };

        if !token.kind.is_assignment_operator() {
            return Ok(());
        }

        self.lexer.next()?;
        let rhs = self.parse_expression()?;
        self.builder.set_span(token.span);

        let value = match compound_operator(token.kind) {
            Some(op) => {
                let current = self.read(target.clone());
                self.builder.make(Binary {
                    op,
                    lhs: current,
                    rhs,
                })
            }
            None => rhs,
        };

        self.assign(target, value);
        Ok(())
    }

    fn assign(&mut self, target: Operand, value: NodeId) {
        match target {
            Operand::Value(target) => {
                let graph = &self.builder.graph;

                if !graph.ty(target).is_error() && !graph.ty(value).is_error() {
                    self.builder.error("cannot assign to this expression");
                }
            }
            Operand::Memory { base, offset, ty } => {
                let value = self.builder.coerce(value, &ty);
                self.builder.store_value(base, offset, &ty, value);
            }
            Operand::Local { name, path, ty } => {
                let value = self.builder.coerce(value, &ty);

                let Some(Binding::Variable {
                    value: current,
                    ty: declared,
                }) = self.scope.lookup(name).cloned()
                else {
                    return;
                };

                let updated = self.replace_member(current, &declared, &path, value);
                self.scope.rebind(name, Binding::Variable {
                    value: updated,
                    ty: declared,
                });
            }
        }
    }

    /// `aggregate` with the member at `path` replaced by `value`
    fn replace_member(&mut self, aggregate: NodeId, ty: &Type, path: &[usize], value: NodeId) -> NodeId {
        let Some((&index, rest)) = path.split_first() else {
            return value;
        };

        let members = ty
            .member_types()
            .iter()
            .enumerate()
            .map(|(position, member_ty)| {
                let member = self.builder.make(Projection {
                    value: aggregate,
                    index: position,
                });

                if position == index {
                    self.replace_member(member, member_ty, rest, value)
                } else {
                    member
                }
            })
            .collect();

        self.builder.make(Build {
            shape: ty.clone(),
            members,
        })
    }

    // "if" expression block ( "else" ( if | block ) )?
    fn parse_if(&mut self) -> ParseResult<()> {
        let keyword = self.expect_keyword(Keyword::If)?;
        let condition = self.parse_condition()?;

        let parent = self.scope.clone();
        let before = self.builder.cursor;

        self.builder.set_span(keyword.span);
        let taken = self.builder.make(Branch {
            condition,
            control: before.control,
            taken: true,
        });
        let untaken = self.builder.make(Branch {
            condition,
            control: before.control,
            taken: false,
        });

        self.builder.cursor = Cursor {
            control: taken,
            memory: before.memory,
        };
        self.parse_block()?;

        let then_arm = Arm {
            scope: std::mem::replace(&mut self.scope, parent.clone()),
            cursor: self.builder.cursor,
        };

        self.builder.cursor = Cursor {
            control: untaken,
            memory: before.memory,
        };

        if self.eat(TokenKind::Keyword(Keyword::Else))?.is_some() {
            if self.at(TokenKind::Keyword(Keyword::If))? {
                self.parse_if()?;
            } else {
                self.parse_block()?;
            }
        }

        let else_arm = Arm {
            scope: self.scope.clone(),
            cursor: self.builder.cursor,
        };

        let join = merge(&mut self.builder, &parent, then_arm, else_arm);
        self.scope = join.scope;
        self.builder.cursor = join.cursor;

        Ok(())
    }

    // "for" expression? block
    fn parse_for(&mut self) -> ParseResult<()> {
        let keyword = self.expect_keyword(Keyword::For)?;
        self.builder.set_span(keyword.span);

        let entry = self.builder.cursor.control;
        let header = self.builder.make(LoopHeader { entry });
        let phis = LoopPhis::open(&mut self.builder, &mut self.scope, header);

        let mut exits = Vec::new();

        if !self.at(TokenKind::OpenBrace)? {
            let condition = self.parse_condition()?;
            let control = self.builder.cursor.control;

            self.builder.set_span(keyword.span);
            let taken = self.builder.make(Branch {
                condition,
                control,
                taken: true,
            });
            let untaken = self.builder.make(Branch {
                condition,
                control,
                taken: false,
            });

            exits.push(Arm {
                scope: self.scope.clone(),
                cursor: Cursor {
                    control: untaken,
                    memory: self.builder.cursor.memory,
                },
            });
            self.builder.cursor.control = taken;
        }

        let mut parent = self.scope.clone();

        self.loops.push(LoopContext {
            defer_depth: self.defers.len(),
            breaks: Vec::new(),
            continues: Vec::new(),
        });
        let body = self.parse_block();
        let context = self.loops.pop();
        body?;

        let Some(context) = context else {
            return Ok(());
        };

        let escapes = exits
            .iter()
            .chain(&context.breaks)
            .any(|exit| !self.builder.graph.is_dead_control(exit.cursor.control));

        if !escapes {
            phis.keep_alive(&mut self.builder);
        }

        let mut back_edges = context.continues;
        back_edges.push(Arm {
            scope: self.scope.clone(),
            cursor: self.builder.cursor,
        });

        let replaced = phis.close(&mut self.builder, &back_edges);
        exits.extend(context.breaks);

        // Exits saw the phis before they were known to be redundant
        for (old, new) in replaced {
            parent.substitute(old, new);

            for exit in &mut exits {
                exit.scope.substitute(old, new);

                if exit.cursor.memory == old {
                    exit.cursor.memory = new;
                }
            }
        }

        let join = merge_many(&mut self.builder, &parent, exits);
        self.scope = join.scope;
        self.builder.cursor = join.cursor;

        Ok(())
    }

    // ( "break" | "continue" ) ";"
    fn parse_jump(&mut self) -> ParseResult<()> {
        let token = self.expect_next("statement")?;
        let keyword = match token.kind {
            TokenKind::Keyword(Keyword::Break) => "break",
            _ => "continue",
        };

        self.expect_next_to_be(TokenKind::Semicolon)?;

        let defer_depth = match self.loops.last() {
            Some(context) if !self.deferring => context.defer_depth,
            _ => {
                return Err(CompileError::MisplacedJump {
                    keyword,
                    span: token.span,
                });
            }
        };

        self.run_defers(defer_depth)?;

        let arm = Arm {
            scope: self.scope.clone(),
            cursor: self.builder.cursor,
        };

        if let Some(context) = self.loops.last_mut() {
            match keyword {
                "break" => context.breaks.push(arm),
                _ => context.continues.push(arm),
            }
        }

        self.builder.kill();
        Ok(())
    }

    // "return" expression? ";"
    fn parse_return(&mut self) -> ParseResult<()> {
        let keyword = self.expect_keyword(Keyword::Return)?;

        let ret = match &self.function {
            Some(function) if !self.deferring => function.ret.clone(),
            _ => {
                return Err(CompileError::MisplacedJump {
                    keyword: "return",
                    span: keyword.span,
                });
            }
        };

        let value = if self.at(TokenKind::Semicolon)? {
            None
        } else {
            Some(self.parse_expression()?)
        };

        self.expect_next_to_be(TokenKind::Semicolon)?;
        self.builder.set_span(keyword.span);

        let value = match (value, ret == Type::Void) {
            (None, true) => None,
            (Some(value), true) => {
                if !self.builder.graph.ty(value).is_error() {
                    self.builder.error("cannot return a value from a `void` function");
                }

                None
            }
            (None, false) => {
                let message = format!("missing return value of type `{}`", ret.name());
                Some(self.builder.error(message))
            }
            (Some(value), false) => Some(self.builder.coerce(value, &ret)),
        };

        self.run_defers(0)?;

        if !self.builder.is_dead() {
            if let Some(function) = &mut self.function {
                function.returns.push((value, self.builder.cursor));
            }
        }

        self.builder.kill();
        Ok(())
    }

    // "defer" ( block | simple ";" )
    fn parse_defer(&mut self) -> ParseResult<()> {
        self.expect_keyword(Keyword::Defer)?;

        let checkpoint = self.lexer.clone();

        if self.at(TokenKind::OpenBrace)? {
            self.skip_group()?;
        } else {
            self.skip_statement()?;
        }

        let deferred = Deferred {
            lexer: checkpoint,
            scope: self.scope.clone(),
        };

        if let Some(block) = self.defers.last_mut() {
            block.push(deferred);
        }

        Ok(())
    }

    /// Emits the deferred statements of every block from `depth` inwards,
    /// innermost block first and latest statement first
    pub(super) fn run_defers(&mut self, depth: usize) -> ParseResult<()> {
        let pending = self
            .defers
            .get(depth..)
            .unwrap_or_default()
            .iter()
            .rev()
            .flat_map(|block| block.iter().rev())
            .cloned()
            .collect_vec();

        for deferred in pending {
            self.emit_deferred(deferred)?;
        }

        Ok(())
    }

    /// Re-parses a deferred statement at the cursor. It sees the names that
    /// were visible at the `defer`, with their current values.
    fn emit_deferred(&mut self, deferred: Deferred<'source>) -> ParseResult<()> {
        if self.builder.is_dead() {
            return Ok(());
        }

        let restricted = self.scope.restrict_to(&deferred.scope);
        let scope = std::mem::replace(&mut self.scope, restricted);
        let lexer = std::mem::replace(&mut self.lexer, deferred.lexer);
        let loops = std::mem::take(&mut self.loops);
        let defers = std::mem::take(&mut self.defers);
        let deferring = std::mem::replace(&mut self.deferring, true);

        let result = self.parse_statement();

        let emitted = std::mem::replace(&mut self.scope, scope);
        self.scope.write_back(&emitted);
        self.lexer = lexer;
        self.loops = loops;
        self.defers = defers;
        self.deferring = deferring;

        result
    }
}
