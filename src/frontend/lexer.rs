use std::{
    collections::{BTreeMap, VecDeque},
    str::Chars,
};

use itertools::{PeekNth, peek_nth};
use once_cell::sync::Lazy;
use strum::{EnumString, IntoStaticStr};

use crate::{error::CompileError, frontend::SourceFile};

/// Pull-based tokenizer. Cloning a lexer checkpoints it: the clone resumes from
/// the same position independently.
#[derive(Debug, Clone)]
pub struct Lexer<'source> {
    source: &'source SourceFile,
    position: usize,
    chars: PeekNth<Chars<'source>>,
    peek_buffer: VecDeque<Token>,
    last_kind: Option<TokenKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /* Words */
    Keyword(Keyword), // func
    Identifier,       // main

    /* Literals */
    BooleanLiteral, // true
    RuneLiteral,    // 'A'
    IntegerLiteral, // 1
    FloatLiteral,   // 1.0
    StringLiteral,  // "hello, world"

    /* Delimiters */
    OpenParen,    // (
    CloseParen,   // )
    OpenBracket,  // [
    CloseBracket, // ]
    OpenBrace,    // {
    CloseBrace,   // }
    Semicolon,    // ;
    Comma,        // ,

    /* Other */
    Colon, // :
    Dot,   // .

    /* Unary Ops */
    Bang,  // !
    Tilde, // ~

    /* Unary + Binary Ops */
    Asterisk,   // *
    Minus,      // -
    BitwiseAnd, // &

    /* Binary Ops */
    Plus,                 // +
    Divide,               // /
    Modulus,              // %
    LogicalAnd,           // &&
    LogicalOr,            // ||
    BitwiseXor,           // ^
    BitwiseOr,            // |
    ShiftLeft,            // <<
    ShiftRight,           // >>
    DoubleEquals,         // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=

    /* Assignment */
    Equals,           // =
    PlusEquals,       // +=
    MinusEquals,      // -=
    MultiplyEquals,   // *=
    DivideEquals,     // /=
    ModulusEquals,    // %=
    BitwiseXorEquals, // ^=
    BitwiseAndEquals, // &=
    BitwiseOrEquals,  // |=
    ShiftLeftEquals,  // <<=
    ShiftRightEquals, // >>=
}

impl TokenKind {
    pub fn is_assignment_operator(&self) -> bool {
        matches!(
            self,
            Self::Equals
                | Self::PlusEquals
                | Self::MinusEquals
                | Self::MultiplyEquals
                | Self::DivideEquals
                | Self::ModulusEquals
                | Self::BitwiseXorEquals
                | Self::BitwiseAndEquals
                | Self::BitwiseOrEquals
                | Self::ShiftLeftEquals
                | Self::ShiftRightEquals
        )
    }

    pub fn is_comparison_operator(&self) -> bool {
        matches!(
            self,
            Self::NotEquals
                | Self::DoubleEquals
                | Self::LessThan
                | Self::LessThanOrEqualTo
                | Self::GreaterThan
                | Self::GreaterThanOrEqualTo
        )
    }

    pub fn is_bit_shift_operator(&self) -> bool {
        matches!(self, Self::ShiftLeft | Self::ShiftRight)
    }

    pub fn is_term_operator(&self) -> bool {
        matches!(self, Self::Plus | Self::Minus)
    }

    pub fn is_factor_operator(&self) -> bool {
        matches!(self, Self::Asterisk | Self::Divide | Self::Modulus)
    }

    pub fn is_unary_operator(&self) -> bool {
        matches!(
            self,
            Self::Asterisk | Self::Bang | Self::Tilde | Self::Minus | Self::BitwiseAnd
        )
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Keyword(keyword) => (*keyword).into(),
            Self::Identifier => "identifier",
            Self::BooleanLiteral => "boolean literal",
            Self::RuneLiteral => "rune literal",
            Self::IntegerLiteral => "integer literal",
            Self::FloatLiteral => "float literal",
            Self::StringLiteral => "string literal",
            Self::OpenParen => "(",
            Self::CloseParen => ")",
            Self::OpenBracket => "[",
            Self::CloseBracket => "]",
            Self::OpenBrace => "{",
            Self::CloseBrace => "}",
            Self::Semicolon => ";",
            Self::Comma => ",",
            Self::Colon => ":",
            Self::Dot => ".",
            Self::Bang => "!",
            Self::Tilde => "~",
            Self::Asterisk => "*",
            Self::Minus => "-",
            Self::BitwiseAnd => "&",
            Self::Plus => "+",
            Self::Divide => "/",
            Self::Modulus => "%",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
            Self::BitwiseXor => "^",
            Self::BitwiseOr => "|",
            Self::ShiftLeft => "<<",
            Self::ShiftRight => ">>",
            Self::DoubleEquals => "==",
            Self::NotEquals => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqualTo => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqualTo => ">=",
            Self::Equals => "=",
            Self::PlusEquals => "+=",
            Self::MinusEquals => "-=",
            Self::MultiplyEquals => "*=",
            Self::DivideEquals => "/=",
            Self::ModulusEquals => "%=",
            Self::BitwiseXorEquals => "^=",
            Self::BitwiseAndEquals => "&=",
            Self::BitwiseOrEquals => "|=",
            Self::ShiftLeftEquals => "<<=",
            Self::ShiftRightEquals => ">>=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Keyword {
    Func,
    Var,
    Const,
    Type,
    Struct,
    If,
    Else,
    For,
    Break,
    Continue,
    Return,
    Defer,
    As,
    Nil,
}

/// Table of single char tokens (matched after longer sequences are checked for)
static SINGLE_TOKENS: Lazy<BTreeMap<char, TokenKind>> = Lazy::new(|| {
    BTreeMap::from([
        ('(', TokenKind::OpenParen),
        (')', TokenKind::CloseParen),
        ('[', TokenKind::OpenBracket),
        (']', TokenKind::CloseBracket),
        ('{', TokenKind::OpenBrace),
        ('}', TokenKind::CloseBrace),
        (';', TokenKind::Semicolon),
        (',', TokenKind::Comma),
        ('!', TokenKind::Bang),
        ('~', TokenKind::Tilde),
        (':', TokenKind::Colon),
        ('.', TokenKind::Dot),
        ('*', TokenKind::Asterisk),
        ('-', TokenKind::Minus),
        ('=', TokenKind::Equals),
        ('+', TokenKind::Plus),
        ('/', TokenKind::Divide),
        ('%', TokenKind::Modulus),
        ('^', TokenKind::BitwiseXor),
        ('&', TokenKind::BitwiseAnd),
        ('|', TokenKind::BitwiseOr),
        ('<', TokenKind::LessThan),
        ('>', TokenKind::GreaterThan),
    ])
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both `self` and `other`
    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// Resolves backslash escapes in the body of a string or rune literal
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }

    out
}

type LexResult<T> = Result<T, CompileError>;

impl<'source> Lexer<'source> {
    pub fn new(source: &'source SourceFile) -> Self {
        Self {
            source,
            chars: peek_nth(source.contents.chars()),
            position: 0,
            peek_buffer: VecDeque::new(),
            last_kind: None,
        }
    }

    pub fn source(&self) -> &'source SourceFile {
        self.source
    }

    /// Byte offset of the next unread character
    pub fn position(&self) -> usize {
        self.peek_buffer
            .front()
            .map_or(self.position, |token| token.span.start)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.position += c.len_utf8();
        Some(c)
    }

    fn next_is(&mut self, offset: usize, expected: char) -> bool {
        self.chars.peek_nth(offset).is_some_and(|c| *c == expected)
    }

    fn ignore_whitespace(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if !c.is_whitespace() {
                break;
            }

            self.bump();
        }
    }

    fn ignore_line(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                break;
            }

            self.bump();
        }
    }

    fn read_wrapped_escapable(&mut self, wrapper: char, kind: TokenKind) -> LexResult<Token> {
        let start_position = self.position;
        let what = if kind == TokenKind::RuneLiteral { "rune" } else { "string" };

        // Consume first wrapper
        self.bump();

        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                break;
            }

            self.bump();

            // Skip whatever follows a backslash
            if c == '\\' && self.chars.peek().is_some_and(|c| *c != '\n') {
                self.bump();
                continue;
            }

            if c == wrapper {
                return Ok(Token {
                    span: self.new_span(start_position),
                    kind,
                });
            }
        }

        Err(CompileError::UnterminatedLiteral {
            what,
            span: self.new_span(start_position),
        })
    }

    // Keyword, identifier, or boolean literal
    fn read_word(&mut self) -> Token {
        let start_position = self.position;

        while let Some(c) = self.chars.peek().copied() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }

            self.bump();
        }

        let span = self.new_span(start_position);
        let value = self.source.value_of_span(span);

        let kind = if let Ok(keyword) = value.parse() {
            TokenKind::Keyword(keyword)
        } else {
            match value {
                "true" | "false" => TokenKind::BooleanLiteral,
                _ => TokenKind::Identifier,
            }
        };

        Token { kind, span }
    }

    fn read_number(&mut self) -> Token {
        let start_position = self.position;
        let mut kind = TokenKind::IntegerLiteral;

        // `t.0.1` is two tuple accesses, not `t` followed by the float `.0.1`
        let allow_fraction = self.last_kind != Some(TokenKind::Dot);

        while let Some(c) = self.chars.peek().copied() {
            if c == '.'
                && allow_fraction
                && kind == TokenKind::IntegerLiteral
                && self.chars.peek_nth(1).is_some_and(|c| c.is_ascii_digit())
            {
                kind = TokenKind::FloatLiteral;
                self.bump();
                continue;
            }

            if !(c.is_ascii_digit() || c == '_') {
                break;
            }

            self.bump();
        }

        Token {
            kind,
            span: self.new_span(start_position),
        }
    }

    fn read_fixed(&mut self, length: usize, kind: TokenKind) -> Token {
        let start_position = self.position;

        for _ in 0..length {
            self.bump();
        }

        Token {
            kind,
            span: self.new_span(start_position),
        }
    }

    fn new_span(&self, start: usize) -> Span {
        Span {
            start,
            end: self.position,
        }
    }

    pub fn peek(&mut self) -> LexResult<Option<Token>> {
        if let Some(token) = self.peek_buffer.front() {
            return Ok(Some(*token));
        }

        if let Some(token) = self.lex_token()? {
            self.peek_buffer.push_back(token);
        }

        Ok(self.peek_buffer.front().copied())
    }

    /// Looks `n` tokens ahead without consuming anything. `peek_nth(0)` is `peek()`.
    pub fn peek_nth(&mut self, n: usize) -> LexResult<Option<Token>> {
        while self.peek_buffer.len() <= n {
            match self.lex_token()? {
                Some(token) => self.peek_buffer.push_back(token),
                None => return Ok(None),
            }
        }

        Ok(self.peek_buffer.get(n).copied())
    }

    pub fn next(&mut self) -> LexResult<Option<Token>> {
        if let Some(token) = self.peek_buffer.pop_front() {
            return Ok(Some(token));
        }

        self.lex_token()
    }

    fn lex_token(&mut self) -> LexResult<Option<Token>> {
        let token = self.lex_raw()?;

        if let Some(token) = token {
            self.last_kind = Some(token.kind);
        }

        Ok(token)
    }

    fn lex_raw(&mut self) -> LexResult<Option<Token>> {
        while let Some(c) = self.chars.peek().copied() {
            let token = match c {
                // Ignore whitespace
                c if c.is_whitespace() => {
                    self.ignore_whitespace();
                    continue;
                }
                // Ignore comments
                '/' if self.next_is(1, '/') => {
                    self.ignore_line();
                    continue;
                }

                c if !c.is_ascii() => {
                    return Err(CompileError::UnexpectedCharacter {
                        character: c,
                        span: Span::new(self.position, self.position + c.len_utf8()),
                    });
                }

                // String literals
                '"' => self.read_wrapped_escapable('"', TokenKind::StringLiteral)?,
                // Rune literals
                '\'' => self.read_wrapped_escapable('\'', TokenKind::RuneLiteral)?,

                // Integer and float literals
                n if n.is_ascii_digit() => self.read_number(),

                // Identifiers, keywords, and boolean literals
                a if a.is_ascii_alphabetic() || a == '_' => self.read_word(),

                // Shift left equals (<<=)
                '<' if self.next_is(1, '<') && self.next_is(2, '=') => {
                    self.read_fixed(3, TokenKind::ShiftLeftEquals)
                }
                // Shift right equals (>>=)
                '>' if self.next_is(1, '>') && self.next_is(2, '=') => {
                    self.read_fixed(3, TokenKind::ShiftRightEquals)
                }

                '=' if self.next_is(1, '=') => self.read_fixed(2, TokenKind::DoubleEquals),
                '!' if self.next_is(1, '=') => self.read_fixed(2, TokenKind::NotEquals),
                '<' if self.next_is(1, '=') => self.read_fixed(2, TokenKind::LessThanOrEqualTo),
                '>' if self.next_is(1, '=') => {
                    self.read_fixed(2, TokenKind::GreaterThanOrEqualTo)
                }
                '<' if self.next_is(1, '<') => self.read_fixed(2, TokenKind::ShiftLeft),
                '>' if self.next_is(1, '>') => self.read_fixed(2, TokenKind::ShiftRight),
                '&' if self.next_is(1, '&') => self.read_fixed(2, TokenKind::LogicalAnd),
                '|' if self.next_is(1, '|') => self.read_fixed(2, TokenKind::LogicalOr),

                '+' if self.next_is(1, '=') => self.read_fixed(2, TokenKind::PlusEquals),
                '-' if self.next_is(1, '=') => self.read_fixed(2, TokenKind::MinusEquals),
                '*' if self.next_is(1, '=') => self.read_fixed(2, TokenKind::MultiplyEquals),
                '/' if self.next_is(1, '=') => self.read_fixed(2, TokenKind::DivideEquals),
                '%' if self.next_is(1, '=') => self.read_fixed(2, TokenKind::ModulusEquals),
                '&' if self.next_is(1, '=') => self.read_fixed(2, TokenKind::BitwiseAndEquals),
                '|' if self.next_is(1, '=') => self.read_fixed(2, TokenKind::BitwiseOrEquals),
                '^' if self.next_is(1, '=') => self.read_fixed(2, TokenKind::BitwiseXorEquals),

                s => match SINGLE_TOKENS.get(&s) {
                    Some(kind) => self.read_fixed(1, *kind),
                    None => {
                        return Err(CompileError::UnexpectedCharacter {
                            character: s,
                            span: Span::new(self.position, self.position + 1),
                        });
                    }
                },
            };

            return Ok(Some(token));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let source = SourceFile::from_memory(source);
        let mut lexer = Lexer::new(&source);
        let mut kinds = Vec::new();

        while let Some(token) = lexer.next().unwrap() {
            kinds.push(token.kind);
        }

        kinds
    }

    #[test]
    fn lexes_declaration() {
        assert_eq!(
            kinds("var x int = 1; // trailing"),
            vec![
                TokenKind::Keyword(Keyword::Var),
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Equals,
                TokenKind::IntegerLiteral,
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn longest_operator_wins() {
        assert_eq!(
            kinds("a <<= b && c >= d"),
            vec![
                TokenKind::Identifier,
                TokenKind::ShiftLeftEquals,
                TokenKind::Identifier,
                TokenKind::LogicalAnd,
                TokenKind::Identifier,
                TokenKind::GreaterThanOrEqualTo,
                TokenKind::Identifier,
            ]
        );
    }

    #[test]
    fn tuple_access_is_not_a_float() {
        assert_eq!(
            kinds("t.0.1 1.5"),
            vec![
                TokenKind::Identifier,
                TokenKind::Dot,
                TokenKind::IntegerLiteral,
                TokenKind::Dot,
                TokenKind::IntegerLiteral,
                TokenKind::FloatLiteral,
            ]
        );
    }

    #[test]
    fn clone_is_an_independent_checkpoint() {
        let source = SourceFile::from_memory("a b c");
        let mut lexer = Lexer::new(&source);

        lexer.next().unwrap();
        let mut checkpoint = lexer.clone();

        lexer.next().unwrap();
        lexer.next().unwrap();
        assert!(lexer.next().unwrap().is_none());

        let token = checkpoint.next().unwrap().unwrap();
        assert_eq!(source.value_of_span(token.span), "b");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let source = SourceFile::from_memory("\"abc\n");
        let mut lexer = Lexer::new(&source);

        assert!(matches!(
            lexer.next(),
            Err(CompileError::UnterminatedLiteral { what: "string", .. })
        ));
    }

    #[test]
    fn unescape_handles_common_escapes() {
        assert_eq!(unescape(r#"a\n\"b\\"#), "a\n\"b\\");
    }
}
