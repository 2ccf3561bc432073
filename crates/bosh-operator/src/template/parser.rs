//! Tokenizer and parser for the Ruby subset embedded in job templates.

use snafu::{ResultExt, Snafu};

use crate::template::segment::{self, Segment};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("failed to split template into tags"))]
    SplitSegments { source: segment::Error },

    #[snafu(display("unexpected character {character:?} on line {line}"))]
    UnexpectedCharacter { character: char, line: usize },

    #[snafu(display("unterminated string on line {line}"))]
    UnterminatedString { line: usize },

    #[snafu(display("unexpected {found} on line {line}, expected {expected}"))]
    UnexpectedToken {
        found: String,
        expected: &'static str,
        line: usize,
    },

    #[snafu(display("unsupported statement {statement:?} on line {line}"))]
    UnsupportedStatement { statement: String, line: usize },

    #[snafu(display("{keyword:?} on line {line} without an open block"))]
    UnbalancedKeyword { keyword: &'static str, line: usize },

    #[snafu(display("block opened on line {line} is never closed"))]
    UnclosedBlock { line: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Text(String),
    Output {
        expr: Expr,
        line: usize,
    },
    Assign {
        name: String,
        value: Expr,
        line: usize,
    },
    If {
        branches: Vec<Branch>,
        otherwise: Vec<Node>,
    },

    /// A method or function call taking a `do |params| ... end` block.
    Block {
        call: Expr,
        params: Vec<String>,
        body: Vec<Node>,
        line: usize,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Branch {
    pub condition: Expr,
    pub body: Vec<Node>,
    pub line: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),

    /// A double quoted string containing `#{...}`.
    Interpolated(Vec<Expr>),
    Array(Vec<Expr>),
    Var(String),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Method {
        receiver: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Index {
        receiver: Box<Expr>,
        index: Box<Expr>,
    },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    And,
    Or,
    Add,
    Sub,
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Interpolated(Vec<StrPart>),
    Int(i64),
    Float(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Pipe,
    Assign,
    Eq,
    Ne,
    And,
    Or,
    Not,
    Plus,
    Minus,

    /// A newline or `;` separating statements.
    Separator,
}

#[derive(Clone, Debug, PartialEq)]
enum StrPart {
    Literal(String),
    Code(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("identifier {name:?}"),
            Self::Str(_) | Self::Interpolated(_) => "string".to_owned(),
            Self::Int(value) => format!("integer {value}"),
            Self::Float(value) => format!("float {value}"),
            other => format!("{other:?}"),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Self::Ident(name) if name == keyword)
    }
}

/// One statement of a code segment, before blocks are nested.
#[derive(Debug)]
enum Statement {
    Text(String),
    Output(Expr),
    Assign(String, Expr),
    If(Expr),
    Elsif(Expr),
    Else,
    End,
    Block(Expr, Vec<String>),
}

/// Parses a whole template into its node tree.
pub fn parse(template: &str) -> Result<Vec<Node>> {
    let mut statements = Vec::new();

    for segment in segment::split(template).context(SplitSegmentsSnafu)? {
        match segment {
            Segment::Text(text) => statements.push((Statement::Text(text), 0)),
            Segment::Output { code, line } => {
                let tokens: Vec<_> = tokenize(&code, line)?
                    .into_iter()
                    .filter(|token| *token != Token::Separator)
                    .collect();
                statements.push((Statement::Output(parse_expr(&tokens, line)?), line));
            }
            Segment::Code { code, line } => {
                for tokens in split_statements(tokenize(&code, line)?) {
                    statements.push((parse_statement(&tokens, line)?, line));
                }
            }
        }
    }

    let mut builder = TreeBuilder {
        statements: statements.into_iter(),
    };
    match builder.body()? {
        (nodes, None) => Ok(nodes),
        (_, Some((terminator, line))) => UnbalancedKeywordSnafu {
            keyword: terminator.keyword(),
            line,
        }
        .fail(),
    }
}

fn split_statements(tokens: Vec<Token>) -> Vec<Vec<Token>> {
    let mut statements = vec![Vec::new()];
    let mut depth = 0usize;

    for token in tokens {
        match token {
            Token::LParen | Token::LBracket => depth += 1,
            Token::RParen | Token::RBracket => depth = depth.saturating_sub(1),
            Token::Separator if depth == 0 => {
                statements.push(Vec::new());
                continue;
            }
            Token::Separator => continue,
            _ => {}
        }
        if let Some(statement) = statements.last_mut() {
            statement.push(token);
        }
    }

    statements.retain(|statement| !statement.is_empty());
    statements
}

fn parse_statement(tokens: &[Token], line: usize) -> Result<Statement> {
    match tokens {
        [Token::Ident(keyword), rest @ ..] if keyword == "if" => {
            Ok(Statement::If(parse_expr(rest, line)?))
        }
        [Token::Ident(keyword), rest @ ..] if keyword == "elsif" => {
            Ok(Statement::Elsif(parse_expr(rest, line)?))
        }
        [Token::Ident(keyword), rest @ ..] if keyword == "unless" => Ok(Statement::If(Expr::Not(
            Box::new(parse_expr(rest, line)?),
        ))),
        [Token::Ident(keyword)] if keyword == "else" => Ok(Statement::Else),
        [Token::Ident(keyword)] if keyword == "end" => Ok(Statement::End),
        [Token::Ident(name), Token::Assign, rest @ ..] => {
            Ok(Statement::Assign(name.clone(), parse_expr(rest, line)?))
        }
        _ => match tokens.iter().position(|token| token.is_keyword("do")) {
            Some(position) => {
                let call = parse_expr(&tokens[..position], line)?;
                let params = parse_block_params(&tokens[position + 1..], line)?;
                Ok(Statement::Block(call, params))
            }
            None => UnsupportedStatementSnafu {
                statement: tokens
                    .iter()
                    .map(Token::describe)
                    .collect::<Vec<_>>()
                    .join(" "),
                line,
            }
            .fail(),
        },
    }
}

fn parse_block_params(tokens: &[Token], line: usize) -> Result<Vec<String>> {
    let inner = match tokens {
        [] => return Ok(Vec::new()),
        [Token::Pipe, inner @ .., Token::Pipe] => inner,
        [token, ..] => {
            return UnexpectedTokenSnafu {
                found: token.describe(),
                expected: "block parameters",
                line,
            }
            .fail();
        }
    };

    let mut params = Vec::new();
    for (position, token) in inner.iter().enumerate() {
        match (position % 2, token) {
            (0, Token::Ident(name)) => params.push(name.clone()),
            (1, Token::Comma) => {}
            (_, token) => {
                return UnexpectedTokenSnafu {
                    found: token.describe(),
                    expected: "parameter name",
                    line,
                }
                .fail();
            }
        }
    }

    Ok(params)
}

#[derive(Debug)]
enum Terminator {
    Elsif(Expr),
    Else,
    End,
}

impl Terminator {
    fn keyword(&self) -> &'static str {
        match self {
            Self::Elsif(_) => "elsif",
            Self::Else => "else",
            Self::End => "end",
        }
    }
}

struct TreeBuilder<I> {
    statements: I,
}

impl<I> TreeBuilder<I>
where
    I: Iterator<Item = (Statement, usize)>,
{
    /// Collects nodes up to the next `elsif`, `else` or `end`.
    fn body(&mut self) -> Result<(Vec<Node>, Option<(Terminator, usize)>)> {
        let mut nodes = Vec::new();

        while let Some((statement, line)) = self.statements.next() {
            match statement {
                Statement::Text(text) => nodes.push(Node::Text(text)),
                Statement::Output(expr) => nodes.push(Node::Output { expr, line }),
                Statement::Assign(name, value) => nodes.push(Node::Assign { name, value, line }),
                Statement::If(condition) => nodes.push(self.conditional(condition, line)?),
                Statement::Block(call, params) => {
                    let (body, terminator) = self.body()?;
                    match terminator {
                        Some((Terminator::End, _)) => {}
                        Some((terminator, line)) => {
                            return UnbalancedKeywordSnafu {
                                keyword: terminator.keyword(),
                                line,
                            }
                            .fail();
                        }
                        None => return UnclosedBlockSnafu { line }.fail(),
                    }
                    nodes.push(Node::Block {
                        call,
                        params,
                        body,
                        line,
                    });
                }
                Statement::Elsif(condition) => {
                    return Ok((nodes, Some((Terminator::Elsif(condition), line))));
                }
                Statement::Else => return Ok((nodes, Some((Terminator::Else, line)))),
                Statement::End => return Ok((nodes, Some((Terminator::End, line)))),
            }
        }

        Ok((nodes, None))
    }

    fn conditional(&mut self, condition: Expr, line: usize) -> Result<Node> {
        let mut branches = Vec::new();
        let mut condition = condition;
        let mut branch_line = line;

        loop {
            let (body, terminator) = self.body()?;
            branches.push(Branch {
                condition,
                body,
                line: branch_line,
            });

            match terminator {
                Some((Terminator::Elsif(next), next_line)) => {
                    condition = next;
                    branch_line = next_line;
                }
                Some((Terminator::Else, else_line)) => {
                    let (otherwise, terminator) = self.body()?;
                    return match terminator {
                        Some((Terminator::End, _)) => Ok(Node::If {
                            branches,
                            otherwise,
                        }),
                        Some((terminator, line)) => UnbalancedKeywordSnafu {
                            keyword: terminator.keyword(),
                            line,
                        }
                        .fail(),
                        None => UnclosedBlockSnafu { line: else_line }.fail(),
                    };
                }
                Some((Terminator::End, _)) => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    });
                }
                None => return UnclosedBlockSnafu { line }.fail(),
            }
        }
    }
}

fn parse_expr(tokens: &[Token], line: usize) -> Result<Expr> {
    let mut parser = ExprParser {
        tokens,
        position: 0,
        line,
    };
    let expr = parser.or()?;

    match parser.peek() {
        None => Ok(expr),
        Some(token) => UnexpectedTokenSnafu {
            found: token.describe(),
            expected: "end of expression",
            line,
        }
        .fail(),
    }
}

struct ExprParser<'a> {
    tokens: &'a [Token],
    position: usize,
    line: usize,
}

impl<'a> ExprParser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.position);
        self.position += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|token| token.is_keyword(keyword)) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, description: &'static str) -> Result<()> {
        match self.next() {
            Some(token) if *token == expected => Ok(()),
            found => UnexpectedTokenSnafu {
                found: found.map_or_else(|| "end of expression".to_owned(), Token::describe),
                expected: description,
                line: self.line,
            }
            .fail(),
        }
    }

    fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    fn or(&mut self) -> Result<Expr> {
        let mut lhs = self.and()?;
        while self.eat(&Token::Or) || self.eat_keyword("or") {
            let rhs = self.and()?;
            lhs = Self::binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut lhs = self.not()?;
        while self.eat(&Token::And) || self.eat_keyword("and") {
            let rhs = self.not()?;
            lhs = Self::binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.equality()
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut lhs = self.additive()?;
        loop {
            let op = if self.eat(&Token::Eq) {
                BinaryOp::Eq
            } else if self.eat(&Token::Ne) {
                BinaryOp::Ne
            } else {
                return Ok(lhs);
            };
            let rhs = self.additive()?;
            lhs = Self::binary(op, lhs, rhs);
        }
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat(&Token::Plus) {
                BinaryOp::Add
            } else if self.eat(&Token::Minus) {
                BinaryOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.unary()?;
            lhs = Self::binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.next() {
                    Some(Token::Ident(name)) => name.clone(),
                    found => {
                        return UnexpectedTokenSnafu {
                            found: found
                                .map_or_else(|| "end of expression".to_owned(), Token::describe),
                            expected: "method name",
                            line: self.line,
                        }
                        .fail();
                    }
                };
                let args = if self.eat(&Token::LParen) {
                    self.list(Token::RParen)?
                } else {
                    Vec::new()
                };
                expr = Expr::Method {
                    receiver: Box::new(expr),
                    name,
                    args,
                };
            } else if self.eat(&Token::LBracket) {
                let index = self.or()?;
                self.expect(Token::RBracket, "\"]\"")?;
                expr = Expr::Index {
                    receiver: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Parses comma separated expressions up to and including `close`.
    fn list(&mut self, close: Token) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.or()?);
            if self.eat(&close) {
                return Ok(items);
            }
            self.expect(Token::Comma, "\",\"")?;
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let line = self.line;
        let token = match self.next() {
            Some(token) => token.clone(),
            None => {
                return UnexpectedTokenSnafu {
                    found: "end of expression",
                    expected: "expression",
                    line,
                }
                .fail();
            }
        };

        match token {
            Token::Int(value) => Ok(Expr::Int(value)),
            Token::Float(value) => Ok(Expr::Float(value)),
            Token::Str(value) => Ok(Expr::Str(value)),
            Token::Interpolated(parts) => {
                let parts = parts
                    .into_iter()
                    .map(|part| match part {
                        StrPart::Literal(value) => Ok(Expr::Str(value)),
                        StrPart::Code(code) => parse_expr(&tokenize(&code, line)?, line),
                    })
                    .collect::<Result<_>>()?;
                Ok(Expr::Interpolated(parts))
            }
            Token::LBracket => Ok(Expr::Array(self.list(Token::RBracket)?)),
            Token::LParen => {
                let expr = self.or()?;
                self.expect(Token::RParen, "\")\"")?;
                Ok(expr)
            }
            Token::Ident(name) => Ok(match name.as_str() {
                "nil" => Expr::Nil,
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                _ if self.eat(&Token::LParen) => Expr::Call {
                    name,
                    args: self.list(Token::RParen)?,
                },
                _ => Expr::Var(name),
            }),
            token => UnexpectedTokenSnafu {
                found: token.describe(),
                expected: "expression",
                line,
            }
            .fail(),
        }
    }
}

fn tokenize(code: &str, line: usize) -> Result<Vec<Token>> {
    let chars: Vec<char> = code.chars().collect();
    let mut tokens = Vec::new();
    let mut position = 0;

    while let Some(&current) = chars.get(position) {
        let next = chars.get(position + 1).copied();
        position += 1;

        let token = match current {
            '\n' | ';' => Token::Separator,
            c if c.is_whitespace() => continue,
            // Ruby comment, runs to the end of the line
            '#' => {
                while chars.get(position).is_some_and(|&c| c != '\n') {
                    position += 1;
                }
                continue;
            }
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            '.' => Token::Dot,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '=' if next == Some('=') => {
                position += 1;
                Token::Eq
            }
            '=' => Token::Assign,
            '!' if next == Some('=') => {
                position += 1;
                Token::Ne
            }
            '!' => Token::Not,
            '&' if next == Some('&') => {
                position += 1;
                Token::And
            }
            '|' if next == Some('|') => {
                position += 1;
                Token::Or
            }
            '|' => Token::Pipe,
            '\'' => {
                let (value, end) = single_quoted(&chars, position, line)?;
                position = end;
                Token::Str(value)
            }
            '"' => {
                let (parts, end) = double_quoted(&chars, position, line)?;
                position = end;
                match parts.as_slice() {
                    [] => Token::Str(String::new()),
                    [StrPart::Literal(value)] => Token::Str(value.clone()),
                    _ => Token::Interpolated(parts),
                }
            }
            c if c.is_ascii_digit() => {
                let start = position - 1;
                while chars
                    .get(position)
                    .is_some_and(|c| c.is_ascii_digit() || *c == '_')
                {
                    position += 1;
                }
                let is_float = chars.get(position) == Some(&'.')
                    && chars.get(position + 1).is_some_and(char::is_ascii_digit);
                if is_float {
                    position += 1;
                    while chars.get(position).is_some_and(char::is_ascii_digit) {
                        position += 1;
                    }
                }

                let literal: String = chars[start..position]
                    .iter()
                    .filter(|c| **c != '_')
                    .collect();
                if is_float {
                    Token::Float(literal.parse().unwrap_or_default())
                } else {
                    match literal.parse() {
                        Ok(value) => Token::Int(value),
                        Err(_) => return UnexpectedCharacterSnafu { character: c, line }.fail(),
                    }
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = position - 1;
                while chars
                    .get(position)
                    .is_some_and(|c| c.is_alphanumeric() || *c == '_')
                {
                    position += 1;
                }
                // Predicate and bang methods such as `nil?`
                match chars.get(position) {
                    Some('?') => position += 1,
                    Some('!') if chars.get(position + 1) != Some(&'=') => position += 1,
                    _ => {}
                }
                Token::Ident(chars[start..position].iter().collect())
            }
            character => return UnexpectedCharacterSnafu { character, line }.fail(),
        };

        tokens.push(token);
    }

    Ok(tokens)
}

fn single_quoted(chars: &[char], mut position: usize, line: usize) -> Result<(String, usize)> {
    let mut value = String::new();
    loop {
        match chars.get(position) {
            None => return UnterminatedStringSnafu { line }.fail(),
            Some('\'') => return Ok((value, position + 1)),
            Some('\\') if matches!(chars.get(position + 1), Some('\'' | '\\')) => {
                value.push(chars[position + 1]);
                position += 2;
            }
            Some(&c) => {
                value.push(c);
                position += 1;
            }
        }
    }
}

fn double_quoted(chars: &[char], mut position: usize, line: usize) -> Result<(Vec<StrPart>, usize)> {
    let mut parts = Vec::new();
    let mut literal = String::new();

    loop {
        match chars.get(position) {
            None => return UnterminatedStringSnafu { line }.fail(),
            Some('"') => {
                if !literal.is_empty() {
                    parts.push(StrPart::Literal(literal));
                }
                return Ok((parts, position + 1));
            }
            Some('\\') => {
                let escaped = chars
                    .get(position + 1)
                    .copied()
                    .ok_or(Error::UnterminatedString { line })?;
                literal.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                position += 2;
            }
            Some('#') if chars.get(position + 1) == Some(&'{') => {
                if !literal.is_empty() {
                    parts.push(StrPart::Literal(std::mem::take(&mut literal)));
                }
                position += 2;
                let start = position;
                let mut depth = 1;
                while depth > 0 {
                    match chars.get(position) {
                        None => return UnterminatedStringSnafu { line }.fail(),
                        Some('{') => depth += 1,
                        Some('}') => depth -= 1,
                        Some(_) => {}
                    }
                    position += 1;
                }
                parts.push(StrPart::Code(chars[start..position - 1].iter().collect()));
            }
            Some(&c) => {
                literal.push(c);
                position += 1;
            }
        }
    }
}
