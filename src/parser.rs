use std::rc::Rc;

use crate::{
    ast::{Block, Expression, FunctionLit, InfixOp, PrefixOp, Program, Statement},
    error::{byte_offset_to_line, Error, Result},
    lexer::{Token, TokenKind},
    object::TypeTag,
};

// Precedence levels, lowest binds loosest. Pipelines sit at the bottom so
// `a + 1 |> f` pipes the whole sum.
const LOWEST: u8 = 0;
const PIPELINE: u8 = 1;
const OR: u8 = 2;
const AND: u8 = 3;
const EQUALS: u8 = 4;
const LESSGREATER: u8 = 5;
const SUM: u8 = 6;
const PRODUCT: u8 = 7;
const PREFIX: u8 = 8;
const CALL: u8 = 9;

fn precedence(kind: &TokenKind) -> u8 {
    match kind {
        TokenKind::PipeArrow | TokenKind::MapArrow | TokenKind::FilterArrow => PIPELINE,
        TokenKind::Pipe => OR,
        TokenKind::Ampersand => AND,
        TokenKind::Eq | TokenKind::NotEq => EQUALS,
        TokenKind::LessThan
        | TokenKind::LessThanEq
        | TokenKind::GreaterThan
        | TokenKind::GreaterThanEq => LESSGREATER,
        TokenKind::Plus | TokenKind::Minus => SUM,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => PRODUCT,
        TokenKind::LParen | TokenKind::LBracket | TokenKind::Dot => CALL,
        _ => LOWEST,
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    source: String,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            source: String::new(),
        }
    }

    pub fn with_source(tokens: Vec<Token>, source: &str) -> Self {
        Self {
            tokens,
            current: 0,
            source: source.to_string(),
        }
    }

    fn error_here(&self, message: String) -> Error {
        let offset = self
            .tokens
            .get(self.current)
            .or_else(|| self.tokens.last())
            .map(|t| t.span.start)
            .unwrap_or(0);
        Error::Parse {
            message,
            line: byte_offset_to_line(&self.source, offset),
        }
    }

    pub fn parse_program(&mut self) -> Result<Program> {
        let mut statements = Vec::new();
        self.skip_newlines();
        while !self.is_at_end() {
            statements.push(self.parse_statement()?);
            self.expect_statement_boundary()?;
            self.skip_newlines();
        }
        Ok(Program { statements })
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.current_kind() {
            TokenKind::Let => self.parse_let_statement(),
            _ => {
                let expr = self.parse_expression(LOWEST)?;
                Ok(Statement::Expression(expr))
            }
        }
    }

    fn parse_let_statement(&mut self) -> Result<Statement> {
        self.advance(); // let
        let name = self.expect_identifier("expected a name after 'let'")?;
        self.expect(TokenKind::Assign, "expected '=' in let binding")?;
        self.skip_newlines();
        let expr = self.parse_expression(LOWEST)?;
        Ok(Statement::Let { name, expr })
    }

    fn parse_expression(&mut self, min_precedence: u8) -> Result<Expression> {
        let mut left = self.parse_prefix()?;

        loop {
            let next = precedence(self.current_kind());
            if next <= min_precedence {
                break;
            }
            left = match self.current_kind() {
                TokenKind::LParen => self.parse_call(left)?,
                TokenKind::LBracket => self.parse_index(left)?,
                TokenKind::Dot => self.parse_member(left)?,
                _ => self.parse_infix(left)?,
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expression> {
        match self.current_kind().clone() {
            TokenKind::Int(n) => {
                self.advance();
                Ok(Expression::Int(n))
            }
            TokenKind::Float(n) => {
                self.advance();
                Ok(Expression::Float(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expression::Str(s))
            }
            TokenKind::Boolean(b) => {
                self.advance();
                Ok(Expression::Bool(b))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expression::Null)
            }
            TokenKind::PipeValue => {
                self.advance();
                Ok(Expression::PipeValue)
            }
            TokenKind::SecondaryOutput => {
                self.advance();
                if matches!(self.current_kind(), TokenKind::Assign) {
                    self.advance();
                    self.skip_newlines();
                    let value = self.parse_expression(LOWEST)?;
                    Ok(Expression::ReturnWrite(Box::new(value)))
                } else {
                    Ok(Expression::SecondaryOutput)
                }
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expression::Identifier(name))
            }
            TokenKind::Minus => {
                self.advance();
                let right = self.parse_expression(PREFIX)?;
                Ok(Expression::Prefix {
                    op: PrefixOp::Neg,
                    right: Box::new(right),
                })
            }
            TokenKind::Bang | TokenKind::Not => {
                self.advance();
                let right = self.parse_expression(PREFIX)?;
                Ok(Expression::Prefix {
                    op: PrefixOp::Not,
                    right: Box::new(right),
                })
            }
            TokenKind::LParen => {
                self.advance();
                self.skip_newlines();
                let expr = self.parse_expression(LOWEST)?;
                self.skip_newlines();
                self.expect(TokenKind::RParen, "expected ')' after expression")?;
                Ok(expr)
            }
            TokenKind::LBracket => self.parse_array(),
            TokenKind::LBrace => self.parse_hash(),
            TokenKind::If => self.parse_if(),
            TokenKind::Fn => self.parse_function(),
            other => Err(self.error_here(format!("unexpected token {:?}", other))),
        }
    }

    fn parse_infix(&mut self, left: Expression) -> Result<Expression> {
        let op = match self.current_kind() {
            TokenKind::Plus => InfixOp::Add,
            TokenKind::Minus => InfixOp::Sub,
            TokenKind::Star => InfixOp::Mul,
            TokenKind::Slash => InfixOp::Div,
            TokenKind::Percent => InfixOp::Mod,
            TokenKind::Eq => InfixOp::Eq,
            TokenKind::NotEq => InfixOp::NotEq,
            TokenKind::LessThan => InfixOp::Lt,
            TokenKind::LessThanEq => InfixOp::LtEq,
            TokenKind::GreaterThan => InfixOp::Gt,
            TokenKind::GreaterThanEq => InfixOp::GtEq,
            TokenKind::Ampersand => InfixOp::And,
            TokenKind::Pipe => InfixOp::Or,
            TokenKind::PipeArrow => InfixOp::Pipe,
            TokenKind::MapArrow => InfixOp::MapPipe,
            TokenKind::FilterArrow => InfixOp::FilterPipe,
            other => return Err(self.error_here(format!("unexpected operator {:?}", other))),
        };
        let op_precedence = precedence(self.current_kind());
        self.advance();
        // An operator may end a line; the chain continues below it.
        self.skip_newlines();
        let right = self.parse_expression(op_precedence)?;
        Ok(Expression::Infix {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn parse_call(&mut self, callee: Expression) -> Result<Expression> {
        self.advance(); // (
        self.skip_newlines();
        let mut args = Vec::new();
        if !matches!(self.current_kind(), TokenKind::RParen) {
            loop {
                args.push(self.parse_expression(LOWEST)?);
                self.skip_newlines();
                if matches!(self.current_kind(), TokenKind::Comma) {
                    self.advance();
                    self.skip_newlines();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "expected ')' after arguments")?;
        Ok(Expression::Call {
            callee: Box::new(callee),
            args,
        })
    }

    fn parse_index(&mut self, target: Expression) -> Result<Expression> {
        self.advance(); // [
        self.skip_newlines();

        // Open-start slice: target[..end] or target[..]
        if matches!(self.current_kind(), TokenKind::DotDot) {
            self.advance();
            let end = if matches!(self.current_kind(), TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expression(LOWEST)?))
            };
            self.expect(TokenKind::RBracket, "expected ']' after slice")?;
            return Ok(Expression::Slice {
                target: Box::new(target),
                start: None,
                end,
            });
        }

        let first = self.parse_expression(LOWEST)?;
        if matches!(self.current_kind(), TokenKind::DotDot) {
            self.advance();
            let end = if matches!(self.current_kind(), TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expression(LOWEST)?))
            };
            self.expect(TokenKind::RBracket, "expected ']' after slice")?;
            return Ok(Expression::Slice {
                target: Box::new(target),
                start: Some(Box::new(first)),
                end,
            });
        }

        self.expect(TokenKind::RBracket, "expected ']' after index")?;
        Ok(Expression::Index {
            target: Box::new(target),
            index: Box::new(first),
        })
    }

    fn parse_member(&mut self, object: Expression) -> Result<Expression> {
        self.advance(); // .
        let property = self.expect_identifier("expected a property name after '.'")?;
        Ok(Expression::Member {
            object: Box::new(object),
            property,
        })
    }

    fn parse_array(&mut self) -> Result<Expression> {
        self.advance(); // [
        self.skip_newlines();
        let mut elements = Vec::new();
        while !matches!(self.current_kind(), TokenKind::RBracket) {
            elements.push(self.parse_expression(LOWEST)?);
            self.skip_newlines();
            if matches!(self.current_kind(), TokenKind::Comma) {
                self.advance();
                self.skip_newlines();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RBracket, "expected ']' after array literal")?;
        Ok(Expression::Array(elements))
    }

    fn parse_hash(&mut self) -> Result<Expression> {
        self.advance(); // {
        self.skip_newlines();
        let mut entries = Vec::new();
        while !matches!(self.current_kind(), TokenKind::RBrace) {
            let key = self.parse_expression(LOWEST)?;
            self.expect(TokenKind::Colon, "expected ':' in hash literal")?;
            self.skip_newlines();
            let value = self.parse_expression(LOWEST)?;
            entries.push((key, value));
            self.skip_newlines();
            if matches!(self.current_kind(), TokenKind::Comma) {
                self.advance();
                self.skip_newlines();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "expected '}' after hash literal")?;
        Ok(Expression::Hash(entries))
    }

    fn parse_if(&mut self) -> Result<Expression> {
        self.advance(); // if
        self.expect(TokenKind::LParen, "expected '(' after 'if'")?;
        self.skip_newlines();
        let condition = self.parse_expression(LOWEST)?;
        self.skip_newlines();
        self.expect(TokenKind::RParen, "expected ')' after if condition")?;
        self.skip_newlines();
        let consequence = self.parse_block()?;
        let alternative = if matches!(self.current_kind(), TokenKind::Else) {
            self.advance();
            self.skip_newlines();
            if matches!(self.current_kind(), TokenKind::If) {
                let nested = self.parse_if()?;
                Some(Rc::new(Block {
                    statements: vec![Statement::Expression(nested)],
                }))
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Expression::If {
            condition: Box::new(condition),
            consequence,
            alternative,
        })
    }

    fn parse_function(&mut self) -> Result<Expression> {
        self.advance(); // fn
        let name = if let TokenKind::Identifier(name) = self.current_kind() {
            let name = name.clone();
            self.advance();
            Some(name)
        } else {
            None
        };

        self.expect(TokenKind::LParen, "expected '(' after function name")?;
        self.skip_newlines();
        let mut params = Vec::new();
        let mut input_type = None;
        while !matches!(self.current_kind(), TokenKind::RParen) {
            let param = self.expect_identifier("expected a parameter name")?;
            if matches!(self.current_kind(), TokenKind::Colon) {
                self.advance();
                let tag = self.parse_type_tag()?;
                // Only the first parameter carries the declared input type.
                if params.is_empty() {
                    input_type = Some(tag);
                }
            }
            params.push(param);
            self.skip_newlines();
            if matches!(self.current_kind(), TokenKind::Comma) {
                self.advance();
                self.skip_newlines();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen, "expected ')' after parameters")?;

        let return_type = if matches!(self.current_kind(), TokenKind::Colon) {
            self.advance();
            Some(self.parse_type_tag()?)
        } else {
            None
        };

        let condition = if matches!(self.current_kind(), TokenKind::When) {
            self.advance();
            self.skip_newlines();
            Some(Rc::new(self.parse_expression(LOWEST)?))
        } else {
            None
        };

        self.skip_newlines();
        let body = self.parse_block()?;

        Ok(Expression::Function(Rc::new(FunctionLit {
            name,
            params,
            input_type,
            return_type,
            condition,
            body,
        })))
    }

    fn parse_type_tag(&mut self) -> Result<TypeTag> {
        let name = self.expect_identifier("expected a type name after ':'")?;
        TypeTag::from_name(&name)
            .ok_or_else(|| self.error_here(format!("unknown type name '{}'", name)))
    }

    fn parse_block(&mut self) -> Result<Rc<Block>> {
        self.expect(TokenKind::LBrace, "expected '{' to open a block")?;
        self.skip_newlines();
        let mut statements = Vec::new();
        while !matches!(self.current_kind(), TokenKind::RBrace) {
            if self.is_at_end() {
                return Err(self.error_here("unterminated block, expected '}'".to_string()));
            }
            statements.push(self.parse_statement()?);
            if !matches!(
                self.current_kind(),
                TokenKind::Newline | TokenKind::RBrace | TokenKind::Eof
            ) {
                return Err(self.error_here(format!(
                    "expected end of statement, found {:?}",
                    self.current_kind()
                )));
            }
            self.skip_newlines();
        }
        self.advance(); // }
        Ok(Rc::new(Block { statements }))
    }

    fn expect_statement_boundary(&mut self) -> Result<()> {
        match self.current_kind() {
            TokenKind::Newline | TokenKind::Eof => Ok(()),
            other => Err(self.error_here(format!(
                "expected end of statement, found {:?}",
                other
            ))),
        }
    }

    fn expect_identifier(&mut self, message: &str) -> Result<String> {
        if let TokenKind::Identifier(name) = self.current_kind() {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error_here(message.to_string()))
        }
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> Result<()> {
        if *self.current_kind() == kind {
            self.advance();
            Ok(())
        } else {
            Err(self.error_here(format!("{}, found {:?}", message, self.current_kind())))
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.current_kind(), TokenKind::Newline) {
            self.advance();
        }
    }

    fn current_kind(&self) -> &TokenKind {
        self.tokens
            .get(self.current)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn advance(&mut self) {
        if self.current < self.tokens.len() {
            self.current += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current_kind(), TokenKind::Eof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Program {
        let tokens = Lexer::new(source).lex().expect("lexing should succeed");
        Parser::with_source(tokens, source)
            .parse_program()
            .expect("parsing should succeed")
    }

    fn sole_expression(program: &Program) -> &Expression {
        assert_eq!(program.statements.len(), 1);
        match &program.statements[0] {
            Statement::Expression(expr) => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn pipeline_chains_are_left_associative() {
        let program = parse("a +> f ?> g +> h");
        let expr = sole_expression(&program);
        // ((a +> f) ?> g) +> h
        match expr {
            Expression::Infix { left, op, .. } => {
                assert_eq!(*op, InfixOp::MapPipe);
                match left.as_ref() {
                    Expression::Infix { op, .. } => assert_eq!(*op, InfixOp::FilterPipe),
                    other => panic!("expected nested pipe, got {:?}", other),
                }
            }
            other => panic!("expected infix, got {:?}", other),
        }
    }

    #[test]
    fn pipeline_binds_looser_than_arithmetic() {
        let program = parse("n + 1 |> double");
        match sole_expression(&program) {
            Expression::Infix { left, op, .. } => {
                assert_eq!(*op, InfixOp::Pipe);
                assert!(matches!(left.as_ref(), Expression::Infix { op: InfixOp::Add, .. }));
            }
            other => panic!("expected pipeline, got {:?}", other),
        }
    }

    #[test]
    fn conditional_function_parses_condition_and_types() {
        let program = parse("fn fizz(n: int): str when 🍕 % 3 == 0 { \"Fizz\" }");
        match sole_expression(&program) {
            Expression::Function(lit) => {
                assert_eq!(lit.name.as_deref(), Some("fizz"));
                assert_eq!(lit.params, vec!["n".to_string()]);
                assert_eq!(lit.input_type, Some(TypeTag::Int));
                assert_eq!(lit.return_type, Some(TypeTag::Str));
                assert!(lit.condition.is_some());
            }
            other => panic!("expected function literal, got {:?}", other),
        }
    }

    #[test]
    fn default_function_has_no_condition() {
        let program = parse("fn echo() { 💩 = 🍕 }");
        match sole_expression(&program) {
            Expression::Function(lit) => {
                assert!(lit.condition.is_none());
                assert_eq!(lit.body.statements.len(), 1);
            }
            other => panic!("expected function literal, got {:?}", other),
        }
    }

    #[test]
    fn slices_allow_open_and_negative_bounds() {
        let program = parse("let a = xs[-2..]\nlet b = xs[..-2]\nlet c = xs[1..3]");
        assert_eq!(program.statements.len(), 3);
        match &program.statements[0] {
            Statement::Let { expr, .. } => match expr {
                Expression::Slice { start, end, .. } => {
                    assert!(start.is_some());
                    assert!(end.is_none());
                }
                other => panic!("expected slice, got {:?}", other),
            },
            other => panic!("expected let, got {:?}", other),
        }
        match &program.statements[1] {
            Statement::Let { expr, .. } => {
                assert!(matches!(expr, Expression::Slice { start: None, .. }));
            }
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn hash_literals_and_member_access_parse() {
        let program = parse("let h = { \"name\": \"Ada\", 1: true }\nh.name");
        assert_eq!(program.statements.len(), 2);
        match &program.statements[0] {
            Statement::Let { expr, .. } => match expr {
                Expression::Hash(entries) => assert_eq!(entries.len(), 2),
                other => panic!("expected hash literal, got {:?}", other),
            },
            other => panic!("expected let, got {:?}", other),
        }
        match &program.statements[1] {
            Statement::Expression(Expression::Member { property, .. }) => {
                assert_eq!(property, "name");
            }
            other => panic!("expected member access, got {:?}", other),
        }
    }

    #[test]
    fn operators_may_trail_at_line_ends() {
        let program = parse("1 |>\n  double |>\n  double");
        assert_eq!(program.statements.len(), 1);
    }

    #[test]
    fn unknown_type_name_is_a_parse_error() {
        let tokens = Lexer::new("fn f(x: integer) { x }").lex().expect("lex");
        let err = Parser::new(tokens).parse_program().unwrap_err();
        assert!(err.to_string().contains("unknown type name"));
    }

    #[test]
    fn adjacent_expressions_without_newline_are_rejected() {
        let tokens = Lexer::new("1 2").lex().expect("lex");
        let err = Parser::new(tokens).parse_program().unwrap_err();
        assert!(err.to_string().contains("expected end of statement"));
    }
}
