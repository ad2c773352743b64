use crate::path::ast::{
    compile_regex, Axis, BinaryOp, Expr, Function, LocationPath, NameTest, PathStart, Predicate,
    Step,
};
use crate::path::errors::PathError;
use crate::path::lexer::{Lexer, Token, TokenKind};

/// Recursive-descent parser over the token stream of one expression.
pub struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    position: usize,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Result<Self, PathError> {
        let tokens = Lexer::new(input).tokenize()?;
        Ok(Self {
            input,
            tokens,
            position: 0,
        })
    }

    pub fn parse(mut self) -> Result<Expr, PathError> {
        if self.peek() == &TokenKind::Eof {
            return Err(self.error("empty path expression"));
        }
        let expr = self.parse_or()?;
        if self.peek() != &TokenKind::Eof {
            return Err(self.error(format!("unexpected {}", describe(self.peek()))));
        }
        Ok(expr)
    }

    fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        self.tokens
            .get(self.position + offset)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn current_start(&self) -> usize {
        self.tokens
            .get(self.position)
            .map(|t| t.start)
            .unwrap_or(self.input.len())
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        kind
    }

    fn error(&self, message: impl Into<String>) -> PathError {
        PathError::syntax(self.input, self.current_start(), message)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), PathError> {
        if self.peek() == &kind {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {}, found {}",
                describe(&kind),
                describe(self.peek())
            )))
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), TokenKind::Name(name) if name == keyword)
    }

    fn parse_or(&mut self) -> Result<Expr, PathError> {
        let mut lhs = self.parse_and()?;
        while self.is_keyword("or") {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, PathError> {
        let mut lhs = self.parse_comparison()?;
        while self.is_keyword("and") {
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, PathError> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::NotEq,
            TokenKind::RegexMatch => BinaryOp::Matches,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs_start = self.current_start();
        let mut rhs = self.parse_additive()?;
        if op == BinaryOp::Matches {
            rhs = match rhs {
                Expr::Literal(pattern) => Expr::Regex(compile_regex(&pattern, false)?),
                other @ (Expr::Regex(_) | Expr::Path(_)) => other,
                other @ Expr::Call {
                    func: Function::Label,
                    ..
                } => other,
                _ => {
                    return Err(PathError::syntax(
                        self.input,
                        rhs_start,
                        "right side of =~ must be a regular expression",
                    ))
                }
            };
        }
        Ok(binary(op, lhs, rhs))
    }

    fn parse_additive(&mut self) -> Result<Expr, PathError> {
        let mut lhs = self.parse_operand()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_operand()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_operand(&mut self) -> Result<Expr, PathError> {
        match self.peek().clone() {
            TokenKind::Number(digits) => {
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| self.error("number out of range"))?;
                self.advance();
                Ok(Expr::Number(value))
            }
            TokenKind::Str(text) => {
                self.advance();
                Ok(Expr::Literal(text))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_or()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::Name(name) if self.peek_at(1) == &TokenKind::LParen => {
                self.parse_call(&name)
            }
            TokenKind::Var(name) => {
                self.advance();
                let steps = self.parse_continuation()?;
                Ok(Expr::Path(LocationPath {
                    start: PathStart::Variable(name),
                    steps,
                }))
            }
            _ => self.parse_location_path().map(Expr::Path),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr, PathError> {
        let name_start = self.current_start();
        self.advance();
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if self.peek() != &TokenKind::RParen {
            args.push(self.parse_or()?);
            while self.peek() == &TokenKind::Comma {
                self.advance();
                args.push(self.parse_or()?);
            }
        }
        self.expect(TokenKind::RParen)?;

        if name == "regexp" {
            return match args.as_slice() {
                [Expr::Literal(pattern)] => Ok(Expr::Regex(compile_regex(pattern, false)?)),
                [Expr::Literal(pattern), Expr::Literal(flags)] if flags == "i" => {
                    Ok(Expr::Regex(compile_regex(pattern, true)?))
                }
                _ => Err(PathError::syntax(
                    self.input,
                    name_start,
                    "regexp() takes a string literal and an optional 'i' flag",
                )),
            };
        }

        let func = Function::from_name(name).ok_or_else(|| {
            PathError::syntax(self.input, name_start, format!("unknown function {name}()"))
        })?;
        let arity_ok = match func {
            Function::Last | Function::Position => args.is_empty(),
            Function::Count | Function::Not => args.len() == 1,
            Function::Label => args.len() <= 1,
        };
        if !arity_ok {
            return Err(PathError::syntax(
                self.input,
                name_start,
                format!("wrong number of arguments to {name}()"),
            ));
        }
        if func == Function::Count && !matches!(args.first(), Some(Expr::Path(_))) {
            return Err(PathError::syntax(
                self.input,
                name_start,
                "count() expects a path",
            ));
        }
        Ok(Expr::Call { func, args })
    }

    fn parse_location_path(&mut self) -> Result<LocationPath, PathError> {
        let mut steps = Vec::new();
        let start = match self.peek() {
            TokenKind::Slash => {
                self.advance();
                if !self.at_step_start() {
                    return Ok(LocationPath {
                        start: PathStart::Root,
                        steps,
                    });
                }
                PathStart::Root
            }
            TokenKind::DoubleSlash => {
                self.advance();
                steps.push(Step::new(Axis::DescendantOrSelf, NameTest::Any));
                PathStart::Root
            }
            _ if self.at_step_start() => PathStart::Context,
            other => {
                return Err(self.error(format!("expected a path, found {}", describe(other))));
            }
        };
        steps.push(self.parse_step()?);
        steps.extend(self.parse_continuation()?);
        Ok(LocationPath { start, steps })
    }

    /// Steps following an initial step or variable: `(/ step | // step)*`.
    fn parse_continuation(&mut self) -> Result<Vec<Step>, PathError> {
        let mut steps = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Slash => {
                    self.advance();
                }
                TokenKind::DoubleSlash => {
                    self.advance();
                    steps.push(Step::new(Axis::DescendantOrSelf, NameTest::Any));
                }
                _ => return Ok(steps),
            }
            steps.push(self.parse_step()?);
        }
    }

    fn at_step_start(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Name(_)
                | TokenKind::Number(_)
                | TokenKind::Star
                | TokenKind::Dot
                | TokenKind::DotDot
                | TokenKind::Axis(_)
        )
    }

    fn parse_step(&mut self) -> Result<Step, PathError> {
        match self.peek().clone() {
            TokenKind::Dot => {
                self.advance();
                return Ok(Step::new(Axis::SelfNode, NameTest::Any));
            }
            TokenKind::DotDot => {
                self.advance();
                return Ok(Step::new(Axis::Parent, NameTest::Any));
            }
            _ => {}
        }

        let axis = if let TokenKind::Axis(name) = self.peek().clone() {
            let axis = Axis::from_name(&name)
                .ok_or_else(|| self.error(format!("unknown axis '{name}'")))?;
            self.advance();
            axis
        } else {
            Axis::Child
        };

        let name = match self.advance() {
            TokenKind::Name(label) | TokenKind::Number(label) => NameTest::Label(label),
            TokenKind::Star => NameTest::Any,
            other => {
                self.position -= 1;
                return Err(self.error(format!("expected a label, found {}", describe(&other))));
            }
        };

        let mut step = Step::new(axis, name);
        while self.peek() == &TokenKind::LBracket {
            self.advance();
            if self.peek() == &TokenKind::Star && self.peek_at(1) == &TokenKind::RBracket {
                self.advance();
                self.advance();
                step.predicates.push(Predicate::Any);
                continue;
            }
            let expr = self.parse_or()?;
            self.expect(TokenKind::RBracket)?;
            step.predicates.push(Predicate::Expr(expr));
        }
        Ok(step)
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Slash => "'/'".to_string(),
        TokenKind::DoubleSlash => "'//'".to_string(),
        TokenKind::LBracket => "'['".to_string(),
        TokenKind::RBracket => "']'".to_string(),
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Eq => "'='".to_string(),
        TokenKind::NotEq => "'!='".to_string(),
        TokenKind::RegexMatch => "'=~'".to_string(),
        TokenKind::Plus => "'+'".to_string(),
        TokenKind::Minus => "'-'".to_string(),
        TokenKind::Star => "'*'".to_string(),
        TokenKind::Dot => "'.'".to_string(),
        TokenKind::DotDot => "'..'".to_string(),
        TokenKind::Axis(name) => format!("axis '{name}::'"),
        TokenKind::Name(name) => format!("'{name}'"),
        TokenKind::Number(digits) => format!("number {digits}"),
        TokenKind::Str(text) => format!("string '{text}'"),
        TokenKind::Var(name) => format!("${name}"),
        TokenKind::Eof => "end of expression".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Expr {
        Parser::new(input).unwrap().parse().unwrap()
    }

    fn path(input: &str) -> LocationPath {
        match parse(input) {
            Expr::Path(path) => path,
            other => panic!("expected path, got {other:?}"),
        }
    }

    #[test]
    fn parses_absolute_steps() {
        let p = path("/files/etc/hosts");
        assert_eq!(p.start, PathStart::Root);
        let labels: Vec<_> = p.steps.iter().map(|s| s.name.clone()).collect();
        assert_eq!(
            labels,
            vec![
                NameTest::Label("files".into()),
                NameTest::Label("etc".into()),
                NameTest::Label("hosts".into())
            ]
        );
    }

    #[test]
    fn root_alone_has_no_steps() {
        let p = path("/");
        assert_eq!(p.start, PathStart::Root);
        assert!(p.steps.is_empty());
    }

    #[test]
    fn numeric_labels_are_steps() {
        let p = path("/files/etc/hosts/1/ipaddr");
        assert_eq!(p.steps[3].name, NameTest::Label("1".into()));
    }

    #[test]
    fn double_slash_expands_to_descendant_or_self() {
        let p = path("//ipaddr");
        assert_eq!(p.steps.len(), 2);
        assert_eq!(p.steps[0].axis, Axis::DescendantOrSelf);
        assert_eq!(p.steps[1].name, NameTest::Label("ipaddr".into()));
    }

    #[test]
    fn predicates_and_wildcard_position() {
        let p = path("/a/b[*]/c[last()+1][d = 'x' and not(e)]");
        assert!(matches!(p.steps[1].predicates[0], Predicate::Any));
        assert_eq!(p.steps[2].predicates.len(), 2);
    }

    #[test]
    fn variable_paths() {
        let p = path("$hosts/*[1]/ipaddr");
        assert_eq!(p.start, PathStart::Variable("hosts".into()));
        assert_eq!(p.steps.len(), 2);
    }

    #[test]
    fn regex_literals_are_compiled() {
        let p = path("/a[. =~ regexp('1.*')]");
        match &p.steps[0].predicates[0] {
            Predicate::Expr(Expr::Binary { rhs, .. }) => assert!(matches!(**rhs, Expr::Regex(_))),
            other => panic!("unexpected predicate {other:?}"),
        }
    }

    #[test]
    fn rejects_trailing_garbage() {
        let err = Parser::new("SOME INVALID GOOFY PATH")
            .unwrap()
            .parse()
            .unwrap_err();
        assert!(matches!(err, PathError::Syntax { position: 5, .. }));
    }

    #[test]
    fn rejects_bad_regex_at_compile_time() {
        let err = Parser::new("/a[. =~ regexp('(')]").unwrap().parse().unwrap_err();
        assert!(matches!(err, PathError::InvalidRegex { .. }));
    }

    #[test]
    fn rejects_unclosed_predicate() {
        assert!(Parser::new("/a[1").unwrap().parse().is_err());
        assert!(Parser::new("/a/").unwrap().parse().is_err());
        assert!(Parser::new("").unwrap().parse().is_err());
    }
}
