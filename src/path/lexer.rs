use crate::path::errors::PathError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Eq,
    NotEq,
    RegexMatch,
    Plus,
    Minus,
    Star,
    Dot,
    DotDot,
    Axis(String),
    Name(String),
    Number(String),
    Str(String),
    Var(String),
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token in the expression.
    pub start: usize,
}

/// Characters that end a name unless escaped.
fn is_delimiter(ch: char) -> bool {
    ch.is_whitespace()
        || matches!(
            ch,
            '/' | '[' | ']' | '(' | ')' | '=' | '!' | ',' | '|' | '\'' | '"' | '$' | '*' | '+'
                | '<' | '>' | '~'
        )
}

pub struct Lexer<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().collect(),
            position: 0,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, PathError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.position).map(|(_, ch)| *ch)
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.position + offset).map(|(_, ch)| *ch)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.position)
            .map(|(idx, _)| *idx)
            .unwrap_or(self.input.len())
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.current(), Some(ch) if ch.is_whitespace()) {
            self.advance();
        }
    }

    fn single(&mut self, kind: TokenKind, width: usize) -> Token {
        let start = self.offset();
        self.position += width;
        Token { kind, start }
    }

    fn next_token(&mut self) -> Result<Token, PathError> {
        let start = self.offset();
        let Some(ch) = self.current() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                start,
            });
        };

        let token = match ch {
            '/' if self.peek(1) == Some('/') => self.single(TokenKind::DoubleSlash, 2),
            '/' => self.single(TokenKind::Slash, 1),
            '[' => self.single(TokenKind::LBracket, 1),
            ']' => self.single(TokenKind::RBracket, 1),
            '(' => self.single(TokenKind::LParen, 1),
            ')' => self.single(TokenKind::RParen, 1),
            ',' => self.single(TokenKind::Comma, 1),
            '=' if self.peek(1) == Some('~') => self.single(TokenKind::RegexMatch, 2),
            '=' => self.single(TokenKind::Eq, 1),
            '!' if self.peek(1) == Some('=') => self.single(TokenKind::NotEq, 2),
            '+' => self.single(TokenKind::Plus, 1),
            '-' => self.single(TokenKind::Minus, 1),
            '*' => self.single(TokenKind::Star, 1),
            '.' if self.peek(1) == Some('.') => self.single(TokenKind::DotDot, 2),
            '.' if !matches!(self.peek(1), Some(next) if !is_delimiter(next)) => {
                self.single(TokenKind::Dot, 1)
            }
            '\'' | '"' => self.read_string(ch)?,
            '$' => {
                self.advance();
                let name = self.read_name()?;
                if name.is_empty() {
                    return Err(PathError::syntax(self.input, start, "expected variable name"));
                }
                Token {
                    kind: TokenKind::Var(name),
                    start,
                }
            }
            c if !is_delimiter(c) || c == '\\' => self.read_word(start)?,
            other => {
                return Err(PathError::syntax(
                    self.input,
                    start,
                    format!("unexpected character '{other}'"),
                ))
            }
        };
        Ok(token)
    }

    fn read_word(&mut self, start: usize) -> Result<Token, PathError> {
        let escaped_start = self.current() == Some('\\');
        let name = self.read_name()?;

        if self.current() == Some(':') && self.peek(1) == Some(':') {
            self.position += 2;
            return Ok(Token {
                kind: TokenKind::Axis(name),
                start,
            });
        }

        let kind = if !escaped_start && name.chars().all(|c| c.is_ascii_digit()) {
            TokenKind::Number(name)
        } else {
            TokenKind::Name(name)
        };
        Ok(Token { kind, start })
    }

    fn read_name(&mut self) -> Result<String, PathError> {
        let mut name = String::new();
        while let Some(ch) = self.current() {
            if ch == '\\' {
                let at = self.offset();
                self.advance();
                match self.current() {
                    Some(escaped) => {
                        name.push(escaped);
                        self.advance();
                    }
                    None => {
                        return Err(PathError::syntax(self.input, at, "dangling escape"));
                    }
                }
                continue;
            }
            if is_delimiter(ch) || (ch == ':' && self.peek(1) == Some(':')) {
                break;
            }
            name.push(ch);
            self.advance();
        }
        Ok(name)
    }

    fn read_string(&mut self, quote: char) -> Result<Token, PathError> {
        let start = self.offset();
        self.advance();
        let mut value = String::new();
        while let Some(ch) = self.current() {
            match ch {
                c if c == quote => {
                    self.advance();
                    return Ok(Token {
                        kind: TokenKind::Str(value),
                        start,
                    });
                }
                '\\' => {
                    self.advance();
                    match self.current() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some(other) => value.push(other),
                        None => break,
                    }
                    self.advance();
                }
                other => {
                    value.push(other);
                    self.advance();
                }
            }
        }
        Err(PathError::syntax(self.input, start, "unterminated string"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_simple_path() {
        assert_eq!(
            kinds("/files/etc/hosts"),
            vec![
                TokenKind::Slash,
                TokenKind::Name("files".into()),
                TokenKind::Slash,
                TokenKind::Name("etc".into()),
                TokenKind::Slash,
                TokenKind::Name("hosts".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_predicates_and_numbers() {
        assert_eq!(
            kinds("a[last()-1]"),
            vec![
                TokenKind::Name("a".into()),
                TokenKind::LBracket,
                TokenKind::Name("last".into()),
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Minus,
                TokenKind::Number("1".into()),
                TokenKind::RBracket,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn names_keep_inner_dashes_and_dots() {
        assert_eq!(
            kinds("opt-level/hosts.allow/.bashrc"),
            vec![
                TokenKind::Name("opt-level".into()),
                TokenKind::Slash,
                TokenKind::Name("hosts.allow".into()),
                TokenKind::Slash,
                TokenKind::Name(".bashrc".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn escapes_and_axes() {
        assert_eq!(
            kinds("descendant::a\\ b"),
            vec![
                TokenKind::Axis("descendant".into()),
                TokenKind::Name("a b".into()),
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            kinds("\\1"),
            vec![TokenKind::Name("1".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn strings_and_operators() {
        assert_eq!(
            kinds("a != 'x y' and b =~ \"z\""),
            vec![
                TokenKind::Name("a".into()),
                TokenKind::NotEq,
                TokenKind::Str("x y".into()),
                TokenKind::Name("and".into()),
                TokenKind::Name("b".into()),
                TokenKind::RegexMatch,
                TokenKind::Str("z".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_fails() {
        assert!(matches!(
            Lexer::new("a['x").tokenize(),
            Err(PathError::Syntax { .. })
        ));
    }
}
