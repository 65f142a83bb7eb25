// Expression Lexer
// Tokenizes condition expressions and splits text into ${{ }} and $(var) segments

use std::fmt;

/// Token types for condition expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Null,
    True,
    False,
    Number(f64),
    String(String),

    Identifier(String),

    // Operators
    Eq,  // ==
    Ne,  // !=
    Lt,  // <
    Le,  // <=
    Gt,  // >
    Ge,  // >=
    And, // && / and
    Or,  // || / or
    Not, // ! / not
    In,  // in
    Dot,
    Comma,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Null => write!(f, "null"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Number(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "'{}'", s),
            Token::Identifier(s) => write!(f, "{}", s),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::In => write!(f, "in"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Eof => write!(f, "end of expression"),
        }
    }
}

/// A token and the byte offset it starts at
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub position: usize,
}

#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

impl std::error::Error for LexError {}

pub struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            position: 0,
        }
    }

    /// Tokenize the entire input; the last token is always `Eof`
    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>, LexError> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(SpannedToken {
                token,
                position: self.position,
            });
            if done {
                break;
            }
        }

        Ok(tokens)
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();

        let Some(&(pos, ch)) = self.chars.peek() else {
            self.position = self.input.len();
            return Ok(Token::Eof);
        };

        self.position = pos;

        let single = match ch {
            '.' => Some(Token::Dot),
            ',' => Some(Token::Comma),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            _ => None,
        };
        if let Some(token) = single {
            self.advance();
            return Ok(token);
        }

        match ch {
            '=' => {
                self.advance();
                self.expect_char('=', Token::Eq, "expected '==' operator", pos)
            }
            '&' => {
                self.advance();
                self.expect_char('&', Token::And, "expected '&&' operator", pos)
            }
            '|' => {
                self.advance();
                self.expect_char('|', Token::Or, "expected '||' operator", pos)
            }
            '!' => {
                self.advance();
                Ok(self.with_optional_eq(Token::Ne, Token::Not))
            }
            '<' => {
                self.advance();
                Ok(self.with_optional_eq(Token::Le, Token::Lt))
            }
            '>' => {
                self.advance();
                Ok(self.with_optional_eq(Token::Ge, Token::Gt))
            }
            '\'' | '"' => self.read_string(ch),
            '-' | '0'..='9' => self.read_number(),
            c if c.is_alphabetic() || c == '_' => Ok(self.read_identifier()),
            _ => Err(LexError {
                message: format!("unexpected character '{}'", ch),
                position: pos,
            }),
        }
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        self.chars.next()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn expect_char(
        &mut self,
        expected: char,
        token: Token,
        message: &str,
        pos: usize,
    ) -> Result<Token, LexError> {
        if self.peek_char() == Some(expected) {
            self.advance();
            Ok(token)
        } else {
            Err(LexError {
                message: message.to_string(),
                position: pos,
            })
        }
    }

    fn with_optional_eq(&mut self, with_eq: Token, without: Token) -> Token {
        if self.peek_char() == Some('=') {
            self.advance();
            with_eq
        } else {
            without
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Quoted string; a doubled quote inside is a literal quote
    fn read_string(&mut self, quote: char) -> Result<Token, LexError> {
        let start = self.position;
        self.advance();

        let mut value = String::new();
        loop {
            match self.advance() {
                Some((_, c)) if c == quote => {
                    if self.peek_char() == Some(quote) {
                        value.push(quote);
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some((_, c)) => value.push(c),
                None => {
                    return Err(LexError {
                        message: "unterminated string".to_string(),
                        position: start,
                    });
                }
            }
        }

        Ok(Token::String(value))
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let start = self.position;
        let mut num_str = String::new();

        if self.peek_char() == Some('-') {
            num_str.push('-');
            self.advance();
        }

        self.take_digits(&mut num_str);

        // A '.' only continues the number when a digit follows it
        if self.peek_char() == Some('.') {
            let mut lookahead = self.chars.clone();
            lookahead.next();
            if matches!(lookahead.peek(), Some(&(_, c)) if c.is_ascii_digit()) {
                num_str.push('.');
                self.advance();
                self.take_digits(&mut num_str);
            }
        }

        num_str
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| LexError {
                message: format!("invalid number '{}'", num_str),
                position: start,
            })
    }

    fn take_digits(&mut self, out: &mut String) {
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_ascii_digit() {
                out.push(ch);
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();

        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match ident.to_lowercase().as_str() {
            "null" => Token::Null,
            "true" => Token::True,
            "false" => Token::False,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "in" => Token::In,
            _ => Token::Identifier(ident),
        }
    }
}

/// A segment of a string that may embed expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// `${{ expression }}`
    Expression(String),
    /// `$(name)`
    Macro(String),
    Text(String),
}

/// Split a string into text, `${{ }}` and `$(var)` segments
pub fn extract_segments(input: &str) -> Vec<Segment> {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut pos = 0;

    let flush = |text: &mut String, segments: &mut Vec<Segment>| {
        if !text.is_empty() {
            segments.push(Segment::Text(std::mem::take(text)));
        }
    };

    while pos < len {
        if chars[pos] == '$' && pos + 2 < len && chars[pos + 1] == '{' && chars[pos + 2] == '{' {
            if let Some(end) = find_expression_end(&chars, pos + 3) {
                flush(&mut text, &mut segments);
                let expr: String = chars[pos + 3..end].iter().collect();
                segments.push(Segment::Expression(expr.trim().to_string()));
                pos = end + 2;
                continue;
            }
        }

        if chars[pos] == '$' && pos + 1 < len && chars[pos + 1] == '(' {
            if let Some(end) = chars[pos + 2..].iter().position(|&c| c == ')') {
                let name: String = chars[pos + 2..pos + 2 + end].iter().collect();
                if is_macro_name(&name) {
                    flush(&mut text, &mut segments);
                    segments.push(Segment::Macro(name));
                    pos = pos + 2 + end + 1;
                    continue;
                }
            }
        }

        text.push(chars[pos]);
        pos += 1;
    }

    flush(&mut text, &mut segments);
    segments
}

/// Index of the `}}` closing an expression that starts at `start`,
/// ignoring braces inside quoted strings
fn find_expression_end(chars: &[char], start: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut i = start;

    while i < chars.len() {
        let ch = chars[i];
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None if ch == '}' && i + 1 < chars.len() && chars[i + 1] == '}' => return Some(i),
            None => {}
        }
        i += 1;
    }

    None
}

fn is_macro_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_operators_and_keywords() {
        assert_eq!(
            tokens("a == 'x' AND not b || c in ['y']"),
            vec![
                Token::Identifier("a".to_string()),
                Token::Eq,
                Token::String("x".to_string()),
                Token::And,
                Token::Not,
                Token::Identifier("b".to_string()),
                Token::Or,
                Token::Identifier("c".to_string()),
                Token::In,
                Token::LBracket,
                Token::String("y".to_string()),
                Token::RBracket,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_string_quotes() {
        assert_eq!(
            tokens(r#"'it''s' "say ""hi""""#),
            vec![
                Token::String("it's".to_string()),
                Token::String("say \"hi\"".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("3.12 -1 4."),
            vec![
                Token::Number(3.12),
                Token::Number(-1.0),
                Token::Number(4.0),
                Token::Dot,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_positions() {
        let spanned = Lexer::new("a  == b").tokenize().unwrap();
        assert_eq!(spanned[1].position, 3);
        assert_eq!(spanned[3].position, 7);
    }

    #[test]
    fn test_lex_errors() {
        assert!(Lexer::new("a = b").tokenize().is_err());
        assert!(Lexer::new("'open").tokenize().is_err());
        assert!(Lexer::new("a # b").tokenize().is_err());
    }

    #[test]
    fn test_extract_segments() {
        assert_eq!(
            extract_segments("build ${{ parameters.config }} on $(os)!"),
            vec![
                Segment::Text("build ".to_string()),
                Segment::Expression("parameters.config".to_string()),
                Segment::Text(" on ".to_string()),
                Segment::Macro("os".to_string()),
                Segment::Text("!".to_string()),
            ]
        );
    }

    #[test]
    fn test_extract_segments_unclosed() {
        assert_eq!(
            extract_segments("cost $(5 and ${{ open"),
            vec![Segment::Text("cost $(5 and ${{ open".to_string())]
        );
    }

    #[test]
    fn test_braces_inside_strings() {
        assert_eq!(
            extract_segments("${{ format('{0}}', 'x') }}"),
            vec![Segment::Expression("format('{0}}', 'x')".to_string())]
        );
    }
}
