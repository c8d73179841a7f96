use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Fn,
    Let,
    Mut,
    True,
    False,
    If,
    Else,
    Return,
    Macro,
    Ident,
    Int,
    Float,
    String,
    Assign,
    Plus,
    Minus,
    Bang,
    Star,
    Slash,
    Less,
    Greater,
    EqualEqual,
    BangEqual,
    Comma,
    Semicolon,
    Colon,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Pipe,
    Dollar,
    Illegal,
    UnterminatedString,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Fn => write!(f, "`fn`"),
            TokenKind::Let => write!(f, "`let`"),
            TokenKind::Mut => write!(f, "`mut`"),
            TokenKind::True => write!(f, "`true`"),
            TokenKind::False => write!(f, "`false`"),
            TokenKind::If => write!(f, "`if`"),
            TokenKind::Else => write!(f, "`else`"),
            TokenKind::Return => write!(f, "`return`"),
            TokenKind::Macro => write!(f, "`macro`"),
            TokenKind::Ident => write!(f, "identifier"),
            TokenKind::Int => write!(f, "integer"),
            TokenKind::Float => write!(f, "float"),
            TokenKind::String => write!(f, "string"),
            TokenKind::Assign => write!(f, "`=`"),
            TokenKind::Plus => write!(f, "`+`"),
            TokenKind::Minus => write!(f, "`-`"),
            TokenKind::Bang => write!(f, "`!`"),
            TokenKind::Star => write!(f, "`*`"),
            TokenKind::Slash => write!(f, "`/`"),
            TokenKind::Less => write!(f, "`<`"),
            TokenKind::Greater => write!(f, "`>`"),
            TokenKind::EqualEqual => write!(f, "`==`"),
            TokenKind::BangEqual => write!(f, "`!=`"),
            TokenKind::Comma => write!(f, "`,`"),
            TokenKind::Semicolon => write!(f, "`;`"),
            TokenKind::Colon => write!(f, "`:`"),
            TokenKind::LParen => write!(f, "`(`"),
            TokenKind::RParen => write!(f, "`)`"),
            TokenKind::LBrace => write!(f, "`{{`"),
            TokenKind::RBrace => write!(f, "`}}`"),
            TokenKind::LBracket => write!(f, "`[`"),
            TokenKind::RBracket => write!(f, "`]`"),
            TokenKind::Pipe => write!(f, "`|>`"),
            TokenKind::Dollar => write!(f, "`$`"),
            TokenKind::Illegal => write!(f, "illegal character"),
            TokenKind::UnterminatedString => write!(f, "unterminated string"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
    pub line: usize,
}

impl Token {
    fn new(kind: TokenKind, literal: impl Into<String>, line: usize) -> Self {
        Self {
            kind,
            literal: literal.into(),
            line,
        }
    }

    /// Human-readable form used in parse errors.
    pub fn describe(&self) -> String {
        match self.kind {
            TokenKind::Ident | TokenKind::Int | TokenKind::Float | TokenKind::Illegal => {
                format!("{} `{}`", self.kind, self.literal)
            }
            TokenKind::String => format!("string \"{}\"", self.literal),
            _ => self.kind.to_string(),
        }
    }
}

/// Single-pass lexer producing one token per call. Once the input is
/// exhausted every further call yields an `Eof` token.
#[derive(Clone)]
pub struct Lexer<'a> {
    chars: std::str::Chars<'a>,
    current: Option<char>,
    line: usize,
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut chars = source.chars();
        let current = chars.next();
        Self {
            chars,
            current,
            line: 1,
            finished: false,
        }
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();
        let line = self.line;
        let ch = match self.current {
            Some(ch) => ch,
            None => return Token::new(TokenKind::Eof, "", line),
        };
        match ch {
            '=' => {
                self.bump();
                if self.current == Some('=') {
                    self.bump();
                    Token::new(TokenKind::EqualEqual, "==", line)
                } else {
                    Token::new(TokenKind::Assign, "=", line)
                }
            }
            '!' => {
                self.bump();
                if self.current == Some('=') {
                    self.bump();
                    Token::new(TokenKind::BangEqual, "!=", line)
                } else {
                    Token::new(TokenKind::Bang, "!", line)
                }
            }
            '|' => {
                self.bump();
                if self.current == Some('>') {
                    self.bump();
                    Token::new(TokenKind::Pipe, "|>", line)
                } else {
                    Token::new(TokenKind::Illegal, "|", line)
                }
            }
            '"' => self.string_token(line),
            ch if ch.is_ascii_digit() => self.number_token(line),
            ch if is_ident_start(ch) => self.ident_or_keyword(line),
            ch => {
                self.bump();
                let kind = match ch {
                    '+' => TokenKind::Plus,
                    '-' => TokenKind::Minus,
                    '*' => TokenKind::Star,
                    '/' => TokenKind::Slash,
                    '<' => TokenKind::Less,
                    '>' => TokenKind::Greater,
                    ',' => TokenKind::Comma,
                    ';' => TokenKind::Semicolon,
                    ':' => TokenKind::Colon,
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '{' => TokenKind::LBrace,
                    '}' => TokenKind::RBrace,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    '$' => TokenKind::Dollar,
                    _ => TokenKind::Illegal,
                };
                Token::new(kind, ch.to_string(), line)
            }
        }
    }

    fn string_token(&mut self, line: usize) -> Token {
        self.bump();
        let mut value = String::new();
        loop {
            match self.current {
                Some('"') => {
                    self.bump();
                    return Token::new(TokenKind::String, value, line);
                }
                Some(ch) => {
                    if ch == '\n' {
                        self.line += 1;
                    }
                    value.push(ch);
                    self.bump();
                }
                None => return Token::new(TokenKind::UnterminatedString, value, line),
            }
        }
    }

    fn number_token(&mut self, line: usize) -> Token {
        let mut value = String::new();
        let mut has_dot = false;
        while let Some(ch) = self.current {
            if ch.is_ascii_digit() {
                value.push(ch);
                self.bump();
            } else if ch == '.' && !has_dot && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                has_dot = true;
                value.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        let kind = if has_dot {
            TokenKind::Float
        } else {
            TokenKind::Int
        };
        Token::new(kind, value, line)
    }

    fn ident_or_keyword(&mut self, line: usize) -> Token {
        let mut value = String::new();
        while let Some(ch) = self.current {
            if !is_ident_continue(ch) {
                break;
            }
            value.push(ch);
            self.bump();
        }
        let kind = match value.as_str() {
            "fn" => TokenKind::Fn,
            "let" => TokenKind::Let,
            "mut" => TokenKind::Mut,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "return" => TokenKind::Return,
            "macro" => TokenKind::Macro,
            _ => TokenKind::Ident,
        };
        Token::new(kind, value, line)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.current {
                Some('\n') => {
                    self.line += 1;
                    self.bump();
                }
                Some('\r') => {
                    if self.peek() != Some('\n') {
                        self.line += 1;
                    }
                    self.bump();
                }
                Some(ch) if ch.is_whitespace() => self.bump(),
                Some('/') if self.peek() == Some('/') => {
                    while let Some(ch) = self.current {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.clone().next()
    }

    fn bump(&mut self) {
        self.current = self.chars.next();
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.finished {
            return None;
        }
        let token = self.next_token();
        if token.kind == TokenKind::Eof {
            self.finished = true;
        }
        Some(token)
    }
}

fn is_ident_start(ch: char) -> bool {
    ch == '_' || ch.is_alphabetic()
}

fn is_ident_continue(ch: char) -> bool {
    ch == '_' || ch.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::{Lexer, TokenKind};

    #[test]
    fn lexes_tokens_with_lines() {
        let source = "let five = 5;\nlet add = fn(x, y) {\n  x + y;\n};\n!-/*5;\n5 < 10 > 5;\n10 == 10; 10 != 9;\n\"foo bar\" [1, 2]; {\"a\": 1}\n$do(); getName() |> greet(\"hello\");\n1.5; let mut z = 1;\n";
        let expected = [
            (TokenKind::Let, "let", 1),
            (TokenKind::Ident, "five", 1),
            (TokenKind::Assign, "=", 1),
            (TokenKind::Int, "5", 1),
            (TokenKind::Semicolon, ";", 1),
            (TokenKind::Let, "let", 2),
            (TokenKind::Ident, "add", 2),
            (TokenKind::Assign, "=", 2),
            (TokenKind::Fn, "fn", 2),
            (TokenKind::LParen, "(", 2),
            (TokenKind::Ident, "x", 2),
            (TokenKind::Comma, ",", 2),
            (TokenKind::Ident, "y", 2),
            (TokenKind::RParen, ")", 2),
            (TokenKind::LBrace, "{", 2),
            (TokenKind::Ident, "x", 3),
            (TokenKind::Plus, "+", 3),
            (TokenKind::Ident, "y", 3),
            (TokenKind::Semicolon, ";", 3),
            (TokenKind::RBrace, "}", 4),
            (TokenKind::Semicolon, ";", 4),
            (TokenKind::Bang, "!", 5),
            (TokenKind::Minus, "-", 5),
            (TokenKind::Slash, "/", 5),
            (TokenKind::Star, "*", 5),
            (TokenKind::Int, "5", 5),
            (TokenKind::Semicolon, ";", 5),
            (TokenKind::Int, "5", 6),
            (TokenKind::Less, "<", 6),
            (TokenKind::Int, "10", 6),
            (TokenKind::Greater, ">", 6),
            (TokenKind::Int, "5", 6),
            (TokenKind::Semicolon, ";", 6),
            (TokenKind::Int, "10", 7),
            (TokenKind::EqualEqual, "==", 7),
            (TokenKind::Int, "10", 7),
            (TokenKind::Semicolon, ";", 7),
            (TokenKind::Int, "10", 7),
            (TokenKind::BangEqual, "!=", 7),
            (TokenKind::Int, "9", 7),
            (TokenKind::Semicolon, ";", 7),
            (TokenKind::String, "foo bar", 8),
            (TokenKind::LBracket, "[", 8),
            (TokenKind::Int, "1", 8),
            (TokenKind::Comma, ",", 8),
            (TokenKind::Int, "2", 8),
            (TokenKind::RBracket, "]", 8),
            (TokenKind::Semicolon, ";", 8),
            (TokenKind::LBrace, "{", 8),
            (TokenKind::String, "a", 8),
            (TokenKind::Colon, ":", 8),
            (TokenKind::Int, "1", 8),
            (TokenKind::RBrace, "}", 8),
            (TokenKind::Dollar, "$", 9),
            (TokenKind::Ident, "do", 9),
            (TokenKind::LParen, "(", 9),
            (TokenKind::RParen, ")", 9),
            (TokenKind::Semicolon, ";", 9),
            (TokenKind::Ident, "getName", 9),
            (TokenKind::LParen, "(", 9),
            (TokenKind::RParen, ")", 9),
            (TokenKind::Pipe, "|>", 9),
            (TokenKind::Ident, "greet", 9),
            (TokenKind::LParen, "(", 9),
            (TokenKind::String, "hello", 9),
            (TokenKind::RParen, ")", 9),
            (TokenKind::Semicolon, ";", 9),
            (TokenKind::Float, "1.5", 10),
            (TokenKind::Semicolon, ";", 10),
            (TokenKind::Let, "let", 10),
            (TokenKind::Mut, "mut", 10),
            (TokenKind::Ident, "z", 10),
            (TokenKind::Assign, "=", 10),
            (TokenKind::Int, "1", 10),
            (TokenKind::Semicolon, ";", 10),
            (TokenKind::Eof, "", 11),
        ];

        let mut lexer = Lexer::new(source);
        for (index, (kind, literal, line)) in expected.iter().enumerate() {
            let token = lexer.next_token();
            assert_eq!(token.kind, *kind, "token {index}");
            assert_eq!(token.literal, *literal, "token {index}");
            assert_eq!(token.line, *line, "token {index}");
        }
    }

    #[test]
    fn unicode_identifiers_and_strings() {
        let tokens: Vec<_> = Lexer::new("let 汉字 = \"かんじ\";").collect();
        assert_eq!(tokens[1].kind, TokenKind::Ident);
        assert_eq!(tokens[1].literal, "汉字");
        assert_eq!(tokens[3].kind, TokenKind::String);
        assert_eq!(tokens[3].literal, "かんじ");
    }

    #[test]
    fn iterator_stops_after_eof() {
        let tokens: Vec<_> = Lexer::new("1 // trailing comment").collect();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].kind, TokenKind::Eof);
    }

    #[test]
    fn crlf_counts_one_line() {
        let mut lexer = Lexer::new("a\r\nb");
        assert_eq!(lexer.next_token().line, 1);
        assert_eq!(lexer.next_token().line, 2);
    }

    #[test]
    fn flags_unterminated_strings_and_lone_bar() {
        let mut lexer = Lexer::new("| \"open");
        assert_eq!(lexer.next_token().kind, TokenKind::Illegal);
        let token = lexer.next_token();
        assert_eq!(token.kind, TokenKind::UnterminatedString);
        assert_eq!(token.literal, "open");
    }
}
