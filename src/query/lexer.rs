//! GQL 词法分析
//!
//! 每个词法单元记录起止字节偏移以及前面是否有空白，
//! 语法层用它判断 `name:lang#hash`、`Type#hash` 这类必须紧邻的写法。

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// 标识符，可以 `_` 开头
    Ident(String),
    /// `#name`，含 `#`
    Hash(String),
    Number(String),
    /// 已去掉引号与转义的字符串
    Str(String),
    Placeholder,
    /// 由 `= ! < > * + / -` 组成的运算符串
    Op(String),
    LParen,
    RParen,
    Comma,
    Dot,
    At,
    Colon,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    /// 前面是否有空白
    pub spaced: bool,
}

impl Token {
    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.ident().map_or(false, |s| s.eq_ignore_ascii_case(keyword))
    }
}

fn is_op_char(c: char) -> bool {
    matches!(c, '=' | '!' | '<' | '>' | '*' | '+' | '/' | '-')
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// 语法错误，附带出错位置附近的原文
pub fn syntax_error(text: &str, position: usize, message: &str) -> Error {
    Error::SyntaxError {
        message: message.to_string(),
        position,
        near: near_text(text, position),
    }
}

/// 出错位置起 20 个字符；离结尾不足 10 个字符时从结尾前 10 个字符开始
pub fn near_text(text: &str, position: usize) -> String {
    let len = text.len();
    let position = position.min(len);
    let mut start = if len - position < 10 {
        len.saturating_sub(10)
    } else {
        position
    };
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    text[start..].chars().take(20).collect()
}

struct Lexer<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.text[self.pos..].chars().nth(1)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.text[start..self.pos]
    }

    fn number(&mut self) -> String {
        let mut s = self.take_while(|c| c.is_ascii_digit()).to_string();
        if self.peek() == Some('.') && self.peek_second().map_or(false, |c| c.is_ascii_digit()) {
            self.pos += 1;
            s.push('.');
            s.push_str(self.take_while(|c| c.is_ascii_digit()));
        }
        s
    }

    fn string(&mut self, quote: char) -> Result<String> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();
        while let Some(c) = self.peek() {
            self.pos += c.len_utf8();
            match c {
                '\\' => {
                    if let Some(escaped) = self.peek() {
                        self.pos += escaped.len_utf8();
                        value.push(escaped);
                    }
                }
                c if c == quote => return Ok(value),
                c => value.push(c),
            }
        }
        Err(syntax_error(self.text, start, "字符串没有结束"))
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        let before = self.pos;
        self.take_while(char::is_whitespace);
        let spaced = self.pos > before;
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(None);
        };
        let kind = match c {
            '(' | ')' | ',' | '@' | ':' | '?' => {
                self.pos += 1;
                match c {
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    ',' => TokenKind::Comma,
                    '@' => TokenKind::At,
                    ':' => TokenKind::Colon,
                    _ => TokenKind::Placeholder,
                }
            }
            '.' if self.peek_second().map_or(false, |c| c.is_ascii_digit()) => {
                TokenKind::Number(self.number())
            }
            '.' => {
                self.pos += 1;
                TokenKind::Dot
            }
            '#' => {
                self.pos += 1;
                if !self.peek().map_or(false, is_ident_start) {
                    return Err(syntax_error(self.text, start, "'#' 之后需要变量名"));
                }
                let name = self.take_while(is_ident_char);
                TokenKind::Hash(format!("#{}", name))
            }
            '\'' | '"' => TokenKind::Str(self.string(c)?),
            c if c.is_ascii_digit() => TokenKind::Number(self.number()),
            c if is_op_char(c) => TokenKind::Op(self.take_while(is_op_char).to_string()),
            c if is_ident_start(c) => TokenKind::Ident(self.take_while(is_ident_char).to_string()),
            _ => return Err(syntax_error(self.text, start, "无法识别的字符")),
        };
        Ok(Some(Token {
            kind,
            start,
            end: self.pos,
            spaced,
        }))
    }
}

/// 把查询文本切分为词法单元
pub fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer { text, pos: 0 };
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}
