//! 查询串字面量解析。
//!
//! # 教案式说明
//! - **意图（Why）**：查询串只能携带文本，`?a=1&b=[1, 2]` 这类值需要还原成数字、布尔、列表、映射、元组；
//! - **语法（What）**：整数、浮点（含指数形式）、`True`/`False`/`None` 以及 `true`/`false`/`null`、
//!   单/双引号字符串、`[..]` 列表、`(..)` 元组（`(x,)` 为单元素元组）、`{k: v}` 映射；容器允许尾随逗号；
//! - **契约（How）**：整段输入必须恰好构成一个字面量，否则返回 `None`，由调用方保留原始文本；
//!   映射键若不是字符串，以其字面量文本作为键；
//! - **风险提示（Trade-offs）**：嵌套深度受 [`MAX_DEPTH`] 限制，超出视为解析失败。

use spark_rpc_core::{Map, Value};

/// 容器嵌套上限。
pub const MAX_DEPTH: usize = 64;

/// 把整段文本解析为一个字面量。
///
/// ```
/// use spark_rpc_core::Value;
/// use spark_rpc_router::parse_literal;
///
/// assert_eq!(parse_literal("42"), Some(Value::Int(42)));
/// assert_eq!(parse_literal("(1,)"), Some(Value::Tuple(vec![Value::Int(1)])));
/// assert_eq!(parse_literal("hello"), None);
/// ```
pub fn parse_literal(text: &str) -> Option<Value> {
    let mut parser = LiteralParser {
        input: text.as_bytes(),
        text,
        pos: 0,
    };
    let value = parser.value(0)?;
    parser.skip_ws();
    (parser.pos == parser.input.len()).then_some(value)
}

struct LiteralParser<'a> {
    input: &'a [u8],
    text: &'a str,
    pos: usize,
}

impl LiteralParser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, byte: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn value(&mut self, depth: usize) -> Option<Value> {
        if depth > MAX_DEPTH {
            return None;
        }
        self.skip_ws();
        match self.peek()? {
            b'[' => {
                self.pos += 1;
                self.sequence(b']', depth).map(|(items, _)| Value::List(items))
            }
            b'(' => {
                self.pos += 1;
                let (items, trailing_comma) = self.sequence(b')', depth)?;
                // `(x)` 只是带括号的表达式。
                if items.len() == 1 && !trailing_comma {
                    items.into_iter().next()
                } else {
                    Some(Value::Tuple(items))
                }
            }
            b'{' => {
                self.pos += 1;
                self.mapping(depth)
            }
            b'"' | b'\'' => self.string().map(Value::Str),
            b'-' | b'+' | b'.' | b'0'..=b'9' => self.number(),
            _ => self.word(),
        }
    }

    fn sequence(&mut self, close: u8, depth: usize) -> Option<(Vec<Value>, bool)> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            if self.eat(close) {
                return Some((items, trailing_comma));
            }
            items.push(self.value(depth + 1)?);
            trailing_comma = self.eat(b',');
            if !trailing_comma {
                return self.eat(close).then_some((items, false));
            }
        }
    }

    fn mapping(&mut self, depth: usize) -> Option<Value> {
        let mut map = Map::new();
        loop {
            if self.eat(b'}') {
                return Some(Value::Map(map));
            }
            let key = match self.value(depth + 1)? {
                Value::Str(text) => text,
                other => other.to_string(),
            };
            if !self.eat(b':') {
                return None;
            }
            let value = self.value(depth + 1)?;
            map.insert(key, value);
            if !self.eat(b',') {
                return self.eat(b'}').then_some(Value::Map(map));
            }
        }
    }

    fn word(&mut self) -> Option<Value> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
        }
        match &self.text[start..self.pos] {
            "True" | "true" => Some(Value::Bool(true)),
            "False" | "false" => Some(Value::Bool(false)),
            "None" | "null" => Some(Value::Null),
            _ => None,
        }
    }

    fn number(&mut self) -> Option<Value> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'-' | b'+')) {
            self.pos += 1;
        }
        let mut is_float = false;
        while let Some(byte) = self.peek() {
            match byte {
                b'0'..=b'9' => {}
                b'.' => is_float = true,
                b'e' | b'E' => {
                    is_float = true;
                    if matches!(self.input.get(self.pos + 1), Some(b'-' | b'+')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
            self.pos += 1;
        }
        let token = &self.text[start..self.pos];
        if !token.bytes().any(|b| b.is_ascii_digit()) {
            return None;
        }
        if is_float {
            return token.parse::<f64>().ok().map(Value::Float);
        }
        match token.parse::<i64>() {
            Ok(value) => Some(Value::Int(value)),
            // 超出 64 位的整数退化为浮点。
            Err(_) => token.parse::<f64>().ok().map(Value::Float),
        }
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.peek()?;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let rest = self.text.get(self.pos..)?;
            let ch = rest.chars().next()?;
            self.pos += ch.len_utf8();
            match ch {
                c if c as u32 == u32::from(quote) => return Some(out),
                '\\' => out.push(self.escape()?),
                c => out.push(c),
            }
        }
    }

    fn escape(&mut self) -> Option<char> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(match byte {
            b'n' => '\n',
            b't' => '\t',
            b'r' => '\r',
            b'0' => '\0',
            b'\\' => '\\',
            b'\'' => '\'',
            b'"' => '"',
            b'x' => self.hex_escape(2)?,
            b'u' if self.peek() == Some(b'{') => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
                    self.pos += 1;
                }
                let code = u32::from_str_radix(&self.text[start..self.pos], 16).ok()?;
                if self.peek() != Some(b'}') {
                    return None;
                }
                self.pos += 1;
                char::from_u32(code)?
            }
            b'u' => self.hex_escape(4)?,
            _ => return None,
        })
    }

    fn hex_escape(&mut self, digits: usize) -> Option<char> {
        let hex = self.text.get(self.pos..self.pos + digits)?;
        let code = u32::from_str_radix(hex, 16).ok()?;
        self.pos += digits;
        char::from_u32(code)
    }
}
