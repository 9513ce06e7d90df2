//! Parser for the Python literal subset that recorded task arguments use:
//! `True`/`False`/`None`, integers, floats, quoted strings, lists, tuples and
//! dicts. Anything outside that subset is rejected so the caller keeps the
//! original string.

use serde_json::{Map, Number, Value};

/// Containers nested deeper than this are rejected rather than recursed into.
const MAX_DEPTH: usize = 100;

pub fn parse_python_literal(text: &str) -> Option<Value> {
    let trimmed = text.trim_start_matches(|c: char| c == ' ' || c == '\t');
    let mut parser = Parser {
        chars: trimmed.chars().collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos == parser.chars.len() {
        Some(value)
    } else {
        None
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Option<Value> {
        self.skip_ws();
        match self.peek()? {
            '\'' | '"' => self.string().map(Value::String),
            '[' => self.nested(|p| {
                p.pos += 1;
                p.sequence(']').map(Value::Array)
            }),
            '(' => self.nested(Self::parenthesized),
            '{' => self.nested(Self::dict),
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            c if c.is_alphabetic() || c == '_' => self.name(),
            _ => None,
        }
    }

    fn nested(&mut self, parse: impl FnOnce(&mut Self) -> Option<Value>) -> Option<Value> {
        if self.depth >= MAX_DEPTH {
            return None;
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn name(&mut self) -> Option<Value> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "True" => Some(Value::Bool(true)),
            "False" => Some(Value::Bool(false)),
            "None" => Some(Value::Null),
            _ => None,
        }
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.bump()?;
        let mut out = String::new();
        loop {
            match self.bump()? {
                c if c == quote => return Some(out),
                '\n' => return None,
                '\\' => {
                    let escaped = self.bump()?;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        '\\' => out.push('\\'),
                        '\'' => out.push('\''),
                        '"' => out.push('"'),
                        '\n' => {}
                        'x' => out.push(self.hex_escape(2)?),
                        'u' => out.push(self.hex_escape(4)?),
                        'U' => out.push(self.hex_escape(8)?),
                        other => {
                            out.push('\\');
                            out.push(other);
                        }
                    }
                }
                c => out.push(c),
            }
        }
    }

    fn hex_escape(&mut self, digits: usize) -> Option<char> {
        let mut code = 0u32;
        for _ in 0..digits {
            code = code * 16 + self.bump()?.to_digit(16)?;
        }
        char::from_u32(code)
    }

    fn sequence(&mut self, close: char) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Some(items);
            }
            items.push(self.value()?);
            if self.eat(',') {
                continue;
            }
            return if self.eat(close) { Some(items) } else { None };
        }
    }

    /// `(x)` is just `x`; `()` and `(x,)` are tuples, rendered as lists.
    fn parenthesized(&mut self) -> Option<Value> {
        self.pos += 1;
        if self.eat(')') {
            return Some(Value::Array(Vec::new()));
        }
        let first = self.value()?;
        if self.eat(')') {
            return Some(first);
        }
        if !self.eat(',') {
            return None;
        }
        let mut items = vec![first];
        items.extend(self.sequence(')')?);
        Some(Value::Array(items))
    }

    fn dict(&mut self) -> Option<Value> {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            if self.eat('}') {
                return Some(Value::Object(map));
            }
            let key = dict_key(self.value()?)?;
            // A set literal has no ':' and has no JSON form.
            if !self.eat(':') {
                return None;
            }
            let value = self.value()?;
            map.insert(key, value);
            if self.eat(',') {
                continue;
            }
            return if self.eat('}') {
                Some(Value::Object(map))
            } else {
                None
            };
        }
    }

    fn number(&mut self) -> Option<Value> {
        let mut negative = false;
        while let Some(sign @ ('-' | '+')) = self.peek() {
            if sign == '-' {
                negative = !negative;
            }
            self.pos += 1;
            self.skip_ws();
        }
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '+' || c == '-')
        {
            let c = self.chars[self.pos];
            if (c == '+' || c == '-')
                && !matches!(self.chars.get(self.pos.wrapping_sub(1)), Some('e' | 'E'))
            {
                break;
            }
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        let value = parse_number_token(&raw)?;
        if !negative {
            return Some(value);
        }
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Value::Number(Number::from(i.checked_neg()?)))
                } else if n.as_u64() == Some(i64::MAX as u64 + 1) {
                    Some(Value::Number(Number::from(i64::MIN)))
                } else if n.is_u64() {
                    None
                } else {
                    Number::from_f64(-n.as_f64()?).map(Value::Number)
                }
            }
            _ => None,
        }
    }
}

fn parse_number_token(raw: &str) -> Option<Value> {
    if raw.is_empty() || raw.starts_with('_') || raw.ends_with('_') || raw.contains("__") {
        return None;
    }
    let cleaned = raw.replace('_', "");
    let lower = cleaned.to_ascii_lowercase();
    for (prefix, radix) in [("0x", 16), ("0o", 8), ("0b", 2)] {
        if let Some(digits) = lower.strip_prefix(prefix) {
            return u64::from_str_radix(digits, radix)
                .ok()
                .map(|n| Value::Number(Number::from(n)));
        }
    }
    if lower.chars().all(|c| c.is_ascii_digit()) {
        // Python 3 rejects decimal literals with leading zeros like `007`.
        if lower.len() > 1 && lower.starts_with('0') && lower.chars().any(|c| c != '0') {
            return None;
        }
        return lower.parse::<u64>().ok().map(|n| Value::Number(Number::from(n)));
    }
    let looks_float = lower
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | '+' | '-'))
        && lower.chars().any(|c| c.is_ascii_digit());
    if !looks_float {
        return None;
    }
    let f: f64 = lower.parse().ok()?;
    if !f.is_finite() {
        return None;
    }
    Number::from_f64(f).map(Value::Number)
}

/// Dict keys become JSON object keys the way `json.dumps` renders them.
fn dict_key(key: Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".to_string()),
        _ => None,
    }
}
