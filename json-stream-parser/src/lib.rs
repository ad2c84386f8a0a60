//! Incremental JSON parser fed with arbitrary byte chunks.
//!
//! The parser never needs the whole document at once: callers push chunks as
//! they arrive (`JsonStreamParser::feed`) and ask for the value with
//! `JsonStreamParser::finish` once the source is exhausted. Raw bytes are only
//! buffered for the scalar token currently being read (a string, number or
//! literal); containers are built in place on an explicit stack, so nesting
//! depth does not consume call stack. Nesting is still capped at
//! [`MAX_DEPTH`], the same bound `serde_json` enforces, since the finished
//! `Value` is dropped and serialized recursively.
#![allow(clippy::missing_docs_in_private_items)]

use serde_json::{Map, Value};
use thiserror::Error;

/// Deepest container nesting a document may use.
pub const MAX_DEPTH: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no JSON value found before end of input")]
    Empty,
    #[error("unexpected end of input inside {0}")]
    UnexpectedEnd(&'static str),
    #[error("unexpected character {found:?} at byte {offset}")]
    UnexpectedCharacter { found: char, offset: u64 },
    #[error("control character in string at byte {offset}")]
    ControlCharacter { offset: u64 },
    #[error("invalid escape sequence at byte {offset}")]
    InvalidEscape { offset: u64 },
    #[error("invalid number {literal:?} ending at byte {offset}")]
    InvalidNumber { literal: String, offset: u64 },
    #[error("invalid UTF-8 in string ending at byte {offset}")]
    InvalidUtf8 { offset: u64 },
    #[error("trailing content after top-level value at byte {offset}")]
    TrailingContent { offset: u64 },
    #[error("nesting deeper than 128 containers at byte {offset}")]
    DepthLimit { offset: u64 },
}

/// What to do when a stream holds more than one top-level value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MultipleValues {
    /// Anything but whitespace after the first value is a `ParseError`.
    #[default]
    Reject,
    /// Stop at the end of the first value and ignore the rest of the stream.
    KeepFirst,
}

/// Outcome of a single `feed` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    NeedMore,
    /// The first value is complete and the policy says to stop reading.
    Complete,
}

#[derive(Debug)]
enum Container {
    Array(Vec<Value>),
    Object {
        map: Map<String, Value>,
        key: Option<String>,
    },
}

impl Container {
    fn describe(&self) -> &'static str {
        match self {
            Container::Array(_) => "array",
            Container::Object { .. } => "object",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    ArrayFirst,
    ObjectFirst,
    Key,
    Colon,
    Comma,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    Backslash,
    Unicode { digits: u8, code: u32 },
}

#[derive(Debug)]
struct StringToken {
    buf: Vec<u8>,
    escape: Escape,
    high_surrogate: Option<u32>,
    is_key: bool,
}

#[derive(Debug, Default)]
enum Token {
    #[default]
    None,
    Str(StringToken),
    Num(Vec<u8>),
    Literal {
        rest: &'static [u8],
        value: Value,
    },
}

#[derive(Debug)]
pub struct JsonStreamParser {
    policy: MultipleValues,
    stack: Vec<Container>,
    expect: Expect,
    token: Token,
    result: Option<Value>,
    failed: Option<ParseError>,
    offset: u64,
}

impl Default for JsonStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonStreamParser {
    pub fn new() -> JsonStreamParser {
        Self::with_policy(MultipleValues::default())
    }

    pub fn with_policy(policy: MultipleValues) -> JsonStreamParser {
        JsonStreamParser {
            policy,
            stack: Vec::new(),
            expect: Expect::Value,
            token: Token::None,
            result: None,
            failed: None,
            offset: 0,
        }
    }

    /// Pushes the next chunk of the stream through the parser.
    ///
    /// Once an error is returned the parser is poisoned and every later call
    /// returns the same error.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<FeedStatus, ParseError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        for &byte in chunk {
            if self.is_complete() {
                return Ok(FeedStatus::Complete);
            }
            if let Err(err) = self.push_byte(byte) {
                self.failed = Some(err.clone());
                return Err(err);
            }
            self.offset = self.offset.saturating_add(1);
        }
        if self.is_complete() {
            Ok(FeedStatus::Complete)
        } else {
            Ok(FeedStatus::NeedMore)
        }
    }

    /// True when the first value is done and no more input will be consumed.
    pub fn is_complete(&self) -> bool {
        self.policy == MultipleValues::KeepFirst && self.expect == Expect::Done
    }

    /// Current container nesting depth.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn bytes_consumed(&self) -> u64 {
        self.offset
    }

    /// Signals end of stream and returns the top-level value.
    pub fn finish(mut self) -> Result<Value, ParseError> {
        if let Some(err) = self.failed.take() {
            return Err(err);
        }
        match std::mem::take(&mut self.token) {
            Token::None => {}
            Token::Num(literal) => self.finish_number(literal)?,
            Token::Str(_) => return Err(ParseError::UnexpectedEnd("string")),
            Token::Literal { .. } => return Err(ParseError::UnexpectedEnd("literal")),
        }
        if let Some(open) = self.stack.last() {
            return Err(ParseError::UnexpectedEnd(open.describe()));
        }
        self.result.ok_or(ParseError::Empty)
    }

    fn unexpected(&self, byte: u8) -> ParseError {
        ParseError::UnexpectedCharacter {
            found: char::from(byte),
            offset: self.offset,
        }
    }

    fn push_byte(&mut self, byte: u8) -> Result<(), ParseError> {
        match std::mem::take(&mut self.token) {
            Token::None => self.structural(byte),
            Token::Str(token) => self.push_string_byte(token, byte),
            Token::Num(mut literal) => {
                if matches!(byte, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') {
                    literal.push(byte);
                    self.token = Token::Num(literal);
                    return Ok(());
                }
                self.finish_number(literal)?;
                if self.is_complete() {
                    return Ok(());
                }
                self.structural(byte)
            }
            Token::Literal { rest, value } => match rest.split_first() {
                Some((&next, remaining)) if next == byte => {
                    if remaining.is_empty() {
                        self.emit(value)
                    } else {
                        self.token = Token::Literal {
                            rest: remaining,
                            value,
                        };
                        Ok(())
                    }
                }
                _ => Err(self.unexpected(byte)),
            },
        }
    }

    fn structural(&mut self, byte: u8) -> Result<(), ParseError> {
        if matches!(byte, b' ' | b'\n' | b'\r' | b'\t') {
            return Ok(());
        }
        match self.expect {
            Expect::Done => Err(ParseError::TrailingContent {
                offset: self.offset,
            }),
            Expect::ArrayFirst if byte == b']' => self.close(byte),
            Expect::Value | Expect::ArrayFirst => self.begin_value(byte),
            Expect::ObjectFirst if byte == b'}' => self.close(byte),
            Expect::ObjectFirst | Expect::Key => {
                if byte != b'"' {
                    return Err(self.unexpected(byte));
                }
                self.token = Token::Str(StringToken {
                    buf: Vec::new(),
                    escape: Escape::None,
                    high_surrogate: None,
                    is_key: true,
                });
                Ok(())
            }
            Expect::Colon => {
                if byte != b':' {
                    return Err(self.unexpected(byte));
                }
                self.expect = Expect::Value;
                Ok(())
            }
            Expect::Comma => match (byte, self.stack.last()) {
                (b',', Some(Container::Array(_))) => {
                    self.expect = Expect::Value;
                    Ok(())
                }
                (b',', Some(Container::Object { .. })) => {
                    self.expect = Expect::Key;
                    Ok(())
                }
                (b']' | b'}', Some(_)) => self.close(byte),
                _ => Err(self.unexpected(byte)),
            },
        }
    }

    fn begin_value(&mut self, byte: u8) -> Result<(), ParseError> {
        if matches!(byte, b'{' | b'[') && self.stack.len() >= MAX_DEPTH {
            return Err(ParseError::DepthLimit {
                offset: self.offset,
            });
        }
        match byte {
            b'{' => {
                self.stack.push(Container::Object {
                    map: Map::new(),
                    key: None,
                });
                self.expect = Expect::ObjectFirst;
            }
            b'[' => {
                self.stack.push(Container::Array(Vec::new()));
                self.expect = Expect::ArrayFirst;
            }
            b'"' => {
                self.token = Token::Str(StringToken {
                    buf: Vec::new(),
                    escape: Escape::None,
                    high_surrogate: None,
                    is_key: false,
                });
            }
            b'-' | b'0'..=b'9' => self.token = Token::Num(vec![byte]),
            b't' => {
                self.token = Token::Literal {
                    rest: b"rue",
                    value: Value::Bool(true),
                }
            }
            b'f' => {
                self.token = Token::Literal {
                    rest: b"alse",
                    value: Value::Bool(false),
                }
            }
            b'n' => {
                self.token = Token::Literal {
                    rest: b"ull",
                    value: Value::Null,
                }
            }
            _ => return Err(self.unexpected(byte)),
        }
        Ok(())
    }

    fn close(&mut self, byte: u8) -> Result<(), ParseError> {
        let value = match (byte, self.stack.pop()) {
            (b']', Some(Container::Array(items))) => Value::Array(items),
            (b'}', Some(Container::Object { map, key: None })) => Value::Object(map),
            (_, popped) => {
                if let Some(container) = popped {
                    self.stack.push(container);
                }
                return Err(self.unexpected(byte));
            }
        };
        self.emit(value)
    }

    fn emit(&mut self, value: Value) -> Result<(), ParseError> {
        match self.stack.last_mut() {
            None => {
                self.result = Some(value);
                self.expect = Expect::Done;
            }
            Some(Container::Array(items)) => {
                items.push(value);
                self.expect = Expect::Comma;
            }
            Some(Container::Object { map, key }) => {
                let Some(key) = key.take() else {
                    return Err(ParseError::UnexpectedCharacter {
                        found: ':',
                        offset: self.offset,
                    });
                };
                map.insert(key, value);
                self.expect = Expect::Comma;
            }
        }
        Ok(())
    }

    fn finish_number(&mut self, literal: Vec<u8>) -> Result<(), ParseError> {
        // serde_json owns the number grammar so both paths agree on every literal.
        match serde_json::from_slice::<Value>(&literal) {
            Ok(number @ Value::Number(_)) => self.emit(number),
            _ => Err(ParseError::InvalidNumber {
                literal: String::from_utf8_lossy(&literal).into_owned(),
                offset: self.offset,
            }),
        }
    }

    fn push_string_byte(&mut self, mut token: StringToken, byte: u8) -> Result<(), ParseError> {
        let offset = self.offset;
        let invalid_escape = ParseError::InvalidEscape { offset };
        match token.escape {
            Escape::None => match byte {
                b'"' => {
                    if token.high_surrogate.is_some() {
                        return Err(invalid_escape);
                    }
                    return self.finish_string(token);
                }
                b'\\' => token.escape = Escape::Backslash,
                0x00..=0x1f => return Err(ParseError::ControlCharacter { offset }),
                _ => {
                    if token.high_surrogate.is_some() {
                        return Err(invalid_escape);
                    }
                    token.buf.push(byte);
                }
            },
            Escape::Backslash => {
                if token.high_surrogate.is_some() && byte != b'u' {
                    return Err(invalid_escape);
                }
                let unescaped = match byte {
                    b'"' => b'"',
                    b'\\' => b'\\',
                    b'/' => b'/',
                    b'b' => 0x08,
                    b'f' => 0x0c,
                    b'n' => b'\n',
                    b'r' => b'\r',
                    b't' => b'\t',
                    b'u' => {
                        token.escape = Escape::Unicode { digits: 0, code: 0 };
                        self.token = Token::Str(token);
                        return Ok(());
                    }
                    _ => return Err(invalid_escape),
                };
                token.buf.push(unescaped);
                token.escape = Escape::None;
            }
            Escape::Unicode { digits, code } => {
                let digit = char::from(byte).to_digit(16).ok_or(invalid_escape.clone())?;
                let code = (code << 4) | digit;
                if digits < 3 {
                    token.escape = Escape::Unicode {
                        digits: digits.saturating_add(1),
                        code,
                    };
                } else {
                    token.escape = Escape::None;
                    push_code_point(&mut token, code).ok_or(invalid_escape)?;
                }
            }
        }
        self.token = Token::Str(token);
        Ok(())
    }

    fn finish_string(&mut self, token: StringToken) -> Result<(), ParseError> {
        let text = String::from_utf8(token.buf).map_err(|_| ParseError::InvalidUtf8 {
            offset: self.offset,
        })?;
        if !token.is_key {
            return self.emit(Value::String(text));
        }
        match self.stack.last_mut() {
            Some(Container::Object { key, .. }) => {
                *key = Some(text);
                self.expect = Expect::Colon;
                Ok(())
            }
            _ => Err(ParseError::UnexpectedCharacter {
                found: '"',
                offset: self.offset,
            }),
        }
    }
}

/// Appends a `\uXXXX` escape, pairing UTF-16 surrogates. `None` on a lone surrogate.
fn push_code_point(token: &mut StringToken, code: u32) -> Option<()> {
    let scalar = match (code, token.high_surrogate.take()) {
        (0xD800..=0xDBFF, None) => {
            token.high_surrogate = Some(code);
            return Some(());
        }
        (0xDC00..=0xDFFF, Some(high)) => {
            0x10000 + ((high - 0xD800) << 10) + (code - 0xDC00)
        }
        (0xD800..=0xDFFF, _) | (_, Some(_)) => return None,
        (code, None) => code,
    };
    let ch = char::from_u32(scalar)?;
    let mut encoded = [0_u8; 4];
    token
        .buf
        .extend_from_slice(ch.encode_utf8(&mut encoded).as_bytes());
    Some(())
}

/// Parses a complete in-memory document, rejecting trailing values.
pub fn parse_stream(json_string: &str) -> Result<Value, ParseError> {
    parse_chunks([json_string.as_bytes()], MultipleValues::Reject)
}

/// Parses a sequence of chunks with the given multiple-value policy.
pub fn parse_chunks<I, B>(chunks: I, policy: MultipleValues) -> Result<Value, ParseError>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut parser = JsonStreamParser::with_policy(policy);
    for chunk in chunks {
        if parser.feed(chunk.as_ref())? == FeedStatus::Complete {
            break;
        }
    }
    parser.finish()
}
