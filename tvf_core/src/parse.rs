//! Text form of type descriptors, the inverse of their `Display` output.
//!
//! ```text
//! Int32
//! Array[Float64]
//! Struct{a: Int32, b: Array[Float64], `odd name`: String}
//! ```

use std::str::FromStr;

use crate::error::{Result, TvfError};
use crate::types::{Field, PrimitiveKind, TypeDescriptor, MAX_NESTING};

impl FromStr for TypeDescriptor {
    type Err = TvfError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parser = Parser { src: s, pos: 0 };
        let ty = parser.parse_type(1)?;
        parser.skip_ws();
        if parser.pos != s.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(ty)
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> TvfError {
        TvfError::TypeParse {
            position: self.pos,
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest().chars().next()
    }

    fn expect(&mut self, c: char) -> Result<()> {
        match self.peek() {
            Some(found) if found == c => {
                self.pos += c.len_utf8();
                Ok(())
            }
            Some(found) => Err(self.error(format!("expected `{c}`, found `{found}`"))),
            None => Err(self.error(format!("expected `{c}`, found end of input"))),
        }
    }

    fn ident(&mut self) -> Result<&'a str> {
        self.skip_ws();
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|&(i, c)| !(c.is_ascii_alphanumeric() || c == '_') || (i == 0 && c.is_ascii_digit()))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected identifier"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn field_name(&mut self) -> Result<String> {
        if self.peek() != Some('`') {
            return self.ident().map(str::to_string);
        }
        self.pos += 1;
        let mut name = String::new();
        loop {
            let mut chars = self.rest().chars();
            match chars.next() {
                None => return Err(self.error("unterminated quoted field name")),
                Some('`') if chars.next() == Some('`') => {
                    name.push('`');
                    self.pos += 2;
                }
                Some('`') => {
                    self.pos += 1;
                    return Ok(name);
                }
                Some(c) => {
                    name.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
    }

    fn parse_type(&mut self, depth: usize) -> Result<TypeDescriptor> {
        if depth > MAX_NESTING {
            return Err(self.error(format!("nesting deeper than {MAX_NESTING}")));
        }
        self.skip_ws();
        let start = self.pos;
        let name = self.ident()?;
        match name {
            "Array" => {
                self.expect('[')?;
                let elem = self.parse_type(depth + 1)?;
                self.expect(']')?;
                Ok(TypeDescriptor::array_of(elem))
            }
            "Struct" => {
                self.expect('{')?;
                let mut fields = Vec::new();
                while self.peek() != Some('}') {
                    let field_start = self.pos;
                    let field_name = self.field_name()?;
                    self.expect(':')?;
                    let ty = self.parse_type(depth + 1)?;
                    if fields.iter().any(|f: &Field| f.name() == field_name) {
                        self.pos = field_start;
                        return Err(self.error(format!("duplicate field `{field_name}`")));
                    }
                    fields.push(Field::new(field_name, ty));
                    if self.peek() == Some(',') {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                self.expect('}')?;
                TypeDescriptor::from_fields(fields)
            }
            other => PrimitiveKind::from_name(other)
                .map(TypeDescriptor::Primitive)
                .ok_or_else(|| {
                    self.pos = start;
                    self.error(format!("unknown type `{other}`"))
                }),
        }
    }
}
