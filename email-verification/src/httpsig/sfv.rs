//! RFC 8941 Structured Field Values, the subset HTTP signatures need.
//!
//! Parses and serializes Dictionaries, Inner Lists, Items and Parameters
//! with Integer, Decimal, String, Token, Byte Sequence and Boolean bare
//! items. Any syntax error is an [`EvpError::TokenFormat`]; nothing is
//! silently skipped.
//!
//! # Examples
//!
//! ```
//! use email_verification::httpsig::sfv::{BareItem, Member, parse_dictionary};
//!
//! let dict = parse_dictionary(r#"sig=("@method" "@path");created=1618884473"#).unwrap();
//! let Some(Member::InnerList(list)) = dict.get("sig") else { panic!("inner list") };
//!
//! assert_eq!(list.items.len(), 2);
//! assert_eq!(list.param("created"), Some(&BareItem::Integer(1_618_884_473)));
//! ```

use std::fmt::Write;

use crate::{
    crypto::{base64_decode, base64_encode},
    error::{EvpError, Result},
};

const MAX_INTEGER: i64 = 999_999_999_999_999;

/// A bare item value.
#[derive(Debug, Clone, PartialEq)]
pub enum BareItem {
    /// `-?[0-9]{1,15}`
    Integer(i64),
    /// `-?[0-9]{1,12}.[0-9]{1,3}`
    Decimal(f64),
    /// Quoted string of printable ASCII.
    String(String),
    /// Unquoted token.
    Token(String),
    /// `:base64:`
    ByteSeq(Vec<u8>),
    /// `?0` / `?1`
    Boolean(bool),
}

impl BareItem {
    /// Returns the string value of a String item.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the token value of a Token item.
    #[must_use]
    pub fn as_token(&self) -> Option<&str> {
        match self {
            Self::Token(t) => Some(t),
            _ => None,
        }
    }

    /// Returns the value of an Integer item.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the bytes of a Byte Sequence item.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::ByteSeq(b) => Some(b),
            _ => None,
        }
    }
}

/// Ordered parameters attached to an item or inner list.
pub type Parameters = Vec<(String, BareItem)>;

fn find_param<'a>(params: &'a Parameters, key: &str) -> Option<&'a BareItem> {
    params.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

/// A bare item with parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Value.
    pub bare: BareItem,
    /// Parameters.
    pub params: Parameters,
}

impl Item {
    /// Creates an item without parameters.
    #[must_use]
    pub const fn new(bare: BareItem) -> Self {
        Self { bare, params: Vec::new() }
    }

    /// Looks up a parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&BareItem> {
        find_param(&self.params, key)
    }
}

/// A parenthesized list of items with parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InnerList {
    /// Items in order.
    pub items: Vec<Item>,
    /// Parameters of the list itself.
    pub params: Parameters,
}

impl InnerList {
    /// Looks up a parameter of the list.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&BareItem> {
        find_param(&self.params, key)
    }
}

/// A dictionary member value.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    /// Single item.
    Item(Item),
    /// Inner list.
    InnerList(InnerList),
}

/// An ordered dictionary. A repeated key overwrites the earlier value in
/// place.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dictionary {
    members: Vec<(String, Member)>,
}

impl Dictionary {
    /// Creates an empty dictionary.
    #[must_use]
    pub const fn new() -> Self {
        Self { members: Vec::new() }
    }

    /// Inserts or replaces `key`.
    pub fn insert(&mut self, key: &str, member: Member) {
        if let Some(slot) = self.members.iter_mut().find(|(k, _)| k == key) {
            slot.1 = member;
        } else {
            self.members.push((key.to_owned(), member));
        }
    }

    /// Looks up `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Member> {
        self.members.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns the number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if there are no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Iterates members in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Member)> {
        self.members.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Parses a Dictionary header value.
///
/// # Errors
///
/// Returns [`EvpError::TokenFormat`] on any syntax error.
pub fn parse_dictionary(input: &str) -> Result<Dictionary> {
    let mut parser = Parser::new(input);
    parser.skip_sp();
    let mut dict = Dictionary::new();
    if parser.at_end() {
        return Ok(dict);
    }
    loop {
        let key = parser.parse_key()?;
        let member = if parser.eat(b'=') {
            parser.parse_item_or_inner_list()?
        } else {
            Member::Item(Item { bare: BareItem::Boolean(true), params: parser.parse_parameters()? })
        };
        dict.insert(&key, member);

        parser.skip_ows();
        if parser.at_end() {
            return Ok(dict);
        }
        parser.expect(b',')?;
        parser.skip_ows();
        if parser.at_end() {
            return Err(parser.error("trailing comma"));
        }
    }
}

/// Parses a single Item header value (e.g. a component value).
///
/// # Errors
///
/// Returns [`EvpError::TokenFormat`] on any syntax error.
pub fn parse_item(input: &str) -> Result<Item> {
    let mut parser = Parser::new(input);
    parser.skip_sp();
    let item = parser.parse_item()?;
    parser.skip_sp();
    if !parser.at_end() {
        return Err(parser.error("trailing characters after item"));
    }
    Ok(item)
}

/// Serializes a dictionary.
///
/// # Errors
///
/// Returns [`EvpError::TokenFormat`] if a key or value cannot be represented.
pub fn serialize_dictionary(dict: &Dictionary) -> Result<String> {
    let mut out = String::new();
    for (i, (key, member)) in dict.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_key(&mut out, key)?;
        match member {
            Member::Item(item) if item.bare == BareItem::Boolean(true) => {
                write_parameters(&mut out, &item.params)?;
            }
            Member::Item(item) => {
                out.push('=');
                write_item(&mut out, item)?;
            }
            Member::InnerList(list) => {
                out.push('=');
                write_inner_list(&mut out, list)?;
            }
        }
    }
    Ok(out)
}

/// Serializes an inner list with its parameters.
///
/// # Errors
///
/// Returns [`EvpError::TokenFormat`] if a value cannot be represented.
pub fn serialize_inner_list(list: &InnerList) -> Result<String> {
    let mut out = String::new();
    write_inner_list(&mut out, list)?;
    Ok(out)
}

/// Serializes a single item with its parameters.
///
/// # Errors
///
/// Returns [`EvpError::TokenFormat`] if a value cannot be represented.
pub fn serialize_item(item: &Item) -> Result<String> {
    let mut out = String::new();
    write_item(&mut out, item)?;
    Ok(out)
}

fn write_inner_list(out: &mut String, list: &InnerList) -> Result<()> {
    out.push('(');
    for (i, item) in list.items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        write_item(out, item)?;
    }
    out.push(')');
    write_parameters(out, &list.params)
}

fn write_item(out: &mut String, item: &Item) -> Result<()> {
    write_bare_item(out, &item.bare)?;
    write_parameters(out, &item.params)
}

fn write_parameters(out: &mut String, params: &Parameters) -> Result<()> {
    for (key, value) in params {
        out.push(';');
        write_key(out, key)?;
        if *value != BareItem::Boolean(true) {
            out.push('=');
            write_bare_item(out, value)?;
        }
    }
    Ok(())
}

fn write_key(out: &mut String, key: &str) -> Result<()> {
    let bytes = key.as_bytes();
    let valid = bytes.first().is_some_and(|c| c.is_ascii_lowercase() || *c == b'*')
        && bytes.iter().all(|c| is_key_char(*c));
    if !valid {
        return Err(EvpError::TokenFormat(format!("invalid structured field key '{key}'")));
    }
    out.push_str(key);
    Ok(())
}

fn write_bare_item(out: &mut String, bare: &BareItem) -> Result<()> {
    match bare {
        BareItem::Integer(i) => {
            if !(-MAX_INTEGER..=MAX_INTEGER).contains(i) {
                return Err(EvpError::TokenFormat(format!("integer {i} out of range")));
            }
            // Writing to a String cannot fail
            let _ = write!(out, "{i}");
        }
        BareItem::Decimal(d) => {
            let rounded = (d * 1000.0).round() / 1000.0;
            if !rounded.is_finite() || rounded.abs() >= 1e12 {
                return Err(EvpError::TokenFormat(format!("decimal {d} out of range")));
            }
            let text = format!("{rounded:.3}");
            let trimmed = text.trim_end_matches('0');
            out.push_str(trimmed);
            if trimmed.ends_with('.') {
                out.push('0');
            }
        }
        BareItem::String(s) => {
            out.push('"');
            for c in s.chars() {
                if !(' '..='~').contains(&c) {
                    return Err(EvpError::TokenFormat("string contains non-printable character".into()));
                }
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        }
        BareItem::Token(t) => {
            let bytes = t.as_bytes();
            let valid = bytes.first().is_some_and(|c| c.is_ascii_alphabetic() || *c == b'*')
                && bytes.iter().all(|c| is_tchar(*c) || *c == b':' || *c == b'/');
            if !valid {
                return Err(EvpError::TokenFormat(format!("invalid token '{t}'")));
            }
            out.push_str(t);
        }
        BareItem::ByteSeq(b) => {
            out.push(':');
            out.push_str(&base64_encode(b));
            out.push(':');
        }
        BareItem::Boolean(b) => out.push_str(if *b { "?1" } else { "?0" }),
    }
    Ok(())
}

const fn is_key_char(c: u8) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, b'_' | b'-' | b'.' | b'*')
}

const fn is_tchar(c: u8) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
                | b'`' | b'|' | b'~'
        )
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    const fn new(input: &'a str) -> Self {
        Self { input: input.as_bytes(), pos: 0 }
    }

    fn error(&self, reason: &str) -> EvpError {
        EvpError::TokenFormat(format!("structured field: {reason} at offset {}", self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    const fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: u8) -> Result<()> {
        if self.eat(c) { Ok(()) } else { Err(self.error(&format!("expected '{}'", c as char))) }
    }

    fn skip_sp(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    fn skip_ows(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t')) {
            self.pos += 1;
        }
    }

    fn parse_item_or_inner_list(&mut self) -> Result<Member> {
        if self.peek() == Some(b'(') {
            self.parse_inner_list().map(Member::InnerList)
        } else {
            self.parse_item().map(Member::Item)
        }
    }

    fn parse_inner_list(&mut self) -> Result<InnerList> {
        self.expect(b'(')?;
        let mut items = Vec::new();
        loop {
            self.skip_sp();
            if self.eat(b')') {
                let params = self.parse_parameters()?;
                return Ok(InnerList { items, params });
            }
            items.push(self.parse_item()?);
            match self.peek() {
                Some(b' ' | b')') => {}
                _ => return Err(self.error("inner list items must be separated by spaces")),
            }
        }
    }

    fn parse_item(&mut self) -> Result<Item> {
        let bare = self.parse_bare_item()?;
        let params = self.parse_parameters()?;
        Ok(Item { bare, params })
    }

    fn parse_parameters(&mut self) -> Result<Parameters> {
        let mut params: Parameters = Vec::new();
        while self.eat(b';') {
            self.skip_sp();
            let key = self.parse_key()?;
            let value = if self.eat(b'=') { self.parse_bare_item()? } else { BareItem::Boolean(true) };
            if let Some(slot) = params.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = value;
            } else {
                params.push((key, value));
            }
        }
        Ok(params)
    }

    fn parse_key(&mut self) -> Result<String> {
        match self.peek() {
            Some(c) if c.is_ascii_lowercase() || c == b'*' => {}
            _ => return Err(self.error("key must start with a lowercase letter or '*'")),
        }
        let start = self.pos;
        while self.peek().is_some_and(is_key_char) {
            self.pos += 1;
        }
        Ok(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }

    fn parse_bare_item(&mut self) -> Result<BareItem> {
        match self.peek() {
            Some(b'-' | b'0'..=b'9') => self.parse_number(),
            Some(b'"') => self.parse_string(),
            Some(b':') => self.parse_byte_seq(),
            Some(b'?') => self.parse_boolean(),
            Some(c) if c.is_ascii_alphabetic() || c == b'*' => Ok(self.parse_token()),
            _ => Err(self.error("expected a bare item")),
        }
    }

    fn parse_number(&mut self) -> Result<BareItem> {
        let negative = self.eat(b'-');
        let start = self.pos;
        let mut is_decimal = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == b'.' && !is_decimal {
                if self.pos - start > 12 {
                    return Err(self.error("decimal integer part too long"));
                }
                is_decimal = true;
                self.pos += 1;
            } else {
                break;
            }
            let len = self.pos - start;
            if (!is_decimal && len > 15) || (is_decimal && len > 16) {
                return Err(self.error("number too long"));
            }
        }

        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("invalid number"))?;
        if text.is_empty() || text.starts_with('.') {
            return Err(self.error("number must start with a digit"));
        }

        if is_decimal {
            let frac = text.split('.').nth(1).unwrap_or_default();
            if frac.is_empty() || frac.len() > 3 {
                return Err(self.error("decimal must have 1 to 3 fractional digits"));
            }
            let value: f64 = text.parse().map_err(|_| self.error("invalid decimal"))?;
            Ok(BareItem::Decimal(if negative { -value } else { value }))
        } else {
            let value: i64 = text.parse().map_err(|_| self.error("invalid integer"))?;
            Ok(BareItem::Integer(if negative { -value } else { value }))
        }
    }

    fn parse_string(&mut self) -> Result<BareItem> {
        self.expect(b'"')?;
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(BareItem::String(value));
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c @ (b'"' | b'\\')) => {
                            value.push(c as char);
                            self.pos += 1;
                        }
                        _ => return Err(self.error("invalid escape in string")),
                    }
                }
                Some(c @ 0x20..=0x7e) => {
                    value.push(c as char);
                    self.pos += 1;
                }
                Some(_) => return Err(self.error("non-printable character in string")),
            }
        }
    }

    fn parse_token(&mut self) -> BareItem {
        let start = self.pos;
        while self.peek().is_some_and(|c| is_tchar(c) || c == b':' || c == b'/') {
            self.pos += 1;
        }
        BareItem::Token(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }

    fn parse_byte_seq(&mut self) -> Result<BareItem> {
        self.expect(b':')?;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b':' {
                break;
            }
            if !(c.is_ascii_alphanumeric() || matches!(c, b'+' | b'/' | b'=')) {
                return Err(self.error("invalid character in byte sequence"));
            }
            self.pos += 1;
        }
        let encoded = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("invalid byte sequence"))?;
        self.expect(b':')?;
        let bytes = base64_decode(encoded).map_err(|_| self.error("invalid base64 in byte sequence"))?;
        Ok(BareItem::ByteSeq(bytes))
    }

    fn parse_boolean(&mut self) -> Result<BareItem> {
        self.expect(b'?')?;
        if self.eat(b'1') {
            Ok(BareItem::Boolean(true))
        } else if self.eat(b'0') {
            Ok(BareItem::Boolean(false))
        } else {
            Err(self.error("boolean must be ?0 or ?1"))
        }
    }
}
