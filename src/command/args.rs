//! Cursor-style command argument parser
//!
//! Arguments arrive as binary-safe byte strings; keyword matching is
//! ASCII case-insensitive. `check` consumes on match, `next_*` fail with
//! a syntax error when the argument list runs out.

use std::str::FromStr;

use crate::error::{Result, SearchError};

pub struct ArgParser<'a> {
    args: &'a [Vec<u8>],
    pos: usize,
}

impl<'a> ArgParser<'a> {
    pub fn new(args: &'a [Vec<u8>]) -> Self {
        Self { args, pos: 0 }
    }

    pub fn has_next(&self) -> bool {
        self.pos < self.args.len()
    }

    pub fn remaining(&self) -> usize {
        self.args.len() - self.pos
    }

    pub fn peek(&self) -> Option<&'a [u8]> {
        self.args.get(self.pos).map(|a| a.as_slice())
    }

    pub fn peek_str(&self) -> Option<&'a str> {
        std::str::from_utf8(self.peek()?).ok()
    }

    pub fn next(&mut self) -> Result<&'a [u8]> {
        let arg = self
            .args
            .get(self.pos)
            .ok_or_else(|| SearchError::syntax("missing argument"))?;
        self.pos += 1;
        Ok(arg.as_slice())
    }

    pub fn next_str(&mut self) -> Result<&'a str> {
        std::str::from_utf8(self.next()?)
            .map_err(|_| SearchError::syntax("invalid utf-8 argument"))
    }

    pub fn next_string(&mut self) -> Result<String> {
        Ok(self.next_str()?.to_string())
    }

    pub fn next_num<T: FromStr>(&mut self) -> Result<T> {
        let text = self.next_str()?;
        text.parse()
            .map_err(|_| SearchError::syntax(format!("bad number: {text}")))
    }

    /// Consume the next argument when it equals `tag` case-insensitively.
    pub fn check(&mut self, tag: &str) -> bool {
        let matched = self
            .peek()
            .map(|a| a.eq_ignore_ascii_case(tag.as_bytes()))
            .unwrap_or(false);
        if matched {
            self.pos += 1;
        }
        matched
    }

    pub fn expect_tag(&mut self, tag: &str) -> Result<()> {
        if self.check(tag) {
            Ok(())
        } else {
            Err(SearchError::syntax(format!("expected {tag}")))
        }
    }

    pub fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.args.len());
    }
}
