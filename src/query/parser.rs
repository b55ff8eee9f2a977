//! Character-level recursive-descent query parser
//!
//! No token stream: the cursor walks the input string directly.
//! `$name` references are substituted from the parameter bindings while
//! parsing, and field references are resolved against the schema, so the
//! output tree is ready for execution on any shard.

use std::sync::Once;

use tracing::warn;

use crate::doc::bytes_to_vector;
use crate::error::{Result, SearchError};
use crate::query::ast::{KnnClause, ParsedQuery, QueryNode};
use crate::query::params::QueryParams;
use crate::schema::{FieldSpec, FieldType, Schema};

static EF_RUNTIME_WARN: Once = Once::new();
static EPSILON_WARN: Once = Once::new();

pub struct QueryParser<'a> {
    input: &'a str,
    pos: usize,
    params: &'a QueryParams,
    schema: &'a Schema,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

impl<'a> QueryParser<'a> {
    pub fn new(input: &'a str, params: &'a QueryParams, schema: &'a Schema) -> Self {
        Self {
            input,
            pos: 0,
            params,
            schema,
        }
    }

    pub fn parse(mut self) -> Result<ParsedQuery> {
        self.skip_ws();
        if self.rest().is_empty() {
            return Err(SearchError::QuerySyntax);
        }

        let root = self.parse_or()?;
        let knn = self.parse_knn_suffix()?;

        self.skip_ws();
        if !self.rest().is_empty() {
            return Err(SearchError::QuerySyntax);
        }
        Ok(ParsedQuery { root, knn })
    }

    // ---- cursor helpers ----

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            return true;
        }
        false
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        let rest = self.rest();
        let Some(head) = rest.get(..kw.len()) else {
            return false;
        };
        if !head.eq_ignore_ascii_case(kw) {
            return false;
        }
        if rest[kw.len()..].chars().next().map(is_word_char).unwrap_or(false) {
            return false;
        }
        self.pos += kw.len();
        true
    }

    fn skip_ws(&mut self) {
        while self.peek().map(|c| c.is_whitespace()).unwrap_or(false) {
            self.bump();
        }
    }

    // ---- grammar ----

    fn parse_or(&mut self) -> Result<QueryNode> {
        let mut branches = vec![self.parse_and()?];
        loop {
            self.skip_ws();
            if self.eat('|') {
                branches.push(self.parse_and()?);
            } else {
                break;
            }
        }
        if branches.len() == 1 {
            Ok(branches.pop().unwrap_or(QueryNode::Nothing))
        } else {
            Ok(QueryNode::Or(branches))
        }
    }

    fn parse_and(&mut self) -> Result<QueryNode> {
        let mut parts = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None | Some('|') | Some(')') | Some(']') | Some('}') | Some('=') => break,
                _ => parts.push(self.parse_unary()?),
            }
        }
        match parts.len() {
            0 => Err(SearchError::QuerySyntax),
            1 => Ok(parts.pop().unwrap_or(QueryNode::Nothing)),
            _ => Ok(QueryNode::And(parts)),
        }
    }

    fn parse_unary(&mut self) -> Result<QueryNode> {
        self.skip_ws();
        if self.eat('-') {
            let inner = self.parse_unary()?;
            return Ok(QueryNode::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<QueryNode> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.bump();
                let inner = self.parse_or()?;
                self.skip_ws();
                if !self.eat(')') {
                    return Err(SearchError::QuerySyntax);
                }
                Ok(inner)
            }
            Some('*') => {
                self.bump();
                if self.peek().map(is_word_char).unwrap_or(false) {
                    // `*suffix` wildcard over all TEXT fields
                    let word = self.read_word()?;
                    Ok(QueryNode::TextTerm {
                        field: None,
                        term: format!("*{word}"),
                    })
                } else {
                    Ok(QueryNode::MatchAll)
                }
            }
            Some('@') => {
                self.bump();
                self.parse_field_predicate()
            }
            Some('"') => {
                let terms = self.read_phrase()?;
                Ok(QueryNode::Phrase { field: None, terms })
            }
            Some(c) if is_word_char(c) || c == '$' => {
                let term = self.read_word()?;
                Ok(QueryNode::TextTerm { field: None, term })
            }
            _ => Err(SearchError::QuerySyntax),
        }
    }

    fn parse_field_predicate(&mut self) -> Result<QueryNode> {
        let alias = self.read_bare_word()?;
        let Some((identifier, spec)) = self.schema.field_by_alias(&alias) else {
            return Err(SearchError::QuerySyntax);
        };
        let identifier = identifier.to_string();
        let spec = spec.clone();

        if !self.eat(':') {
            return Err(SearchError::QuerySyntax);
        }

        // NOINDEX fields are stored for projection but never match
        if spec.is_noindex() {
            self.skip_predicate_body(&spec)?;
            return Ok(QueryNode::Nothing);
        }

        match spec.field_type {
            FieldType::Tag => self.parse_tag_predicate(identifier),
            FieldType::Numeric => self.parse_numeric_predicate(identifier),
            FieldType::Text => self.parse_text_predicate(identifier),
            // Vector fields only participate through the KNN clause
            FieldType::Vector => Err(SearchError::QuerySyntax),
        }
    }

    /// Consume and discard a predicate body for a non-matching field.
    fn skip_predicate_body(&mut self, spec: &FieldSpec) -> Result<()> {
        match spec.field_type {
            FieldType::Tag if self.peek() == Some('{') => {
                self.read_tag_set()?;
            }
            FieldType::Numeric if self.peek() == Some('[') => {
                self.read_range()?;
            }
            _ if self.peek() == Some('"') => {
                self.read_phrase()?;
            }
            _ => {
                self.read_word()?;
            }
        }
        Ok(())
    }

    fn parse_tag_predicate(&mut self, field: String) -> Result<QueryNode> {
        let tags = if self.peek() == Some('{') {
            self.read_tag_set()?
        } else {
            vec![self.read_word()?]
        };
        if tags.is_empty() {
            return Err(SearchError::QuerySyntax);
        }
        Ok(QueryNode::TagMatch { field, tags })
    }

    fn parse_numeric_predicate(&mut self, field: String) -> Result<QueryNode> {
        if self.peek() == Some('[') {
            let (lo, hi, lo_open, hi_open) = self.read_range()?;
            return Ok(QueryNode::NumericRange {
                field,
                lo,
                hi,
                lo_open,
                hi_open,
            });
        }
        let text = if self.peek() == Some('$') {
            self.read_param_str()?
        } else {
            let start = self.pos;
            while self
                .peek()
                .map(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
                .unwrap_or(false)
            {
                self.bump();
            }
            self.input[start..self.pos].to_string()
        };
        let value: f64 = text.parse().map_err(|_| SearchError::QuerySyntax)?;
        Ok(QueryNode::NumericRange {
            field,
            lo: value,
            hi: value,
            lo_open: false,
            hi_open: false,
        })
    }

    fn parse_text_predicate(&mut self, field: String) -> Result<QueryNode> {
        if self.peek() == Some('"') {
            let terms = self.read_phrase()?;
            return Ok(QueryNode::Phrase {
                field: Some(field),
                terms,
            });
        }
        if self.eat('*') {
            let word = self.read_word()?;
            return Ok(QueryNode::TextTerm {
                field: Some(field),
                term: format!("*{word}"),
            });
        }
        let term = self.read_word()?;
        Ok(QueryNode::TextTerm {
            field: Some(field),
            term,
        })
    }

    // ---- lexical pieces ----

    /// A word with `$param` substitution applied.
    fn read_word(&mut self) -> Result<String> {
        if self.peek() == Some('$') {
            return self.read_param_str();
        }
        self.read_bare_word()
    }

    fn read_bare_word(&mut self) -> Result<String> {
        let start = self.pos;
        while self.peek().map(is_word_char).unwrap_or(false) {
            self.bump();
        }
        if self.pos == start {
            return Err(SearchError::QuerySyntax);
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn read_param_name(&mut self) -> Result<String> {
        if !self.eat('$') {
            return Err(SearchError::QuerySyntax);
        }
        self.read_bare_word()
    }

    fn read_param_str(&mut self) -> Result<String> {
        let name = self.read_param_name()?;
        self.params
            .get_str(&name)
            .map(str::to_string)
            .ok_or(SearchError::QuerySyntax)
    }

    fn read_param_bytes(&mut self) -> Result<Vec<u8>> {
        let name = self.read_param_name()?;
        self.params
            .get(&name)
            .map(|b| b.to_vec())
            .ok_or(SearchError::QuerySyntax)
    }

    fn read_phrase(&mut self) -> Result<Vec<String>> {
        if !self.eat('"') {
            return Err(SearchError::QuerySyntax);
        }
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '"' {
                break;
            }
            self.bump();
        }
        let body = self.input[start..self.pos].to_string();
        if !self.eat('"') {
            return Err(SearchError::QuerySyntax);
        }
        let terms: Vec<String> = body
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if terms.is_empty() {
            return Err(SearchError::QuerySyntax);
        }
        Ok(terms)
    }

    /// `{ t1 | t2 | *suf }`
    fn read_tag_set(&mut self) -> Result<Vec<String>> {
        if !self.eat('{') {
            return Err(SearchError::QuerySyntax);
        }
        let mut tags = Vec::new();
        loop {
            self.skip_ws();
            let tag = if self.peek() == Some('$') {
                self.read_param_str()?
            } else {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c == '|' || c == '}' {
                        break;
                    }
                    self.bump();
                }
                self.input[start..self.pos].trim().to_string()
            };
            if tag.is_empty() {
                return Err(SearchError::QuerySyntax);
            }
            tags.push(tag);
            self.skip_ws();
            if self.eat('|') {
                continue;
            }
            if self.eat('}') {
                return Ok(tags);
            }
            return Err(SearchError::QuerySyntax);
        }
    }

    /// `[lo hi]`, bounds may carry a `(` exclusive prefix and may be
    /// `-inf`/`+inf`/`inf` or `$param` references.
    fn read_range(&mut self) -> Result<(f64, f64, bool, bool)> {
        if !self.eat('[') {
            return Err(SearchError::QuerySyntax);
        }
        let (lo, lo_open) = self.read_bound()?;
        let (hi, hi_open) = self.read_bound()?;
        self.skip_ws();
        if !self.eat(']') {
            return Err(SearchError::QuerySyntax);
        }
        Ok((lo, hi, lo_open, hi_open))
    }

    fn read_bound(&mut self) -> Result<(f64, bool)> {
        self.skip_ws();
        let open = self.eat('(');
        self.skip_ws();

        if self.peek() == Some('$') {
            let s = self.read_param_str()?;
            let v = parse_bound(&s).ok_or(SearchError::QuerySyntax)?;
            return Ok((v, open));
        }

        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ']' || c == '(' {
                break;
            }
            self.bump();
        }
        let text = &self.input[start..self.pos];
        let v = parse_bound(text).ok_or(SearchError::QuerySyntax)?;
        Ok((v, open))
    }

    // ---- KNN clause ----

    fn parse_knn_suffix(&mut self) -> Result<Option<KnnClause>> {
        self.skip_ws();
        if !self.rest().starts_with("=>") {
            return Ok(None);
        }
        self.pos += 2;
        self.skip_ws();
        if !self.eat('[') {
            return Err(SearchError::QuerySyntax);
        }
        self.skip_ws();
        if !self.eat_keyword("KNN") {
            return Err(SearchError::QuerySyntax);
        }

        self.skip_ws();
        let k: usize = self
            .read_word()?
            .parse()
            .map_err(|_| SearchError::QuerySyntax)?;

        self.skip_ws();
        if !self.eat('@') {
            return Err(SearchError::QuerySyntax);
        }
        let alias = self.read_bare_word()?;
        let Some((identifier, spec)) = self.schema.field_by_alias(&alias) else {
            return Err(SearchError::QuerySyntax);
        };
        if spec.field_type != FieldType::Vector {
            return Err(SearchError::QuerySyntax);
        }
        let dim = spec.vector_params().map(|p| p.dim).unwrap_or(0);
        let identifier = identifier.to_string();

        self.skip_ws();
        let bytes = self.read_param_bytes()?;
        let vector = bytes_to_vector(&bytes, dim).ok_or(SearchError::QuerySyntax)?;

        let mut score_alias = format!("__{alias}_score");
        loop {
            self.skip_ws();
            if self.eat_keyword("EF_RUNTIME") {
                self.skip_ws();
                self.read_word()?;
                // TODO: wire EF_RUNTIME into the HNSW beam width
                EF_RUNTIME_WARN.call_once(|| warn!("EF_RUNTIME not supported"));
            } else if self.eat_keyword("EPSILON") {
                self.skip_ws();
                self.read_word()?;
                // TODO: range-pruned HNSW search
                EPSILON_WARN.call_once(|| warn!("EPSILON not supported"));
            } else if self.eat_keyword("AS") {
                self.skip_ws();
                score_alias = self.read_bare_word()?;
            } else {
                break;
            }
        }

        self.skip_ws();
        if !self.eat(']') {
            return Err(SearchError::QuerySyntax);
        }

        Ok(Some(KnnClause {
            field: identifier,
            field_alias: alias,
            k,
            vector,
            score_alias,
        }))
    }
}

fn parse_bound(text: &str) -> Option<f64> {
    match text.to_ascii_lowercase().as_str() {
        "inf" | "+inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        _ => text.parse().ok(),
    }
}
