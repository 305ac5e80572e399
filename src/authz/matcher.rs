//! Matcher expressions: parsed and type-checked once per model load, then
//! evaluated against each (request, policy rule) pairing.
//!
//! Supported syntax:
//! - Field references: `r.sub`, `p.obj` (must be declared by the model)
//! - Literals: `"strings"`, `'strings'`, `true`, `false`
//! - Comparisons: `==`, `!=`
//! - Boolean operators: `&&`, `||`, `!`
//! - Membership: `r.act in ("GET", "HEAD")`
//! - Predicates: `keyMatch`, `keyMatch2`, `regexMatch` and one role function
//!   per role definition (`g(r.sub, p.sub)`, `g2(...)`)
//! - Parentheses for grouping

use std::collections::HashMap;

use regex::Regex;

use crate::authz::errors::AuthzError;
use crate::authz::model::{Model, Schema};
use crate::authz::types::{PolicyRule, DEFAULT_DOMAIN};
use crate::authz::PolicySnapshot;

// ─── AST ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(LitValue),
    /// `r.<field>`, resolved to its position in the request definition.
    Request(usize),
    /// `p.<field>`, resolved to its position in the policy definition.
    Policy(usize),
    Call {
        func: Func,
        args: Vec<Expr>,
    },
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryNot(Box<Expr>),
    In {
        element: Box<Expr>,
        collection: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinOp {
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LitValue {
    Str(String),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Func {
    /// Role membership through the named role definition.
    Role(String),
    KeyMatch,
    KeyMatch2,
    RegexMatch,
}

impl Func {
    fn resolve(name: &str, schema: &Schema) -> Result<(Self, usize), AuthzError> {
        if let Some(arity) = schema.role_arity(name) {
            return Ok((Func::Role(name.to_string()), arity));
        }
        match name {
            "keyMatch" => Ok((Func::KeyMatch, 2)),
            "keyMatch2" => Ok((Func::KeyMatch2, 2)),
            "regexMatch" => Ok((Func::RegexMatch, 2)),
            other => Err(AuthzError::Matcher(format!("unknown predicate `{other}`"))),
        }
    }
}

// ─── Parser ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    True,
    False,
    Dot,
    Comma,
    LParen,
    RParen,
    Eq,  // ==
    Ne,  // !=
    And, // &&
    Or,  // ||
    Not, // !
    In,  // in
}

fn tokenize(input: &str) -> Result<Vec<Token>, AuthzError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '&' if i + 1 < chars.len() && chars[i + 1] == '&' => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if i + 1 < chars.len() && chars[i + 1] == '|' => {
                tokens.push(Token::Or);
                i += 2;
            }
            quote @ ('"' | '\'') => {
                i += 1;
                let mut s = String::new();
                while i < chars.len() && chars[i] != quote {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        i += 1;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(AuthzError::Matcher("unterminated string literal".into()));
                }
                tokens.push(Token::Str(s));
                i += 1; // closing quote
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" => tokens.push(Token::True),
                    "false" => tokens.push(Token::False),
                    "in" => tokens.push(Token::In),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            c => {
                return Err(AuthzError::Matcher(format!("unexpected character `{c}`")));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'s> {
    tokens: Vec<Token>,
    pos: usize,
    schema: &'s Schema,
}

impl<'s> Parser<'s> {
    fn new(tokens: Vec<Token>, schema: &'s Schema) -> Self {
        Self {
            tokens,
            pos: 0,
            schema,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), AuthzError> {
        if self.advance() != Some(expected) {
            return Err(AuthzError::Matcher(format!("expected {what}")));
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<Expr, AuthzError> {
        self.parse_or()
    }

    /// or_expr = and_expr ("||" and_expr)*
    fn parse_or(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::BinOp {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// and_expr = comparison ("&&" comparison)*
    fn parse_and(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_comparison()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::BinOp {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// comparison = unary (("==" | "!=") unary | "in" "(" expr ("," expr)* ")")?
    fn parse_comparison(&mut self) -> Result<Expr, AuthzError> {
        let left = self.parse_unary()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::In) => {
                self.advance();
                self.expect(Token::LParen, "`(` after `in`")?;
                let collection = self.parse_list()?;
                return Ok(Expr::In {
                    element: Box::new(left),
                    collection,
                });
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_unary()?;
        Ok(Expr::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// unary = "!" unary | primary
    fn parse_unary(&mut self) -> Result<Expr, AuthzError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let expr = self.parse_unary()?;
            return Ok(Expr::UnaryNot(Box::new(expr)));
        }
        self.parse_primary()
    }

    /// primary = literal | field | call | "(" expr ")"
    fn parse_primary(&mut self) -> Result<Expr, AuthzError> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Expr::Literal(LitValue::Str(s))),
            Some(Token::True) => Ok(Expr::Literal(LitValue::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(LitValue::Bool(false))),
            Some(Token::Ident(name)) => match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(field)) => self.resolve_field(&name, &field),
                        _ => Err(AuthzError::Matcher(format!(
                            "expected field name after `{name}.`"
                        ))),
                    }
                }
                Some(Token::LParen) => {
                    self.advance();
                    let (func, arity) = Func::resolve(&name, self.schema)?;
                    let args = self.parse_list()?;
                    if args.len() != arity {
                        return Err(AuthzError::Matcher(format!(
                            "`{name}` takes {arity} arguments, got {}",
                            args.len()
                        )));
                    }
                    if let (Func::RegexMatch, Some(Expr::Literal(LitValue::Str(pattern)))) =
                        (&func, args.get(1))
                    {
                        Regex::new(pattern).map_err(|e| {
                            AuthzError::Matcher(format!("invalid regex `{pattern}`: {e}"))
                        })?;
                    }
                    Ok(Expr::Call { func, args })
                }
                _ => Err(AuthzError::Matcher(format!(
                    "unexpected identifier `{name}`"
                ))),
            },
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(Token::RParen, "closing parenthesis `)`")?;
                Ok(expr)
            }
            other => Err(AuthzError::Matcher(format!(
                "unexpected token: {other:?}"
            ))),
        }
    }

    /// Comma-separated expressions up to and including the closing `)`.
    fn parse_list(&mut self) -> Result<Vec<Expr>, AuthzError> {
        let mut items = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(items),
                _ => {
                    return Err(AuthzError::Matcher(
                        "expected `,` or `)` in argument list".into(),
                    ))
                }
            }
        }
    }

    fn resolve_field(&self, scope: &str, field: &str) -> Result<Expr, AuthzError> {
        let resolved = match scope {
            "r" => self.schema.request_index(field).map(Expr::Request),
            "p" => self.schema.policy_index(field).map(Expr::Policy),
            _ => None,
        };
        resolved.ok_or_else(|| {
            AuthzError::MalformedModel(format!(
                "matcher references undeclared field `{scope}.{field}`"
            ))
        })
    }
}

// ─── Type check ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Ty {
    Str,
    Bool,
}

fn type_of(expr: &Expr) -> Result<Ty, AuthzError> {
    match expr {
        Expr::Literal(LitValue::Str(_)) | Expr::Request(_) | Expr::Policy(_) => Ok(Ty::Str),
        Expr::Literal(LitValue::Bool(_)) => Ok(Ty::Bool),
        Expr::Call { args, .. } => {
            for arg in args {
                if type_of(arg)? != Ty::Str {
                    return Err(AuthzError::Matcher(
                        "predicate arguments must be strings".into(),
                    ));
                }
            }
            Ok(Ty::Bool)
        }
        Expr::UnaryNot(inner) => match type_of(inner)? {
            Ty::Bool => Ok(Ty::Bool),
            Ty::Str => Err(AuthzError::Matcher(
                "`!` operator requires a boolean operand".into(),
            )),
        },
        Expr::In {
            element,
            collection,
        } => {
            let ty = type_of(element)?;
            for item in collection {
                if type_of(item)? != ty {
                    return Err(AuthzError::Matcher(
                        "`in` list items must have the same type as the element".into(),
                    ));
                }
            }
            Ok(Ty::Bool)
        }
        Expr::BinOp { op, left, right } => {
            let (l, r) = (type_of(left)?, type_of(right)?);
            match op {
                BinOp::Eq | BinOp::Ne if l == r => Ok(Ty::Bool),
                BinOp::Eq | BinOp::Ne => Err(AuthzError::Matcher(
                    "cannot compare a string with a boolean".into(),
                )),
                BinOp::And | BinOp::Or if l == Ty::Bool && r == Ty::Bool => Ok(Ty::Bool),
                BinOp::And => Err(AuthzError::Matcher("`&&` requires boolean operands".into())),
                BinOp::Or => Err(AuthzError::Matcher("`||` requires boolean operands".into())),
            }
        }
    }
}

/// Parse and type-check a matcher expression against the model's schema.
pub(crate) fn parse_matcher(input: &str, schema: &Schema) -> Result<Expr, AuthzError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(AuthzError::Matcher("empty expression".into()));
    }
    let mut parser = Parser::new(tokens, schema);
    let expr = parser.parse_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(AuthzError::Matcher(format!(
            "unexpected trailing token: {:?}",
            parser.tokens[parser.pos]
        )));
    }
    if type_of(&expr)? != Ty::Bool {
        return Err(AuthzError::Matcher(
            "matcher must evaluate to a boolean".into(),
        ));
    }
    Ok(expr)
}

// ─── Evaluator ──────────────────────────────────────────────────────────

/// A compiled matcher expression.
#[derive(Debug, Clone)]
pub struct Matcher {
    source: String,
    expr: Expr,
}

impl Matcher {
    pub fn compile(source: &str, schema: &Schema) -> Result<Self, AuthzError> {
        Ok(Self {
            source: source.trim().to_string(),
            expr: parse_matcher(source, schema)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with `r.*` bound to `request` and `p.*` bound to `rule`.
    /// Role functions and `regexMatch` patterns resolve through `snapshot`.
    pub fn evaluate(
        &self,
        request: &[&str],
        rule: &PolicyRule,
        snapshot: &PolicySnapshot,
    ) -> Result<bool, AuthzError> {
        let scope = Scope {
            request,
            rule,
            snapshot,
        };
        as_bool(eval_value(&self.expr, &scope)?)
    }

    /// Arguments used as `regexMatch` patterns.
    fn regex_patterns(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        collect_patterns(&self.expr, &mut out);
        out
    }
}

fn collect_patterns<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) {
    match expr {
        Expr::Literal(_) | Expr::Request(_) | Expr::Policy(_) => {}
        Expr::Call { func, args } => {
            if *func == Func::RegexMatch {
                out.extend(args.get(1));
            }
            for arg in args {
                collect_patterns(arg, out);
            }
        }
        Expr::BinOp { left, right, .. } => {
            collect_patterns(left, out);
            collect_patterns(right, out);
        }
        Expr::UnaryNot(inner) => collect_patterns(inner, out),
        Expr::In {
            element,
            collection,
        } => {
            collect_patterns(element, out);
            for item in collection {
                collect_patterns(item, out);
            }
        }
    }
}

/// `regexMatch` patterns compiled when rules enter a snapshot, keyed by
/// pattern text. Patterns taken from the request are compiled per call.
#[derive(Debug, Clone, Default)]
pub struct PatternCache {
    compiled: HashMap<String, Regex>,
}

impl PatternCache {
    /// Compile every pattern `rule` contributes to the model's matchers.
    pub fn add_rule(&mut self, model: &Model, rule: &PolicyRule) -> Result<(), AuthzError> {
        for matcher in model.matchers() {
            for expr in matcher.regex_patterns() {
                let pattern = match expr {
                    Expr::Literal(LitValue::Str(p)) => p.as_str(),
                    Expr::Policy(i) => match rule.get(*i) {
                        Some(p) => p,
                        None => continue,
                    },
                    _ => continue,
                };
                if self.compiled.contains_key(pattern) {
                    continue;
                }
                let re = Regex::new(pattern).map_err(|e| {
                    AuthzError::InvalidRule(format!("rule `{rule}`: invalid regex `{pattern}`: {e}"))
                })?;
                self.compiled.insert(pattern.to_string(), re);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    fn is_match(&self, key: &str, pattern: &str) -> Result<bool, AuthzError> {
        match self.compiled.get(pattern) {
            Some(re) => Ok(re.is_match(key)),
            None => regex_match(key, pattern),
        }
    }
}

struct Scope<'a> {
    request: &'a [&'a str],
    rule: &'a PolicyRule,
    snapshot: &'a PolicySnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value<'a> {
    Str(&'a str),
    Bool(bool),
}

fn as_bool(value: Value<'_>) -> Result<bool, AuthzError> {
    match value {
        Value::Bool(b) => Ok(b),
        Value::Str(s) => Err(AuthzError::Matcher(format!(
            "expected a boolean, got string `{s}`"
        ))),
    }
}

fn as_str(value: Value<'_>) -> Result<&str, AuthzError> {
    match value {
        Value::Str(s) => Ok(s),
        Value::Bool(b) => Err(AuthzError::Matcher(format!(
            "expected a string, got `{b}`"
        ))),
    }
}

fn eval_value<'a>(expr: &'a Expr, scope: &Scope<'a>) -> Result<Value<'a>, AuthzError> {
    match expr {
        Expr::Literal(LitValue::Str(s)) => Ok(Value::Str(s)),
        Expr::Literal(LitValue::Bool(b)) => Ok(Value::Bool(*b)),
        Expr::Request(i) => scope
            .request
            .get(*i)
            .map(|v| Value::Str(*v))
            .ok_or_else(|| AuthzError::Matcher(format!("request has no value at position {i}"))),
        Expr::Policy(i) => scope
            .rule
            .get(*i)
            .map(Value::Str)
            .ok_or_else(|| AuthzError::Matcher(format!("rule `{}` has no field {i}", scope.rule))),
        Expr::UnaryNot(inner) => Ok(Value::Bool(!as_bool(eval_value(inner, scope)?)?)),
        Expr::In {
            element,
            collection,
        } => {
            let elem = eval_value(element, scope)?;
            for item in collection {
                if eval_value(item, scope)? == elem {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Expr::BinOp { op, left, right } => match op {
            BinOp::And => Ok(Value::Bool(
                as_bool(eval_value(left, scope)?)? && as_bool(eval_value(right, scope)?)?,
            )),
            BinOp::Or => Ok(Value::Bool(
                as_bool(eval_value(left, scope)?)? || as_bool(eval_value(right, scope)?)?,
            )),
            BinOp::Eq => Ok(Value::Bool(
                eval_value(left, scope)? == eval_value(right, scope)?,
            )),
            BinOp::Ne => Ok(Value::Bool(
                eval_value(left, scope)? != eval_value(right, scope)?,
            )),
        },
        Expr::Call { func, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(as_str(eval_value(arg, scope)?)?);
            }
            let result = match (func, values.as_slice()) {
                (Func::Role(name), [member, role, rest @ ..]) => {
                    let domain = rest.first().copied().unwrap_or(DEFAULT_DOMAIN);
                    match scope.snapshot.roles.get(name) {
                        Some(graph) => graph.has_role_in(member, role, domain),
                        None => member == role,
                    }
                }
                (Func::KeyMatch, [key, pattern]) => key_match(key, pattern),
                (Func::KeyMatch2, [key, pattern]) => key_match2(key, pattern),
                (Func::RegexMatch, [key, pattern]) => {
                    scope.snapshot.patterns.is_match(key, pattern)?
                }
                (func, values) => {
                    return Err(AuthzError::Matcher(format!(
                        "{func:?} called with {} arguments",
                        values.len()
                    )))
                }
            };
            Ok(Value::Bool(result))
        }
    }
}

// ─── Built-in predicates ────────────────────────────────────────────────

/// `pattern` matches `key` exactly, or, when `pattern` contains `*`, `key`
/// starts with everything before the first `*`.
///
/// `/dataset2/folder1/*` matches `/dataset2/folder1/item1` but `/a/*` does not
/// match `/ab/c`.
pub fn key_match(key: &str, pattern: &str) -> bool {
    match pattern.find('*') {
        Some(i) => key.starts_with(&pattern[..i]),
        None => key == pattern,
    }
}

/// Segment-wise path match: `:name` matches exactly one non-empty segment,
/// a trailing `*` segment matches the remainder of the path, and a `*`
/// segment elsewhere matches a single segment.
pub fn key_match2(key: &str, pattern: &str) -> bool {
    let mut keys = key.split('/');
    let mut patterns = pattern.split('/').peekable();

    while let Some(pat) = patterns.next() {
        let Some(seg) = keys.next() else {
            return false;
        };
        if pat == "*" {
            if patterns.peek().is_none() {
                return true;
            }
            continue;
        }
        if let Some(_param) = pat.strip_prefix(':') {
            if seg.is_empty() {
                return false;
            }
            continue;
        }
        if pat != seg {
            return false;
        }
    }
    keys.next().is_none()
}

/// Unanchored regular expression search.
pub fn regex_match(key: &str, pattern: &str) -> Result<bool, AuthzError> {
    let re = Regex::new(pattern)
        .map_err(|e| AuthzError::Matcher(format!("invalid regex `{pattern}`: {e}")))?;
    Ok(re.is_match(key))
}
