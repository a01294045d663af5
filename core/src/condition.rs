//! Condition algebra (spec §4.6): predicates that gate a patch node at apply
//! time, plus a small text grammar (`V > 0 AND NOT (S == 'x')`) that parses
//! into it. Grounded in shape on teacher's hand-rolled parsers (`lens.rs`'s
//! `Kind`/`Lens` sum types) — a small Pratt-ish recursive-descent parser over
//! a sum-typed AST, exactly Design Note §9's recommendation.

use crate::error::SyncError;
use crate::path::PathBuf;
use crate::reflect::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Bool(bool),
    Num(f64),
    Str(String),
    Null,
}

impl Literal {
    fn matches(&self, v: &Value) -> bool {
        match (self, v) {
            (Literal::Bool(b), Value::Bool(v)) => b == v,
            (Literal::Num(n), Value::I64(v)) => *n == *v as f64,
            (Literal::Num(n), Value::U64(v)) => *n == *v as f64,
            (Literal::Num(n), Value::F64(v)) => n.to_bits() == v.to_bits(),
            (Literal::Str(s), Value::Str(v)) => s == v,
            (Literal::Null, Value::Null) => true,
            (Literal::Null, Value::Option(None)) => true,
            _ => false,
        }
    }

    fn cmp(&self, v: &Value) -> Option<std::cmp::Ordering> {
        match (self, v) {
            (Literal::Num(n), Value::I64(v)) => n.partial_cmp(&(*v as f64)),
            (Literal::Num(n), Value::U64(v)) => n.partial_cmp(&(*v as f64)),
            (Literal::Num(n), Value::F64(v)) => n.partial_cmp(v),
            (Literal::Str(s), Value::Str(v)) => s.as_str().partial_cmp(v.as_str()),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeTag {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Null,
    Undefined,
}

fn type_of(v: &Value) -> TypeTag {
    match v {
        Value::Str(_) => TypeTag::String,
        Value::I64(_) | Value::U64(_) | Value::F64(_) => TypeTag::Number,
        Value::Bool(_) => TypeTag::Boolean,
        Value::Struct(_) | Value::Map(_) => TypeTag::Object,
        Value::Array(_) | Value::Slice(_) => TypeTag::Array,
        Value::Null | Value::Option(None) => TypeTag::Null,
        Value::Option(Some(_)) => TypeTag::Object,
        Value::Bytes(_) | Value::Custom(_) => TypeTag::Object,
    }
}

/// A closed predicate algebra evaluated against a document (§4.6).
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Eq(PathBuf, Literal, bool),
    Ne(PathBuf, Literal, bool),
    Lt(PathBuf, Literal),
    Le(PathBuf, Literal),
    Gt(PathBuf, Literal),
    Ge(PathBuf, Literal),
    Defined(PathBuf),
    Undefined(PathBuf),
    TypeIs(PathBuf, TypeTag),
    Starts(PathBuf, String),
    Ends(PathBuf, String),
    Contains(PathBuf, String),
    Matches(PathBuf, String),
    In(PathBuf, Vec<Literal>),
    EqField(PathBuf, PathBuf),
    CmpField(PathBuf, PathBuf, std::cmp::Ordering),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// The set of paths this condition reads (§4.6 "Inspection").
    pub fn paths(&self) -> Vec<PathBuf> {
        match self {
            Condition::Eq(p, _, _)
            | Condition::Ne(p, _, _)
            | Condition::Lt(p, _)
            | Condition::Le(p, _)
            | Condition::Gt(p, _)
            | Condition::Ge(p, _)
            | Condition::Defined(p)
            | Condition::Undefined(p)
            | Condition::TypeIs(p, _)
            | Condition::Starts(p, _)
            | Condition::Ends(p, _)
            | Condition::Contains(p, _)
            | Condition::Matches(p, _)
            | Condition::In(p, _) => vec![p.clone()],
            Condition::EqField(a, b) => vec![a.clone(), b.clone()],
            Condition::CmpField(a, b, _) => vec![a.clone(), b.clone()],
            Condition::And(cs) | Condition::Or(cs) => cs.iter().flat_map(Condition::paths).collect(),
            Condition::Not(c) => c.paths(),
        }
    }

    /// Rewrites every path this condition reads to be relative to `prefix`
    /// (§4.6: the builder attaches a condition at the longest common prefix
    /// of the paths it reads, then relativizes).
    pub fn with_relative_path(&self, prefix: &PathBuf) -> Condition {
        fn rel(p: &PathBuf, prefix: &PathBuf) -> PathBuf {
            if prefix.is_prefix_of(p) {
                PathBuf(p.segments()[prefix.segments().len()..].to_vec())
            } else {
                p.clone()
            }
        }
        match self {
            Condition::Eq(p, l, ci) => Condition::Eq(rel(p, prefix), l.clone(), *ci),
            Condition::Ne(p, l, ci) => Condition::Ne(rel(p, prefix), l.clone(), *ci),
            Condition::Lt(p, l) => Condition::Lt(rel(p, prefix), l.clone()),
            Condition::Le(p, l) => Condition::Le(rel(p, prefix), l.clone()),
            Condition::Gt(p, l) => Condition::Gt(rel(p, prefix), l.clone()),
            Condition::Ge(p, l) => Condition::Ge(rel(p, prefix), l.clone()),
            Condition::Defined(p) => Condition::Defined(rel(p, prefix)),
            Condition::Undefined(p) => Condition::Undefined(rel(p, prefix)),
            Condition::TypeIs(p, t) => Condition::TypeIs(rel(p, prefix), *t),
            Condition::Starts(p, s) => Condition::Starts(rel(p, prefix), s.clone()),
            Condition::Ends(p, s) => Condition::Ends(rel(p, prefix), s.clone()),
            Condition::Contains(p, s) => Condition::Contains(rel(p, prefix), s.clone()),
            Condition::Matches(p, s) => Condition::Matches(rel(p, prefix), s.clone()),
            Condition::In(p, l) => Condition::In(rel(p, prefix), l.clone()),
            Condition::EqField(a, b) => Condition::EqField(rel(a, prefix), rel(b, prefix)),
            Condition::CmpField(a, b, o) => Condition::CmpField(rel(a, prefix), rel(b, prefix), *o),
            Condition::And(cs) => Condition::And(cs.iter().map(|c| c.with_relative_path(prefix)).collect()),
            Condition::Or(cs) => Condition::Or(cs.iter().map(|c| c.with_relative_path(prefix)).collect()),
            Condition::Not(c) => Condition::Not(Box::new(c.with_relative_path(prefix))),
        }
    }

    /// Evaluates the condition against `root`, the document the condition's
    /// paths are resolved relative to (§4.6 "Semantics at apply time").
    pub fn eval(&self, root: &Value) -> bool {
        let get = |p: &PathBuf| crate::path::resolve(root, p).ok();
        match self {
            Condition::Eq(p, lit, ci) => get(p)
                .map(|v| if *ci { case_insensitive_match(lit, v) } else { lit.matches(v) })
                .unwrap_or(false),
            Condition::Ne(p, lit, ci) => !get(p)
                .map(|v| if *ci { case_insensitive_match(lit, v) } else { lit.matches(v) })
                .unwrap_or(false),
            Condition::Lt(p, lit) => get(p)
                .and_then(|v| lit.cmp(v))
                .map(|o| o == std::cmp::Ordering::Greater)
                .unwrap_or(false),
            Condition::Le(p, lit) => get(p)
                .and_then(|v| lit.cmp(v))
                .map(|o| o != std::cmp::Ordering::Less)
                .unwrap_or(false),
            Condition::Gt(p, lit) => get(p)
                .and_then(|v| lit.cmp(v))
                .map(|o| o == std::cmp::Ordering::Less)
                .unwrap_or(false),
            Condition::Ge(p, lit) => get(p)
                .and_then(|v| lit.cmp(v))
                .map(|o| o != std::cmp::Ordering::Greater)
                .unwrap_or(false),
            Condition::Defined(p) => matches!(get(p), Some(v) if !matches!(v, Value::Null | Value::Option(None))),
            Condition::Undefined(p) => !matches!(get(p), Some(v) if !matches!(v, Value::Null | Value::Option(None))),
            Condition::TypeIs(p, t) => get(p).map(|v| type_of(v) == *t).unwrap_or(*t == TypeTag::Undefined),
            Condition::Starts(p, s) => get(p).and_then(as_str).map(|v| v.starts_with(s.as_str())).unwrap_or(false),
            Condition::Ends(p, s) => get(p).and_then(as_str).map(|v| v.ends_with(s.as_str())).unwrap_or(false),
            Condition::Contains(p, s) => get(p).and_then(as_str).map(|v| v.contains(s.as_str())).unwrap_or(false),
            Condition::Matches(p, pattern) => get(p)
                .and_then(as_str)
                .and_then(|v| regex::Regex::new(pattern).ok().map(|re| re.is_match(v)))
                .unwrap_or(false),
            Condition::In(p, list) => get(p).map(|v| list.iter().any(|l| l.matches(v))).unwrap_or(false),
            Condition::EqField(a, b) => match (get(a), get(b)) {
                (Some(x), Some(y)) => crate::equal::deep_equal(x, y, &crate::equal::EqualOptions::default()),
                _ => false,
            },
            Condition::CmpField(a, b, want) => match (get(a), get(b)) {
                (Some(Value::I64(x)), Some(Value::I64(y))) => x.partial_cmp(y) == Some(*want),
                (Some(Value::F64(x)), Some(Value::F64(y))) => x.partial_cmp(y) == Some(*want),
                (Some(Value::Str(x)), Some(Value::Str(y))) => x.as_str().partial_cmp(y.as_str()) == Some(*want),
                _ => false,
            },
            Condition::And(cs) => cs.iter().all(|c| c.eval(root)),
            Condition::Or(cs) => cs.iter().any(|c| c.eval(root)),
            Condition::Not(c) => !c.eval(root),
        }
    }
}

fn as_str(v: &Value) -> Option<&str> {
    match v {
        Value::Str(s) => Some(s.as_str()),
        _ => None,
    }
}

fn case_insensitive_match(lit: &Literal, v: &Value) -> bool {
    match (lit, v) {
        (Literal::Str(s), Value::Str(v)) => s.eq_ignore_ascii_case(v),
        _ => lit.matches(v),
    }
}

/// Parses a small infix expression grammar into [`Condition`]:
/// `expr := or_expr`
/// `or_expr := and_expr ('OR' and_expr)*`
/// `and_expr := unary ('AND' unary)*`
/// `unary := 'NOT' unary | '(' expr ')' | cmp`
/// `cmp := path op literal`
pub fn parse(src: &str) -> Result<Condition, SyncError> {
    let tokens = match lex(src) {
        Ok(tokens) => tokens,
        Err(err) => {
            tracing::warn!(src, %err, "condition lex failed");
            return Err(SyncError::Condition(err));
        }
    };
    let mut parser = Parser { tokens, pos: 0 };
    let cond = parser.or_expr().map_err(|err| {
        tracing::warn!(src, %err, "condition parse failed");
        err
    })?;
    if parser.pos != parser.tokens.len() {
        return Err(SyncError::Condition(format!("trailing input at token {}", parser.pos)));
    }
    Ok(cond)
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Path(String),
    Lit(Literal),
    Op(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn lex(src: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else if c == '\'' || c == '"' {
            let quote = c;
            let mut s = String::new();
            i += 1;
            while i < chars.len() && chars[i] != quote {
                s.push(chars[i]);
                i += 1;
            }
            if i >= chars.len() {
                return Err("unterminated string literal".to_string());
            }
            i += 1;
            tokens.push(Token::Lit(Literal::Str(s)));
        } else if "=!<>".contains(c) {
            let mut op = String::new();
            op.push(c);
            i += 1;
            if i < chars.len() && chars[i] == '=' {
                op.push('=');
                i += 1;
            }
            tokens.push(Token::Op(op));
        } else {
            let start = i;
            while i < chars.len() && !chars[i].is_whitespace() && !"()".contains(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            match word.to_ascii_uppercase().as_str() {
                "AND" => tokens.push(Token::And),
                "OR" => tokens.push(Token::Or),
                "NOT" => tokens.push(Token::Not),
                "TRUE" => tokens.push(Token::Lit(Literal::Bool(true))),
                "FALSE" => tokens.push(Token::Lit(Literal::Bool(false))),
                "NULL" => tokens.push(Token::Lit(Literal::Null)),
                _ => {
                    if let Ok(n) = word.parse::<f64>() {
                        tokens.push(Token::Lit(Literal::Num(n)));
                    } else if word.starts_with('/') {
                        tokens.push(Token::Path(word));
                    } else {
                        tokens.push(Token::Path(format!("/{}", word)));
                    }
                }
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn or_expr(&mut self) -> Result<Condition, SyncError> {
        let mut parts = vec![self.and_expr()?];
        while matches!(self.peek(), Some(Token::Or)) {
            self.bump();
            parts.push(self.and_expr()?);
        }
        Ok(if parts.len() == 1 { parts.pop().unwrap() } else { Condition::Or(parts) })
    }

    fn and_expr(&mut self) -> Result<Condition, SyncError> {
        let mut parts = vec![self.unary()?];
        while matches!(self.peek(), Some(Token::And)) {
            self.bump();
            parts.push(self.unary()?);
        }
        Ok(if parts.len() == 1 { parts.pop().unwrap() } else { Condition::And(parts) })
    }

    fn unary(&mut self) -> Result<Condition, SyncError> {
        match self.peek() {
            Some(Token::Not) => {
                self.bump();
                Ok(Condition::Not(Box::new(self.unary()?)))
            }
            Some(Token::LParen) => {
                self.bump();
                let c = self.or_expr()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(c),
                    _ => Err(SyncError::Condition("expected ')'".to_string())),
                }
            }
            _ => self.cmp(),
        }
    }

    fn cmp(&mut self) -> Result<Condition, SyncError> {
        let path = match self.bump() {
            Some(Token::Path(p)) => PathBuf::parse(&p).map_err(|e| SyncError::Condition(e.to_string()))?,
            other => return Err(SyncError::Condition(format!("expected path, found {:?}", other))),
        };
        let op = match self.bump() {
            Some(Token::Op(op)) => op,
            other => return Err(SyncError::Condition(format!("expected operator, found {:?}", other))),
        };
        let lit = match self.bump() {
            Some(Token::Lit(l)) => l,
            other => return Err(SyncError::Condition(format!("expected literal, found {:?}", other))),
        };
        match op.as_str() {
            "==" => Ok(Condition::Eq(path, lit, false)),
            "!=" => Ok(Condition::Ne(path, lit, false)),
            "<" => Ok(Condition::Lt(path, lit)),
            "<=" => Ok(Condition::Le(path, lit)),
            ">" => Ok(Condition::Gt(path, lit)),
            ">=" => Ok(Condition::Ge(path, lit)),
            other => Err(SyncError::Condition(format!("unknown operator {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::Reflect;

    #[test]
    fn parses_comparison() {
        let c = parse("/balance > 0").unwrap();
        assert_eq!(c, Condition::Gt(PathBuf::parse("/balance").unwrap(), Literal::Num(0.0)));
    }

    #[test]
    fn parses_and_not_parens() {
        let c = parse("V > 0 AND NOT (S == 'x')").unwrap();
        match c {
            Condition::And(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(parts[1], Condition::Not(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn eval_against_document() {
        let root = 5i64.to_value();
        let c = Condition::Gt(PathBuf::root(), Literal::Num(0.0));
        assert!(c.eval(&root));
        let c = Condition::Gt(PathBuf::root(), Literal::Num(10.0));
        assert!(!c.eval(&root));
    }

    #[test]
    fn relative_path_rewrite() {
        let c = Condition::Gt(PathBuf::parse("/a/balance").unwrap(), Literal::Num(0.0));
        let rel = c.with_relative_path(&PathBuf::parse("/a").unwrap());
        assert_eq!(rel, Condition::Gt(PathBuf::parse("/balance").unwrap(), Literal::Num(0.0)));
    }
}
