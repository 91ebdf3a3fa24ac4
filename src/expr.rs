//! A small expression language for conditions and bind validators.
//!
//! Supported: integer, float, string (`'..'` or `".."`) and boolean
//! literals, `$` (the value being validated), bare identifiers (looked up as
//! properties), function calls, the operators
//! `! * / % + - < <= > >= == != && ||` and parentheses.
//!
//! Built-in functions: `has(key)`, `prop(key[, default])`,
//! `contains(s, sub)`, `len(s)`, `lower(s)`, `upper(s)` and
//! `matches(s, regex)`. More can be added with [`register_express_fn`].
//!
//! ```rust
//! use springlet::expr::{eval, Scope, Value};
//!
//! let lookup = |k: &str| (k == "server.port").then(|| "8080".to_string());
//! let scope = Scope::new().with_props(&lookup);
//! assert_eq!(eval("server.port > 1024 && has('server.port')", &scope).unwrap(), Value::Bool(true));
//!
//! let scope = Scope::new().with_dollar(Value::Int(3));
//! assert_eq!(eval("$ % 2 == 1", &scope).unwrap(), Value::Bool(true));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Runtime value of an expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Interprets property text: integers, floats and booleans are
    /// recognised, anything else stays a string.
    pub fn from_text(s: &str) -> Value {
        let t = s.trim();
        if let Ok(i) = t.parse::<i64>() {
            return Value::Int(i);
        }
        // "inf" and "nan" stay strings
        if t.bytes().any(|b| b.is_ascii_digit()) {
            if let Ok(f) = t.parse::<f64>() {
                return Value::Float(f);
            }
        }
        match t {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Str(s.to_string()),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => f.write_str(s),
        }
    }
}

/// A function callable from expressions.
pub type ExprFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

static FUNCS: Lazy<RwLock<HashMap<String, ExprFn>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers a custom expression function.
///
/// ```rust
/// use springlet::expr::{eval, register_express_fn, Scope, Value};
///
/// register_express_fn("double", |args| match args {
///     [Value::Int(i)] => Ok(Value::Int(i * 2)),
///     _ => Err(springlet::Error::msg("double expects one int")),
/// });
/// assert_eq!(eval("double(21)", &Scope::new()).unwrap(), Value::Int(42));
/// ```
pub fn register_express_fn<F>(name: &str, f: F)
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
{
    FUNCS.write().insert(name.to_string(), Arc::new(f));
}

/// Evaluation environment.
#[derive(Default)]
pub struct Scope<'a> {
    dollar: Option<Value>,
    props: Option<&'a dyn Fn(&str) -> Option<String>>,
}

impl<'a> Scope<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `$`.
    pub fn with_dollar(mut self, v: Value) -> Self {
        self.dollar = Some(v);
        self
    }

    /// Sets the property lookup used by identifiers, `has` and `prop`.
    pub fn with_props(mut self, props: &'a dyn Fn(&str) -> Option<String>) -> Self {
        self.props = Some(props);
        self
    }

    fn prop(&self, key: &str) -> Option<String> {
        self.props.and_then(|p| p(key))
    }
}

/// Parses and evaluates `src`.
pub fn eval(src: &str, scope: &Scope<'_>) -> Result<Value> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.expr(0)?;
    if parser.pos < parser.tokens.len() {
        return Err(Error::Expression(format!(
            "unexpected token {:?} in \"{}\"",
            parser.tokens[parser.pos], src
        )));
    }
    ast.eval(scope)
}

/// Evaluates `src` and requires a boolean result.
pub fn eval_bool(src: &str, scope: &Scope<'_>) -> Result<bool> {
    match eval(src, scope)? {
        Value::Bool(b) => Ok(b),
        v => Err(Error::Expression(format!(
            "\"{}\" evaluates to {} {}, not bool",
            src,
            v.type_name(),
            v
        ))),
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Dollar,
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

const OPS: [&str; 15] = [
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%", "=",
];

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                out.push(Token::LParen);
                i += 1;
            }
            ')' => {
                out.push(Token::RParen);
                i += 1;
            }
            ',' => {
                out.push(Token::Comma);
                i += 1;
            }
            '$' => {
                out.push(Token::Dollar);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(Error::Expression(format!("unterminated string in \"{}\"", src))),
                        Some('\\') => {
                            if let Some(n) = chars.get(i + 1) {
                                s.push(match n {
                                    'n' => '\n',
                                    't' => '\t',
                                    other => *other,
                                });
                            }
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                out.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if text.contains('.') {
                    let f = text
                        .parse::<f64>()
                        .map_err(|_| Error::Expression(format!("bad number {}", text)))?;
                    out.push(Token::Float(f));
                } else {
                    let n = text
                        .parse::<i64>()
                        .map_err(|_| Error::Expression(format!("bad number {}", text)))?;
                    out.push(Token::Int(n));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                out.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let op = OPS
                    .iter()
                    .find(|op| rest.starts_with(**op))
                    .ok_or_else(|| Error::Expression(format!("unexpected character '{}' in \"{}\"", c, src)))?;
                if *op == "=" {
                    return Err(Error::Expression(format!("use == for comparison in \"{}\"", src)));
                }
                out.push(Token::Op(*op));
                i += op.len();
            }
        }
    }
    Ok(out)
}

#[derive(Debug)]
enum Ast {
    Lit(Value),
    Dollar,
    Ident(String),
    Call(String, Vec<Ast>),
    Not(Box<Ast>),
    Neg(Box<Ast>),
    Binary(&'static str, Box<Ast>, Box<Ast>),
}

fn precedence(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "==" | "!=" => 3,
        "<" | "<=" | ">" | ">=" => 4,
        "+" | "-" => 5,
        "*" | "/" | "%" => 6,
        _ => return None,
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expr(&mut self, min_prec: u8) -> Result<Ast> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(op)) => *op,
                _ => break,
            };
            let prec = match precedence(op) {
                Some(p) if p > min_prec => p,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.expr(prec)?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Ast> {
        match self.peek() {
            Some(Token::Op("!")) => {
                self.pos += 1;
                Ok(Ast::Not(Box::new(self.unary()?)))
            }
            Some(Token::Op("-")) => {
                self.pos += 1;
                Ok(Ast::Neg(Box::new(self.unary()?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Ast> {
        match self.next() {
            Some(Token::Int(i)) => Ok(Ast::Lit(Value::Int(i))),
            Some(Token::Float(f)) => Ok(Ast::Lit(Value::Float(f))),
            Some(Token::Str(s)) => Ok(Ast::Lit(Value::Str(s))),
            Some(Token::Dollar) => Ok(Ast::Dollar),
            Some(Token::LParen) => {
                let inner = self.expr(0)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(Error::Expression("missing ')'".to_string())),
                }
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() == Some(&Token::RParen) {
                        self.pos += 1;
                        return Ok(Ast::Call(name, args));
                    }
                    loop {
                        args.push(self.expr(0)?);
                        match self.next() {
                            Some(Token::Comma) => continue,
                            Some(Token::RParen) => break,
                            _ => return Err(Error::Expression(format!("bad arguments to {}", name))),
                        }
                    }
                    return Ok(Ast::Call(name, args));
                }
                Ok(match name.as_str() {
                    "true" => Ast::Lit(Value::Bool(true)),
                    "false" => Ast::Lit(Value::Bool(false)),
                    "nil" => Ast::Lit(Value::Nil),
                    _ => Ast::Ident(name),
                })
            }
            other => Err(Error::Expression(format!("unexpected {:?}", other))),
        }
    }
}

impl Ast {
    fn eval(&self, scope: &Scope<'_>) -> Result<Value> {
        match self {
            Ast::Lit(v) => Ok(v.clone()),
            Ast::Dollar => scope
                .dollar
                .clone()
                .ok_or_else(|| Error::Expression("$ is not bound here".to_string())),
            Ast::Ident(name) => scope
                .prop(name)
                .map(|s| Value::from_text(&s))
                .ok_or_else(|| Error::Expression(format!("unknown identifier {}", name))),
            Ast::Call(name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(a.eval(scope)?);
                }
                call(name, &values, scope)
            }
            Ast::Not(inner) => match inner.eval(scope)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                v => Err(Error::Expression(format!("operator ! requires bool, got {}", v.type_name()))),
            },
            Ast::Neg(inner) => match inner.eval(scope)? {
                Value::Int(i) => Ok(Value::Int(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                v => Err(Error::Expression(format!("operator - requires number, got {}", v.type_name()))),
            },
            Ast::Binary(op, l, r) => match *op {
                "&&" | "||" => {
                    let lv = as_bool(op, l.eval(scope)?)?;
                    if (*op == "&&" && !lv) || (*op == "||" && lv) {
                        return Ok(Value::Bool(lv));
                    }
                    Ok(Value::Bool(as_bool(op, r.eval(scope)?)?))
                }
                _ => binary(op, l.eval(scope)?, r.eval(scope)?),
            },
        }
    }
}

fn as_bool(op: &str, v: Value) -> Result<bool> {
    match v {
        Value::Bool(b) => Ok(b),
        v => Err(Error::Expression(format!("operator {} requires bool, got {}", op, v.type_name()))),
    }
}

fn binary(op: &str, l: Value, r: Value) -> Result<Value> {
    use Value::*;
    let mismatch = |l: &Value, r: &Value| {
        Error::Expression(format!(
            "operator {} not defined on {} and {}",
            op,
            l.type_name(),
            r.type_name()
        ))
    };
    match op {
        "==" | "!=" => {
            let eq = match (&l, &r) {
                (Int(a), Int(b)) => a == b,
                (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => a.as_f64() == b.as_f64(),
                (Str(a), Str(b)) => a == b,
                (Bool(a), Bool(b)) => a == b,
                (Nil, Nil) => true,
                (a, b) => a.to_string() == b.to_string(),
            };
            Ok(Bool(if op == "==" { eq } else { !eq }))
        }
        "<" | "<=" | ">" | ">=" => {
            let ord = match (&l, &r) {
                (Int(a), Int(b)) => a.partial_cmp(b),
                (Str(a), Str(b)) => a.partial_cmp(b),
                (a, b) => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => return Err(mismatch(a, b)),
                },
            };
            let ord = ord.ok_or_else(|| Error::Expression("comparison with NaN".to_string()))?;
            use std::cmp::Ordering::*;
            Ok(Bool(match op {
                "<" => ord == Less,
                "<=" => ord != Greater,
                ">" => ord == Greater,
                _ => ord != Less,
            }))
        }
        "+" => match (&l, &r) {
            (Int(a), Int(b)) => a
                .checked_add(*b)
                .map(Int)
                .ok_or_else(|| Error::Expression("integer overflow".to_string())),
            (Str(_), _) | (_, Str(_)) => Ok(Str(format!("{}{}", l, r))),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(Float(x + y)),
                _ => Err(mismatch(a, b)),
            },
        },
        "-" | "*" | "/" | "%" => match (&l, &r) {
            (Int(a), Int(b)) => {
                let v = match op {
                    "-" => a.checked_sub(*b),
                    "*" => a.checked_mul(*b),
                    "/" => a.checked_div(*b),
                    _ => a.checked_rem(*b),
                };
                v.map(Int)
                    .ok_or_else(|| Error::Expression(format!("invalid integer operation {} {} {}", a, op, b)))
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(Float(match op {
                    "-" => x - y,
                    "*" => x * y,
                    "/" => x / y,
                    _ => x % y,
                })),
                _ => Err(mismatch(a, b)),
            },
        },
        _ => Err(Error::Expression(format!("unknown operator {}", op))),
    }
}

fn call(name: &str, args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(Error::Expression(format!("{}() takes {} arguments, got {}", name, n, args.len())))
        }
    };
    match name {
        "has" => {
            arity(1)?;
            Ok(Value::Bool(scope.prop(&args[0].to_string()).is_some()))
        }
        "prop" => {
            if args.is_empty() || args.len() > 2 {
                return Err(Error::Expression("prop() takes 1 or 2 arguments".to_string()));
            }
            match scope.prop(&args[0].to_string()) {
                Some(v) => Ok(Value::from_text(&v)),
                None => Ok(args.get(1).cloned().unwrap_or(Value::Nil)),
            }
        }
        "contains" => {
            arity(2)?;
            Ok(Value::Bool(args[0].to_string().contains(&args[1].to_string())))
        }
        "len" => {
            arity(1)?;
            Ok(Value::Int(args[0].to_string().chars().count() as i64))
        }
        "lower" => {
            arity(1)?;
            Ok(Value::Str(args[0].to_string().to_lowercase()))
        }
        "upper" => {
            arity(1)?;
            Ok(Value::Str(args[0].to_string().to_uppercase()))
        }
        "matches" => {
            arity(2)?;
            let re = regex::Regex::new(&args[1].to_string())
                .map_err(|e| Error::Expression(format!("invalid regexp '{}': {}", args[1], e)))?;
            Ok(Value::Bool(re.is_match(&args[0].to_string())))
        }
        _ => {
            let f = FUNCS.read().get(name).cloned();
            match f {
                Some(f) => f(args),
                None => Err(Error::Expression(format!("unknown function {}", name))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> Result<Value> {
        eval(src, &Scope::new())
    }

    #[test]
    fn test_precedence_and_arithmetic() {
        assert_eq!(run("1 + 2 * 3").unwrap(), Value::Int(7));
        assert_eq!(run("(1 + 2) * 3").unwrap(), Value::Int(9));
        assert_eq!(run("10 - 4 - 3").unwrap(), Value::Int(3));
        assert_eq!(run("7 / 2.0").unwrap(), Value::Float(3.5));
        assert_eq!(run("-3 + 1").unwrap(), Value::Int(-2));
        assert_eq!(run("'a' + 1").unwrap(), Value::Str("a1".into()));
    }

    #[test]
    fn test_logic_short_circuits() {
        assert_eq!(run("false && missing()").unwrap(), Value::Bool(false));
        assert_eq!(run("true || missing()").unwrap(), Value::Bool(true));
        assert_eq!(run("!(1 < 2) || 2 >= 2").unwrap(), Value::Bool(true));
        assert!(run("1 && true").is_err());
    }

    #[test]
    fn test_builtins_over_properties() {
        let lookup = |k: &str| match k {
            "env" => Some("prod".to_string()),
            "replicas" => Some("3".to_string()),
            _ => None,
        };
        let scope = Scope::new().with_props(&lookup);
        assert_eq!(eval("env == 'prod' && replicas >= 3", &scope).unwrap(), Value::Bool(true));
        assert_eq!(eval("has('env') && !has('x')", &scope).unwrap(), Value::Bool(true));
        assert_eq!(eval("prop('x', 'd')", &scope).unwrap(), Value::Str("d".into()));
        assert_eq!(eval("matches(env, '^pr')", &scope).unwrap(), Value::Bool(true));
        assert!(eval("unknown_key == 1", &scope).is_err());
    }

    #[test]
    fn test_eval_bool_rejects_non_bool() {
        assert!(eval_bool("1 + 1", &Scope::new()).is_err());
        assert!(eval_bool("1 = 1", &Scope::new()).is_err());
        assert!(eval_bool("(1 == 1", &Scope::new()).is_err());
    }

    #[test]
    fn test_dollar_binding() {
        let scope = Scope::new().with_dollar(Value::from_text("42"));
        assert!(eval_bool("$ > 18 && $ < 100", &scope).unwrap());
        assert!(eval("$", &Scope::new()).is_err());
    }
}
