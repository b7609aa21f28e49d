//! `${fn(arg, arg, ...)}` template grammar evaluation.
//!
//! The evaluator is side-effect free except for `uuid` and `timestamp`, does
//! no I/O beyond environment-variable lookup, and rejects expressions
//! nested more than 32 calls deep.

use std::fmt;

const MAX_RECURSION_DEPTH: u32 = 32;

/// Per-request values the template grammar can read. Implemented by the
/// phase pipeline's request/response snapshot wrapper.
pub trait TemplateContext {
    fn header(&self, name: &str) -> Option<String>;
    fn query(&self, name: &str) -> Option<String>;
    fn cookie(&self, name: &str) -> Option<String>;
    fn param(&self, name: &str) -> Option<String>;
    fn request_field(&self, field: &str) -> Option<String>;
}

#[derive(Debug, PartialEq)]
pub enum TemplateError {
    RecursionLimitExceeded,
    UnexpectedEnd,
    UnexpectedChar(char),
    UnknownFunction(String),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::RecursionLimitExceeded => write!(f, "template recursion depth exceeded"),
            TemplateError::UnexpectedEnd => write!(f, "unexpected end of template expression"),
            TemplateError::UnexpectedChar(c) => write!(f, "unexpected character '{c}'"),
            TemplateError::UnknownFunction(name) => write!(f, "unknown template function '{name}'"),
        }
    }
}

/// Render `text`, substituting every `${...}` expression. Undefined
/// identifiers and lookups evaluate to the empty string; only grammar-level
/// errors (recursion depth, malformed syntax) are returned as `Err`.
pub fn render(text: &str, ctx: &dyn TemplateContext) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(text.len());
    let bytes: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == '$' && bytes.get(i + 1) == Some(&'{') {
            let mut parser = Parser { chars: &bytes, pos: i + 2 };
            let value = parser.parse_call(0, ctx)?;
            parser.skip_ws();
            if parser.chars.get(parser.pos) != Some(&'}') {
                return Err(TemplateError::UnexpectedEnd);
            }
            out.push_str(&value);
            i = parser.pos + 1;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Truthiness used by `if_cond`: non-empty string is true.
pub fn truthy(v: &str) -> bool {
    !v.is_empty()
}

enum Arg {
    Value(String),
}

struct Parser<'a> {
    chars: &'a [char],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while matches!(self.chars.get(self.pos), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    /// Parse `fn(arg, arg, ...)` or a bare identifier/number/quoted string as
    /// a leaf argument, returning its evaluated string value.
    fn parse_call(&mut self, depth: u32, ctx: &dyn TemplateContext) -> Result<String, TemplateError> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(TemplateError::RecursionLimitExceeded);
        }
        self.skip_ws();
        match self.peek() {
            Some('\'') => self.parse_quoted(),
            Some(c) if c.is_alphanumeric() || c == '_' => {
                let ident = self.parse_ident();
                self.skip_ws();
                if self.peek() == Some('(') {
                    self.pos += 1;
                    let args = self.parse_args(depth, ctx)?;
                    self.skip_ws();
                    if self.peek() != Some(')') {
                        return Err(TemplateError::UnexpectedEnd);
                    }
                    self.pos += 1;
                    eval_function(&ident, &args, ctx)
                } else {
                    // bare identifier evaluates to empty string per grammar
                    Ok(String::new())
                }
            }
            Some(c) => Err(TemplateError::UnexpectedChar(c)),
            None => Err(TemplateError::UnexpectedEnd),
        }
    }

    fn parse_ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn parse_quoted(&mut self) -> Result<String, TemplateError> {
        self.pos += 1; // opening quote
        let mut s = String::new();
        loop {
            match self.peek() {
                Some('\'') => {
                    self.pos += 1;
                    return Ok(s);
                }
                Some('\\') => {
                    self.pos += 1;
                    if let Some(c) = self.peek() {
                        s.push(c);
                        self.pos += 1;
                    }
                }
                Some(c) => {
                    s.push(c);
                    self.pos += 1;
                }
                None => return Err(TemplateError::UnexpectedEnd),
            }
        }
    }

    fn parse_args(&mut self, depth: u32, ctx: &dyn TemplateContext) -> Result<Vec<Arg>, TemplateError> {
        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            return Ok(args);
        }
        loop {
            let v = self.parse_call(depth + 1, ctx)?;
            args.push(Arg::Value(v));
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                    self.skip_ws();
                }
                _ => break,
            }
        }
        Ok(args)
    }
}

fn arg_str(args: &[Arg], idx: usize) -> &str {
    match args.get(idx) {
        Some(Arg::Value(v)) => v.as_str(),
        None => "",
    }
}

fn eval_function(name: &str, args: &[Arg], ctx: &dyn TemplateContext) -> Result<String, TemplateError> {
    Ok(match name {
        "header" => ctx.header(arg_str(args, 0)).unwrap_or_default(),
        "query" => ctx.query(arg_str(args, 0)).unwrap_or_else(|| arg_str(args, 1).to_string()),
        "cookie" => ctx.cookie(arg_str(args, 0)).unwrap_or_else(|| arg_str(args, 1).to_string()),
        "param" => ctx.param(arg_str(args, 0)).unwrap_or_else(|| arg_str(args, 1).to_string()),
        "request" => ctx.request_field(arg_str(args, 0)).unwrap_or_default(),
        "env" => std::env::var(arg_str(args, 0)).unwrap_or_default(),
        "uuid" => match arg_str(args, 0) {
            "v7" => uuid::Uuid::now_v7().to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        },
        "timestamp" => chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "or" => args
            .iter()
            .map(|a| match a {
                Arg::Value(v) => v.as_str(),
            })
            .find(|v| !v.is_empty())
            .unwrap_or("")
            .to_string(),
        "eq" => {
            let eq = arg_str(args, 0) == arg_str(args, 1);
            if args.len() > 2 {
                if eq { arg_str(args, 2).to_string() } else { String::new() }
            } else {
                eq.to_string()
            }
        }
        "neq" => {
            let neq = arg_str(args, 0) != arg_str(args, 1);
            if args.len() > 2 {
                if neq { arg_str(args, 2).to_string() } else { String::new() }
            } else {
                neq.to_string()
            }
        }
        "concat" => args
            .iter()
            .map(|a| match a {
                Arg::Value(v) => v.as_str(),
            })
            .collect::<String>(),
        "upper" => arg_str(args, 0).to_uppercase(),
        "lower" => arg_str(args, 0).to_lowercase(),
        "len" => arg_str(args, 0).chars().count().to_string(),
        "if_cond" => {
            if truthy(arg_str(args, 0)) {
                arg_str(args, 1).to_string()
            } else {
                arg_str(args, 2).to_string()
            }
        }
        other => return Err(TemplateError::UnknownFunction(other.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullContext;
    impl TemplateContext for NullContext {
        fn header(&self, _: &str) -> Option<String> {
            None
        }
        fn query(&self, _: &str) -> Option<String> {
            None
        }
        fn cookie(&self, _: &str) -> Option<String> {
            None
        }
        fn param(&self, _: &str) -> Option<String> {
            None
        }
        fn request_field(&self, _: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn template_round_trip_p6() {
        // P6: ${concat(upper(lower('AB')), '-', len('abc'))} = "AB-3"
        let out = render("${concat(upper(lower('AB')), '-', len('abc'))}", &NullContext).unwrap();
        assert_eq!(out, "AB-3");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(render("no expressions here", &NullContext).unwrap(), "no expressions here");
    }

    #[test]
    fn mixed_text_and_expression() {
        let out = render("status=${or('', 'ok')}!", &NullContext).unwrap();
        assert_eq!(out, "status=ok!");
    }

    #[test]
    fn if_cond_truthiness() {
        assert_eq!(render("${if_cond('x', 'yes', 'no')}", &NullContext).unwrap(), "yes");
        assert_eq!(render("${if_cond('', 'yes', 'no')}", &NullContext).unwrap(), "no");
    }

    #[test]
    fn undefined_identifier_is_empty_string() {
        assert_eq!(render("${concat('a', undefined_ident, 'b')}", &NullContext).unwrap(), "ab");
    }

    #[test]
    fn recursion_depth_is_bounded() {
        let mut expr = "x".to_string();
        for _ in 0..40 {
            expr = format!("concat({expr})");
        }
        let full = format!("${{{expr}}}");
        let err = render(&full, &NullContext).unwrap_err();
        assert_eq!(err, TemplateError::RecursionLimitExceeded);
    }

    #[test]
    fn unknown_function_is_an_error() {
        let err = render("${nope('x')}", &NullContext).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownFunction(_)));
    }

    #[test]
    fn uuid_v7_is_a_valid_uuid() {
        let out = render("${uuid(v7)}", &NullContext).unwrap();
        assert!(uuid::Uuid::parse_str(&out).is_ok());
    }
}
