use crate::error::SandboxError;
use crate::lexer::{tokenize, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    NoneLit,
    Name(String),
    Attribute(Box<Expr>, String),
    Subscript(Box<Expr>, Box<Expr>),
    Call { func: Box<Expr>, args: Vec<Expr>, kwargs: Vec<(String, Expr)> },
    Tuple(Vec<Expr>),
    ListLit(Vec<Expr>),
    DictLit(Vec<(Expr, Expr)>),
    SetLit(Vec<Expr>),
    Compare(Box<Expr>, String, Box<Expr>),
    BoolOp(String, Vec<Expr>),
    BinOp(Box<Expr>, String, Box<Expr>),
    UnaryOp(String, Box<Expr>),
    IfExp { body: Box<Expr>, test: Box<Expr>, orelse: Box<Expr> },
    ListComp { elt: Box<Expr>, var: String, iter: Box<Expr>, cond: Option<Box<Expr>> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Assign { target: String, value: Expr },
    Import,
    FunctionDef,
    ClassDef,
    For,
    While,
}

pub fn parse_line(line: &str) -> Result<Stmt, SandboxError> {
    let trimmed = line.trim();
    if trimmed.starts_with("import ") || trimmed.starts_with("from ") {
        return Ok(Stmt::Import);
    }
    if trimmed.starts_with("def ") {
        return Ok(Stmt::FunctionDef);
    }
    if trimmed.starts_with("class ") {
        return Ok(Stmt::ClassDef);
    }
    if trimmed.starts_with("for ") {
        return Ok(Stmt::For);
    }
    if trimmed.starts_with("while ") {
        return Ok(Stmt::While);
    }

    if let Some((target, rest)) = split_top_level_assignment(trimmed) {
        let tokens = tokenize(rest).map_err(SandboxError::Syntax)?;
        let mut parser = Parser { tokens, pos: 0 };
        let value = parser.parse_ternary()?;
        return Ok(Stmt::Assign { target, value });
    }

    let tokens = tokenize(trimmed).map_err(SandboxError::Syntax)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_ternary()?;
    Ok(Stmt::Expr(expr))
}

/// Finds a top-level `=` (not `==`, `<=`, `>=`, `!=`) outside any bracket
/// nesting, and splits `target = rest`.
fn split_top_level_assignment(line: &str) -> Option<(String, &str)> {
    let bytes = line.as_bytes();
    let mut depth = 0i32;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '=' if depth == 0 => {
                let prev = if i > 0 { chars[i - 1] } else { ' ' };
                let next = if i + 1 < chars.len() { chars[i + 1] } else { ' ' };
                if prev != '=' && prev != '!' && prev != '<' && prev != '>' && next != '=' {
                    let target = line[..i].trim().to_string();
                    let rest = &line[i + 1..];
                    if is_simple_identifier(&target) {
                        return Some((target, rest));
                    }
                    return None;
                }
            }
            _ => {}
        }
        i += 1;
    }
    let _ = bytes;
    None
}

fn is_simple_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().map(|c| c.is_alphabetic() || c == '_').unwrap_or(false)
        && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type PResult<T> = Result<T, SandboxError>;

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Token::Op(o) if o == op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Token::Keyword(k) if k == kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(SandboxError::Syntax(format!("expected '{op}', found {:?}", self.peek())))
        }
    }

    fn parse_ternary(&mut self) -> PResult<Expr> {
        let body = self.parse_bool_or()?;
        if self.eat_kw("if") {
            let test = self.parse_bool_or()?;
            if !self.eat_kw("else") {
                return Err(SandboxError::Syntax("expected 'else' in ternary".to_string()));
            }
            let orelse = self.parse_ternary()?;
            return Ok(Expr::IfExp { body: Box::new(body), test: Box::new(test), orelse: Box::new(orelse) });
        }
        Ok(body)
    }

    fn parse_bool_or(&mut self) -> PResult<Expr> {
        let mut parts = vec![self.parse_bool_and()?];
        while self.eat_kw("or") {
            parts.push(self.parse_bool_and()?);
        }
        Ok(if parts.len() == 1 { parts.pop().unwrap() } else { Expr::BoolOp("or".to_string(), parts) })
    }

    fn parse_bool_and(&mut self) -> PResult<Expr> {
        let mut parts = vec![self.parse_not()?];
        while self.eat_kw("and") {
            parts.push(self.parse_not()?);
        }
        Ok(if parts.len() == 1 { parts.pop().unwrap() } else { Expr::BoolOp("and".to_string(), parts) })
    }

    fn parse_not(&mut self) -> PResult<Expr> {
        if self.eat_kw("not") {
            let inner = self.parse_not()?;
            return Ok(Expr::UnaryOp("not".to_string(), Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let left = self.parse_add_sub()?;
        const CMP_OPS: [&str; 6] = ["==", "!=", "<", ">", "<=", ">="];
        if let Token::Op(o) = self.peek().clone() {
            if CMP_OPS.contains(&o.as_str()) {
                self.advance();
                let right = self.parse_add_sub()?;
                return Ok(Expr::Compare(Box::new(left), o, Box::new(right)));
            }
        }
        if self.eat_kw("in") {
            let right = self.parse_add_sub()?;
            return Ok(Expr::Compare(Box::new(left), "in".to_string(), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_add_sub(&mut self) -> PResult<Expr> {
        let mut left = self.parse_mul_div()?;
        loop {
            if let Token::Op(o) = self.peek().clone() {
                if o == "+" || o == "-" {
                    self.advance();
                    let right = self.parse_mul_div()?;
                    left = Expr::BinOp(Box::new(left), o, Box::new(right));
                    continue;
                }
            }
            break;
        }
        Ok(left)
    }

    fn parse_mul_div(&mut self) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            if let Token::Op(o) = self.peek().clone() {
                if o == "*" || o == "/" || o == "%" || o == "//" {
                    self.advance();
                    let right = self.parse_unary()?;
                    left = Expr::BinOp(Box::new(left), o, Box::new(right));
                    continue;
                }
            }
            break;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        if self.eat_op("-") {
            let inner = self.parse_unary()?;
            return Ok(Expr::UnaryOp("-".to_string(), Box::new(inner)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        let base = self.parse_postfix()?;
        if self.eat_op("**") {
            let exp = self.parse_unary()?;
            return Ok(Expr::BinOp(Box::new(base), "**".to_string(), Box::new(exp)));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.eat_op(".") {
                let name = match self.advance() {
                    Token::Name(n) => n,
                    Token::Keyword(k) => k,
                    other => return Err(SandboxError::Syntax(format!("expected attribute name, found {other:?}"))),
                };
                expr = Expr::Attribute(Box::new(expr), name);
                continue;
            }
            if self.eat_op("[") {
                let index = self.parse_subscript_index()?;
                self.expect_op("]")?;
                expr = Expr::Subscript(Box::new(expr), Box::new(index));
                continue;
            }
            if self.eat_op("(") {
                let (args, kwargs) = self.parse_call_args()?;
                expr = Expr::Call { func: Box::new(expr), args, kwargs };
                continue;
            }
            break;
        }
        Ok(expr)
    }

    fn parse_subscript_index(&mut self) -> PResult<Expr> {
        // allow `df[a, b]` and `df[(a, b)]` to both parse as a tuple index
        let first = self.parse_ternary()?;
        if matches!(self.peek(), Token::Op(o) if o == ",") {
            let mut items = vec![first];
            while self.eat_op(",") {
                if matches!(self.peek(), Token::Op(o) if o == "]") {
                    break;
                }
                items.push(self.parse_ternary()?);
            }
            return Ok(Expr::Tuple(items));
        }
        Ok(first)
    }

    fn parse_call_args(&mut self) -> PResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if self.eat_op(")") {
            return Ok((args, kwargs));
        }
        loop {
            if let Token::Name(name) = self.peek().clone() {
                if matches!(self.tokens.get(self.pos + 1), Some(Token::Op(o)) if o == "=") {
                    self.advance();
                    self.advance();
                    let value = self.parse_ternary()?;
                    kwargs.push((name, value));
                    if self.eat_op(",") {
                        continue;
                    }
                    self.expect_op(")")?;
                    break;
                }
            }
            args.push(self.parse_ternary()?);
            if self.eat_op(",") {
                continue;
            }
            self.expect_op(")")?;
            break;
        }
        Ok((args, kwargs))
    }

    fn parse_atom(&mut self) -> PResult<Expr> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Num(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Name(n) if n == "True" => Ok(Expr::Bool(true)),
            Token::Name(n) if n == "False" => Ok(Expr::Bool(false)),
            Token::Name(n) if n == "None" => Ok(Expr::NoneLit),
            Token::Name(n) => Ok(Expr::Name(n)),
            Token::Op(o) if o == "(" => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_ternary()?;
                if self.eat_op(",") {
                    let mut items = vec![first];
                    while !matches!(self.peek(), Token::Op(o) if o == ")") {
                        items.push(self.parse_ternary()?);
                        if !self.eat_op(",") {
                            break;
                        }
                    }
                    self.expect_op(")")?;
                    return Ok(Expr::Tuple(items));
                }
                self.expect_op(")")?;
                Ok(first)
            }
            Token::Op(o) if o == "[" => self.parse_list_or_comprehension(),
            Token::Op(o) if o == "{" => self.parse_dict_or_set(),
            other => Err(SandboxError::Syntax(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_list_or_comprehension(&mut self) -> PResult<Expr> {
        if self.eat_op("]") {
            return Ok(Expr::ListLit(Vec::new()));
        }
        let first = self.parse_ternary()?;
        if self.eat_kw("for") {
            let var = match self.advance() {
                Token::Name(n) => n,
                other => return Err(SandboxError::Syntax(format!("expected loop variable, found {other:?}"))),
            };
            if !self.eat_kw("in") {
                return Err(SandboxError::Syntax("expected 'in' in comprehension".to_string()));
            }
            let iter = self.parse_ternary()?;
            let cond = if self.eat_kw("if") { Some(Box::new(self.parse_ternary()?)) } else { None };
            self.expect_op("]")?;
            return Ok(Expr::ListComp { elt: Box::new(first), var, iter: Box::new(iter), cond });
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if matches!(self.peek(), Token::Op(o) if o == "]") {
                break;
            }
            items.push(self.parse_ternary()?);
        }
        self.expect_op("]")?;
        Ok(Expr::ListLit(items))
    }

    fn parse_dict_or_set(&mut self) -> PResult<Expr> {
        if self.eat_op("}") {
            return Ok(Expr::DictLit(Vec::new()));
        }
        let first_key = self.parse_ternary()?;
        if self.eat_op(":") {
            let first_val = self.parse_ternary()?;
            let mut pairs = vec![(first_key, first_val)];
            while self.eat_op(",") {
                if matches!(self.peek(), Token::Op(o) if o == "}") {
                    break;
                }
                let k = self.parse_ternary()?;
                self.expect_op(":")?;
                let v = self.parse_ternary()?;
                pairs.push((k, v));
            }
            self.expect_op("}")?;
            return Ok(Expr::DictLit(pairs));
        }
        let mut items = vec![first_key];
        while self.eat_op(",") {
            if matches!(self.peek(), Token::Op(o) if o == "}") {
                break;
            }
            items.push(self.parse_ternary()?);
        }
        self.expect_op("}")?;
        Ok(Expr::SetLit(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_method_call_expression() {
        let stmt = parse_line("df['sales'].sum()").unwrap();
        assert!(matches!(stmt, Stmt::Expr(Expr::Call { .. })));
    }

    #[test]
    fn parses_assignment_to_result() {
        let stmt = parse_line("__result__ = df['sales'].mean()").unwrap();
        match stmt {
            Stmt::Assign { target, .. } => assert_eq!(target, "__result__"),
            _ => panic!("expected assignment"),
        }
    }

    #[test]
    fn parses_tuple_subscript() {
        let stmt = parse_line("df[(a, b)]").unwrap();
        if let Stmt::Expr(Expr::Subscript(_, idx)) = stmt {
            assert!(matches!(*idx, Expr::Tuple(_)));
        } else {
            panic!("expected subscript");
        }
    }

    #[test]
    fn parses_ternary() {
        let stmt = parse_line("1 if x > 0 else 2").unwrap();
        assert!(matches!(stmt, Stmt::Expr(Expr::IfExp { .. })));
    }

    #[test]
    fn flags_import_statement() {
        assert_eq!(parse_line("import os").unwrap(), Stmt::Import);
    }

    #[test]
    fn flags_for_loop() {
        assert_eq!(parse_line("for x in y: pass").unwrap(), Stmt::For);
    }
}
