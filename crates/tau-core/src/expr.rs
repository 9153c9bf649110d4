//! Expression engine for selections, weights and variables.
//!
//! Expressions are written against the columns of an event table and are
//! compiled once into an AST. Supported syntax:
//!
//! - arithmetic `+ - * /`, unary `-` and `!`
//! - comparisons `== != < <= > >=` and boolean `&& ||` (booleans are 0/1)
//! - the conditional `c ? a : b` (right-associative, lowest precedence)
//! - functions `abs fabs sqrt log log10 exp pow min max`, optionally
//!   prefixed with `TMath::` (case-insensitive)
//! - literals `true` / `false`
//! - column names `[A-Za-z_][A-Za-z0-9_.]*`, so flattened names such as
//!   `Tau.pt` are one identifier

use crate::error::{Error, Result};

// ── AST ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Var(usize), // index into required_branches
    UnaryNeg(Box<Expr>),
    UnaryNot(Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Log10,
    Exp,
    Pow,
    Min,
    Max,
}

impl Func {
    fn from_ident(name: &str) -> Option<Self> {
        let bare = name.strip_prefix("TMath::").unwrap_or(name);
        match bare.to_ascii_lowercase().as_str() {
            "abs" | "fabs" => Some(Func::Abs),
            "sqrt" => Some(Func::Sqrt),
            "log" => Some(Func::Log),
            "log10" => Some(Func::Log10),
            "exp" => Some(Func::Exp),
            "pow" | "power" => Some(Func::Pow),
            "min" => Some(Func::Min),
            "max" => Some(Func::Max),
            _ => None,
        }
    }

    fn arity(self) -> usize {
        match self {
            Func::Pow | Func::Min | Func::Max => 2,
            _ => 1,
        }
    }
}

// ── Compiled expression ────────────────────────────────────────

/// A compiled expression ready for evaluation.
///
/// Identifiers in the expression are mapped to column names.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    ast: Expr,
    source: String,
    /// Column names referenced by this expression (ordered by first occurrence).
    pub required_branches: Vec<String>,
}

impl CompiledExpr {
    /// Parse and compile an expression string.
    pub fn compile(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(Error::Expression("empty expression".into()));
        }
        let mut parser = Parser::new(&tokens);
        let ast = parser.parse_ternary()?;
        if parser.pos < parser.tokens.len() {
            return Err(Error::Expression(format!(
                "unexpected token after expression in '{}': {:?}",
                input, parser.tokens[parser.pos]
            )));
        }
        let branches = std::mem::take(&mut parser.branches);
        Ok(CompiledExpr { ast, source: input.to_string(), required_branches: branches })
    }

    /// Compile `input` unless it is blank (an absent cut or weight).
    pub fn compile_opt(input: &str) -> Result<Option<Self>> {
        if input.trim().is_empty() { Ok(None) } else { Self::compile(input).map(Some) }
    }

    /// The expression text this was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate the expression for a single row.
    ///
    /// `values` must have the same length and order as `required_branches`.
    pub fn eval_row(&self, values: &[f64]) -> f64 {
        eval_expr(&self.ast, values)
    }

    /// Evaluate the expression for all rows (column-wise).
    ///
    /// `columns` must have the same length and order as `required_branches`;
    /// each column must have the same number of entries.
    pub fn eval_bulk(&self, columns: &[&[f64]]) -> Vec<f64> {
        if columns.is_empty() {
            // Constant expression: evaluate once
            return vec![eval_expr(&self.ast, &[])];
        }
        let n = columns[0].len();
        let mut row = vec![0.0f64; columns.len()];
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            for (j, col) in columns.iter().enumerate() {
                row[j] = col[i];
            }
            out.push(eval_expr(&self.ast, &row));
        }
        out
    }
}

// ── Evaluation ─────────────────────────────────────────────────

#[inline]
fn truth(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn eval_expr(e: &Expr, vals: &[f64]) -> f64 {
    match e {
        Expr::Number(n) => *n,
        Expr::Var(i) => vals[*i],
        Expr::UnaryNeg(a) => -eval_expr(a, vals),
        Expr::UnaryNot(a) => truth(eval_expr(a, vals) == 0.0),
        Expr::Ternary(c, a, b) => {
            if eval_expr(c, vals) != 0.0 {
                eval_expr(a, vals)
            } else {
                eval_expr(b, vals)
            }
        }
        Expr::BinOp(op, a, b) => {
            let lhs = eval_expr(a, vals);
            let rhs = eval_expr(b, vals);
            match op {
                BinOp::Add => lhs + rhs,
                BinOp::Sub => lhs - rhs,
                BinOp::Mul => lhs * rhs,
                BinOp::Div => lhs / rhs,
                BinOp::Eq => truth((lhs - rhs).abs() < f64::EPSILON),
                BinOp::Ne => truth((lhs - rhs).abs() >= f64::EPSILON),
                BinOp::Lt => truth(lhs < rhs),
                BinOp::Le => truth(lhs <= rhs),
                BinOp::Gt => truth(lhs > rhs),
                BinOp::Ge => truth(lhs >= rhs),
                BinOp::And => truth(lhs != 0.0 && rhs != 0.0),
                BinOp::Or => truth(lhs != 0.0 || rhs != 0.0),
            }
        }
        Expr::Call(f, args) => {
            let a0 = || eval_expr(&args[0], vals);
            let a1 = || eval_expr(&args[1], vals);
            match f {
                Func::Abs => a0().abs(),
                Func::Sqrt => a0().sqrt(),
                Func::Log => a0().ln(),
                Func::Log10 => a0().log10(),
                Func::Exp => a0().exp(),
                Func::Pow => a0().powf(a1()),
                Func::Min => a0().min(a1()),
                Func::Max => a0().max(a1()),
            }
        }
    }
}

// ── Tokenizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Question,
    Colon,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Two-character operators
        if let Some(&next) = chars.get(i + 1) {
            let tok = match (c, next) {
                ('&', '&') => Some(Token::And),
                ('|', '|') => Some(Token::Or),
                ('=', '=') => Some(Token::Eq),
                ('!', '=') => Some(Token::Ne),
                ('<', '=') => Some(Token::Le),
                ('>', '=') => Some(Token::Ge),
                _ => None,
            };
            if let Some(t) = tok {
                tokens.push(t);
                i += 2;
                continue;
            }
        }

        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            '?' => Some(Token::Question),
            ':' if chars.get(i + 1) != Some(&':') => Some(Token::Colon),
            '<' => Some(Token::Lt),
            '>' => Some(Token::Gt),
            '!' => Some(Token::Not),
            _ => None,
        };
        if let Some(t) = single {
            tokens.push(t);
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_digit()
                    || chars[i] == '.'
                    || chars[i] == 'e'
                    || chars[i] == 'E'
                    || ((chars[i] == '+' || chars[i] == '-')
                        && i > start
                        && (chars[i - 1] == 'e' || chars[i - 1] == 'E')))
            {
                i += 1;
            }
            let s: String = chars[start..i].iter().collect();
            let n: f64 =
                s.parse().map_err(|_| Error::Expression(format!("invalid number: '{}'", s)))?;
            tokens.push(Token::Num(n));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() {
                if chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.' {
                    i += 1;
                } else if chars[i] == ':' && chars.get(i + 1) == Some(&':') {
                    // namespaced function names such as TMath::Abs
                    i += 2;
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(Error::Expression(format!(
                "unexpected character '{}' in '{}'",
                c, input
            )));
        }
    }

    Ok(tokens)
}

// ── Parser (recursive descent) ─────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    branches: Vec<String>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0, branches: Vec::new() }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            other => Err(Error::Expression(format!("expected {:?}, got {:?}", expected, other))),
        }
    }

    fn resolve_var(&mut self, name: &str) -> usize {
        if let Some(i) = self.branches.iter().position(|b| b == name) {
            i
        } else {
            self.branches.push(name.to_string());
            self.branches.len() - 1
        }
    }

    // ── Grammar rules ──────────────────────────────────────────

    fn parse_ternary(&mut self) -> Result<Expr> {
        let cond = self.parse_or()?;
        if !matches!(self.peek(), Some(Token::Question)) {
            return Ok(cond);
        }
        self.advance();
        let then = self.parse_ternary()?;
        self.expect(&Token::Colon)?;
        let other = self.parse_ternary()?;
        Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(other)))
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::BinOp(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_cmp()?;
            lhs = Expr::BinOp(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_add()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinOp::Eq,
                Some(Token::Ne) => BinOp::Ne,
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::Le) => BinOp::Le,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Ge) => BinOp::Ge,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_add()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNeg(Box::new(e)))
            }
            Some(Token::Plus) => {
                self.advance();
                self.parse_unary()
            }
            Some(Token::Not) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNot(Box::new(e)))
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.advance().cloned() {
            Some(Token::Num(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let e = self.parse_ternary()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.advance(); // consume '('
                    let func = Func::from_ident(&name).ok_or_else(|| {
                        Error::Expression(format!("unknown function: '{}'", name))
                    })?;
                    let mut args = vec![self.parse_ternary()?];
                    while matches!(self.peek(), Some(Token::Comma)) {
                        self.advance();
                        args.push(self.parse_ternary()?);
                    }
                    self.expect(&Token::RParen)?;
                    if args.len() != func.arity() {
                        return Err(Error::Expression(format!(
                            "function '{}' takes {} argument(s), got {}",
                            name,
                            func.arity(),
                            args.len()
                        )));
                    }
                    Ok(Expr::Call(func, args))
                } else {
                    match name.as_str() {
                        "true" => Ok(Expr::Number(1.0)),
                        "false" => Ok(Expr::Number(0.0)),
                        _ if name.contains("::") => Err(Error::Expression(format!(
                            "namespaced identifier '{}' is not a column",
                            name
                        ))),
                        _ => Ok(Expr::Var(self.resolve_var(&name))),
                    }
                }
            }
            other => Err(Error::Expression(format!(
                "expected number, identifier, or '(', got {:?}",
                other
            ))),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_arithmetic() {
        let e = CompiledExpr::compile("2 + 3 * 4").unwrap();
        assert!(e.required_branches.is_empty());
        assert!((e.eval_row(&[]) - 14.0).abs() < 1e-10);
    }

    #[test]
    fn variables() {
        let e = CompiledExpr::compile("genweight * puweight").unwrap();
        assert_eq!(e.required_branches, vec!["genweight", "puweight"]);
        assert!((e.eval_row(&[100.0, 0.5]) - 50.0).abs() < 1e-10);
    }

    #[test]
    fn dotted_column_names() {
        let e = CompiledExpr::compile("Tau.pt > 20 && Tau.eta_abs<2.3").unwrap();
        assert_eq!(e.required_branches, vec!["Tau.pt", "Tau.eta_abs"]);
        assert_eq!(e.eval_row(&[25.0, 1.0]), 1.0);
        assert_eq!(e.eval_row(&[25.0, 2.5]), 0.0);
    }

    #[test]
    fn comparison_and_boolean() {
        let e = CompiledExpr::compile("q_1*q_2<0 && iso_1<0.15").unwrap();
        assert_eq!(e.required_branches, vec!["q_1", "q_2", "iso_1"]);
        assert!((e.eval_row(&[1.0, -1.0, 0.1]) - 1.0).abs() < 1e-10);
        assert!((e.eval_row(&[1.0, 1.0, 0.1]) - 0.0).abs() < 1e-10);
        assert!((e.eval_row(&[1.0, -1.0, 0.3]) - 0.0).abs() < 1e-10);
    }

    #[test]
    fn ternary_is_right_associative() {
        let e = CompiledExpr::compile("NUP==1 ? 4 : NUP==2 ? 3 : 6").unwrap();
        assert_eq!(e.eval_row(&[1.0]), 4.0);
        assert_eq!(e.eval_row(&[2.0]), 3.0);
        assert_eq!(e.eval_row(&[0.0]), 6.0);
        assert_eq!(e.eval_row(&[5.0]), 6.0);
    }

    #[test]
    fn ternary_inside_product() {
        let e = CompiledExpr::compile("(q_1*q_2>0 ? 1 : -1) * 2").unwrap();
        assert_eq!(e.eval_row(&[1.0, 1.0]), 2.0);
        assert_eq!(e.eval_row(&[1.0, -1.0]), -2.0);
    }

    #[test]
    fn functions() {
        let e = CompiledExpr::compile("sqrt(x)").unwrap();
        assert!((e.eval_row(&[9.0]) - 3.0).abs() < 1e-10);

        let e = CompiledExpr::compile("pow(x, 2)").unwrap();
        assert!((e.eval_row(&[3.0]) - 9.0).abs() < 1e-10);

        let e = CompiledExpr::compile("min(m_vis,195.5)").unwrap();
        assert_eq!(e.eval_row(&[300.0]), 195.5);
        assert_eq!(e.eval_row(&[30.0]), 30.0);

        let e = CompiledExpr::compile("TMath::Abs(eta_1) < 2.1").unwrap();
        assert_eq!(e.required_branches, vec!["eta_1"]);
        assert_eq!(e.eval_row(&[-2.0]), 1.0);
    }

    #[test]
    fn wrong_arity_rejected() {
        assert!(CompiledExpr::compile("pow(x)").is_err());
        assert!(CompiledExpr::compile("abs(x, y)").is_err());
        assert!(CompiledExpr::compile("foo(x)").is_err());
    }

    #[test]
    fn negation_and_not() {
        let e = CompiledExpr::compile("-x + 1").unwrap();
        assert!((e.eval_row(&[5.0]) - (-4.0)).abs() < 1e-10);
        let e = CompiledExpr::compile("!(x > 3)").unwrap();
        assert_eq!(e.eval_row(&[2.0]), 1.0);
        assert_eq!(e.eval_row(&[5.0]), 0.0);
    }

    #[test]
    fn bulk_eval() {
        let e = CompiledExpr::compile("a + b").unwrap();
        let a = [1.0, 2.0, 3.0];
        let b = [10.0, 20.0, 30.0];
        assert_eq!(e.eval_bulk(&[&a, &b]), vec![11.0, 22.0, 33.0]);
    }

    #[test]
    fn literals_and_errors() {
        assert_eq!(CompiledExpr::compile("true && !false").unwrap().eval_row(&[]), 1.0);
        assert!(CompiledExpr::compile("").is_err());
        assert!(CompiledExpr::compile("a +").is_err());
        assert!(CompiledExpr::compile("a ? b").is_err());
        assert!(CompiledExpr::compile("a $ b").is_err());
        assert!(CompiledExpr::compile_opt("  ").unwrap().is_none());
    }

    #[test]
    fn scientific_notation() {
        let e = CompiledExpr::compile("1.5e2 + 3.0E-1").unwrap();
        assert!((e.eval_row(&[]) - 150.3).abs() < 1e-10);
    }
}
