//! Lexer and recursive-descent parser for the query expression dialect.

use super::{BinOp, CmpOp, Counter, Expr, Side, UnOp};
use anyhow::bail;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
    Dot,
    Colon,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Bang,
    AndAnd,
    OrOr,
    Assign,
}

fn lex(src: &str) -> anyhow::Result<Vec<Tok>> {
    let chars: Vec<char> = src.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let mut is_float = false;
            if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                is_float = true;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            if is_float {
                toks.push(Tok::Float(text.parse()?));
            } else {
                toks.push(Tok::Int(text.parse()?));
            }
            continue;
        }
        if (c == 'r' || c == 'R')
            && i + 1 < chars.len()
            && (chars[i + 1] == '"' || chars[i + 1] == '\'')
        {
            let (value, next) = lex_raw_string(&chars, i + 1)?;
            toks.push(Tok::Str(value));
            i = next;
            continue;
        }
        if c == '"' || c == '\'' {
            let (value, next) = lex_string(&chars, i)?;
            toks.push(Tok::Str(value));
            i = next;
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            toks.push(Tok::Ident(chars[start..i].iter().collect()));
            continue;
        }
        let two = |j: usize, ch: char| j + 1 < chars.len() && chars[j + 1] == ch;
        match c {
            '=' if two(i, '=') => {
                // accept both == and ===
                i += if two(i + 1, '=') { 3 } else { 2 };
                toks.push(Tok::EqEq);
            }
            '=' => {
                toks.push(Tok::Assign);
                i += 1;
            }
            '!' if two(i, '=') => {
                i += if two(i + 1, '=') { 3 } else { 2 };
                toks.push(Tok::NotEq);
            }
            '!' => {
                toks.push(Tok::Bang);
                i += 1;
            }
            '<' if two(i, '=') => {
                toks.push(Tok::Le);
                i += 2;
            }
            '<' => {
                toks.push(Tok::Lt);
                i += 1;
            }
            '>' if two(i, '=') => {
                toks.push(Tok::Ge);
                i += 2;
            }
            '>' => {
                toks.push(Tok::Gt);
                i += 1;
            }
            '&' if two(i, '&') => {
                toks.push(Tok::AndAnd);
                i += 2;
            }
            '|' if two(i, '|') => {
                toks.push(Tok::OrOr);
                i += 2;
            }
            '+' => {
                toks.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                toks.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                toks.push(Tok::Star);
                i += 1;
            }
            '/' => {
                toks.push(Tok::Slash);
                i += 1;
            }
            '%' => {
                toks.push(Tok::Percent);
                i += 1;
            }
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            '.' => {
                toks.push(Tok::Dot);
                i += 1;
            }
            ':' => {
                toks.push(Tok::Colon);
                i += 1;
            }
            _ => bail!("Unexpected character {:?} in expression", c),
        }
    }
    Ok(toks)
}

fn lex_string(chars: &[char], start: usize) -> anyhow::Result<(String, usize)> {
    let quote = chars[start];
    let mut value = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            if i + 1 >= chars.len() {
                break;
            }
            let esc = chars[i + 1];
            match esc {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                '\\' | '\'' | '"' => value.push(esc),
                // unknown escapes keep the backslash
                other => {
                    value.push('\\');
                    value.push(other);
                }
            }
            i += 2;
            continue;
        }
        if c == quote {
            return Ok((value, i + 1));
        }
        value.push(c);
        i += 1;
    }
    bail!("Unterminated string literal in expression")
}

fn lex_raw_string(chars: &[char], start: usize) -> anyhow::Result<(String, usize)> {
    let quote = chars[start];
    let mut value = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() && chars[i + 1] == quote {
            // the backslash stays, but it does escape the terminator
            value.push('\\');
            value.push(quote);
            i += 2;
            continue;
        }
        if c == quote {
            return Ok((value, i + 1));
        }
        value.push(c);
        i += 1;
    }
    bail!("Unterminated string literal in expression")
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

/// Parse a complete expression; trailing tokens are an error.
pub fn parse_expression(src: &str) -> anyhow::Result<Expr> {
    let toks = lex(src)?;
    if toks.is_empty() {
        bail!("Empty expression");
    }
    let mut parser = Parser { toks, pos: 0 };
    let expr = parser.ternary()?;
    if parser.pos < parser.toks.len() {
        bail!(
            "Unexpected trailing tokens in expression: {:?}",
            src.trim()
        );
    }
    Ok(expr)
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Ident(name)) if name == kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(name)) if name == kw)
    }

    fn ternary(&mut self) -> anyhow::Result<Expr> {
        let expr = self.or_expr()?;
        if self.eat_keyword("if") {
            let pred = self.or_expr()?;
            if !self.eat_keyword("else") {
                bail!("Conditional expression is missing \"else\"");
            }
            let otherwise = self.ternary()?;
            return Ok(Expr::Cond {
                then: Box::new(expr),
                pred: Box::new(pred),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(expr)
    }

    fn or_expr(&mut self) -> anyhow::Result<Expr> {
        let mut expr = self.and_expr()?;
        loop {
            if self.eat(&Tok::OrOr) || self.eat_keyword("or") {
                let rhs = self.and_expr()?;
                expr = Expr::Or(Box::new(expr), Box::new(rhs));
            } else {
                return Ok(expr);
            }
        }
    }

    fn and_expr(&mut self) -> anyhow::Result<Expr> {
        let mut expr = self.not_expr()?;
        loop {
            if self.eat(&Tok::AndAnd) || self.eat_keyword("and") {
                let rhs = self.not_expr()?;
                expr = Expr::And(Box::new(expr), Box::new(rhs));
            } else {
                return Ok(expr);
            }
        }
    }

    fn not_expr(&mut self) -> anyhow::Result<Expr> {
        if self.eat(&Tok::Bang) || self.eat_keyword("not") {
            let inner = self.not_expr()?;
            return Ok(Expr::Unary(UnOp::Not, Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> anyhow::Result<Expr> {
        let mut expr = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Tok::EqEq) => Some(CmpOp::Eq),
                Some(Tok::NotEq) => Some(CmpOp::Ne),
                Some(Tok::Lt) => Some(CmpOp::Lt),
                Some(Tok::Le) => Some(CmpOp::Le),
                Some(Tok::Gt) => Some(CmpOp::Gt),
                Some(Tok::Ge) => Some(CmpOp::Ge),
                Some(Tok::Assign) => {
                    bail!("Unexpected \"=\" in expression. For equality test use \"==\"")
                }
                _ => None,
            };
            if let Some(op) = op {
                self.pos += 1;
                let rhs = self.additive()?;
                expr = Expr::Compare(op, Box::new(expr), Box::new(rhs));
                continue;
            }
            if self.peek_keyword("is") {
                self.pos += 1;
                let negated = self.eat_keyword("not");
                if !self.eat_keyword("None") {
                    bail!("Expected \"None\" after \"is\"");
                }
                expr = Expr::IsNone {
                    negated,
                    expr: Box::new(expr),
                };
                continue;
            }
            return Ok(expr);
        }
    }

    fn additive(&mut self) -> anyhow::Result<Expr> {
        let mut expr = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => Some(BinOp::Add),
                Some(Tok::Minus) => Some(BinOp::Sub),
                _ => None,
            };
            match op {
                Some(op) => {
                    self.pos += 1;
                    let rhs = self.multiplicative()?;
                    expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
                }
                None => return Ok(expr),
            }
        }
    }

    fn multiplicative(&mut self) -> anyhow::Result<Expr> {
        let mut expr = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => Some(BinOp::Mul),
                Some(Tok::Slash) => Some(BinOp::Div),
                Some(Tok::Percent) => Some(BinOp::Mod),
                _ => None,
            };
            match op {
                Some(op) => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
                }
                None => return Ok(expr),
            }
        }
    }

    fn unary(&mut self) -> anyhow::Result<Expr> {
        if self.eat(&Tok::Minus) {
            let inner = self.unary()?;
            return Ok(Expr::Unary(UnOp::Neg, Box::new(inner)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> anyhow::Result<Expr> {
        let mut expr = self.primary()?;
        while self.eat(&Tok::Dot) {
            let name = match self.next() {
                Some(Tok::Ident(name)) => name,
                other => bail!("Expected a member name after \".\", found {:?}", other),
            };
            let args = if self.eat(&Tok::LParen) {
                Some(self.call_args()?)
            } else {
                None
            };
            expr = Expr::Method {
                recv: Box::new(expr),
                name,
                args,
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> anyhow::Result<Expr> {
        match self.next() {
            Some(Tok::Int(n)) => Ok(Expr::Int(n)),
            Some(Tok::Float(f)) => Ok(Expr::Float(f)),
            Some(Tok::Str(s)) => Ok(Expr::Str(s)),
            Some(Tok::LParen) => {
                let expr = self.ternary()?;
                if !self.eat(&Tok::RParen) {
                    bail!("Missing \")\" in expression");
                }
                Ok(expr)
            }
            Some(Tok::Ident(name)) => match name.as_str() {
                "None" | "null" => Ok(Expr::NoneLit),
                "True" | "true" => Ok(Expr::Bool(true)),
                "False" | "false" => Ok(Expr::Bool(false)),
                "lambda" => {
                    let param = match self.next() {
                        Some(Tok::Ident(p)) => p,
                        other => bail!("Expected a parameter name after \"lambda\", found {:?}", other),
                    };
                    if !self.eat(&Tok::Colon) {
                        bail!("Expected \":\" after the lambda parameter");
                    }
                    let body = self.ternary()?;
                    Ok(Expr::Lambda {
                        param,
                        body: Box::new(body),
                    })
                }
                _ => {
                    if self.eat(&Tok::LParen) {
                        let args = self.call_args()?;
                        return Ok(Expr::Call { name, args });
                    }
                    Ok(classify_ident(name))
                }
            },
            other => bail!("Unexpected token in expression: {:?}", other),
        }
    }

    fn call_args(&mut self) -> anyhow::Result<Vec<Expr>> {
        // COUNT(*) is the one call that takes a bare star
        if self.peek() == Some(&Tok::Star) {
            self.pos += 1;
            if !self.eat(&Tok::RParen) {
                bail!("Missing \")\" after \"*\" argument");
            }
            return Ok(vec![Expr::StarArg]);
        }
        let mut args = Vec::new();
        if self.eat(&Tok::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.ternary()?);
            if self.eat(&Tok::Comma) {
                continue;
            }
            if self.eat(&Tok::RParen) {
                return Ok(args);
            }
            bail!("Missing \")\" in call arguments");
        }
    }
}

/// Map an identifier to a column reference, a counter or a free name.
fn classify_ident(name: String) -> Expr {
    match name.as_str() {
        "NR" => return Expr::Counter(Counter::Nr),
        "NF" => return Expr::Counter(Counter::Nf),
        "NU" => return Expr::Counter(Counter::Nu),
        _ => {}
    }
    let mut chars = name.chars();
    let side = match chars.next() {
        Some('a') => Some(Side::A),
        Some('b') => Some(Side::B),
        _ => None,
    };
    if let Some(side) = side {
        let rest = chars.as_str();
        if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = rest.parse::<usize>() {
                if index >= 1 {
                    return Expr::Column(side, index);
                }
            }
        }
    }
    Expr::Ident(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_and_counter_idents() {
        assert_eq!(parse_expression("a1").unwrap(), Expr::Column(Side::A, 1));
        assert_eq!(parse_expression("b20").unwrap(), Expr::Column(Side::B, 20));
        assert_eq!(parse_expression("NR").unwrap(), Expr::Counter(Counter::Nr));
        assert_eq!(
            parse_expression("abc").unwrap(),
            Expr::Ident("abc".to_string())
        );
        // a0 is not a valid column
        assert_eq!(
            parse_expression("a0").unwrap(),
            Expr::Ident("a0".to_string())
        );
    }

    #[test]
    fn test_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let expr = parse_expression("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary(BinOp::Add, _, rhs) => {
                assert!(matches!(*rhs, Expr::Binary(BinOp::Mul, _, _)));
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_conditional() {
        let expr = parse_expression(r#"a2 + "," if NR % 2 == 0 else a2 + ";""#).unwrap();
        assert!(matches!(expr, Expr::Cond { .. }));
    }

    #[test]
    fn test_is_not_none() {
        let expr = parse_expression("re.search(\"a\", a2)  is   not  None").unwrap();
        match expr {
            Expr::IsNone { negated, .. } => assert!(negated),
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_raw_string_keeps_backslashes() {
        let expr = parse_expression(r#"r"\'\"a1   bc""#).unwrap();
        assert_eq!(expr, Expr::Str(r#"\'\"a1   bc"#.to_string()));
    }

    #[test]
    fn test_escapes_in_plain_strings() {
        let expr = parse_expression(r#""hello \" world""#).unwrap();
        assert_eq!(expr, Expr::Str("hello \" world".to_string()));
    }

    #[test]
    fn test_count_star() {
        let expr = parse_expression("COUNT(*)").unwrap();
        assert_eq!(
            expr,
            Expr::Call {
                name: "COUNT".to_string(),
                args: vec![Expr::StarArg],
            }
        );
    }

    #[test]
    fn test_lambda() {
        let expr = parse_expression("lambda v: len(v)").unwrap();
        match expr {
            Expr::Lambda { param, .. } => assert_eq!(param, "v"),
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_bare_assign_rejected() {
        let err = parse_expression("a1 = 5").unwrap_err();
        assert!(err.to_string().contains("=="));
    }

    #[test]
    fn test_both_logic_spellings() {
        assert!(parse_expression("a1 == \"x\" and a2 != \"y\"").is_ok());
        assert!(parse_expression("a1 == \"x\" && a2 != \"y\"").is_ok());
        assert!(parse_expression("not (a1 or a2)").is_ok());
    }
}
