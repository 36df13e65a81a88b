//! Machine query language.
//!
//! Queries are prefix s-expressions such as
//! `(and (= bmc_type "moonshot") (>= interface_count 2))`. A query is parsed
//! and compiled once into a parameterized SQL predicate which the store
//! splices into its machine listing query.

use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::Sqlite;

use crate::error::ProvisionError;

const MAX_DEPTH: usize = 64;

/// Symbols accepted in machine queries, mapped to columns of the machine
/// listing subquery (see `db::machines`).
pub const MACHINE_SYMBOLS: &[(&str, &str)] = &[
    ("name", "q.name"),
    ("assignee_count", "q.assignee_count"),
    ("interface_count", "q.interface_count"),
    ("bmc_type", "q.bmc_type"),
];

#[derive(Debug, Clone, PartialEq)]
enum Sexp {
    List(Vec<Sexp>),
    Symbol(String),
    Str(String),
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Str(String),
    Atom(String),
}

/// A literal bound into the compiled predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Int(i64),
    Float(f64),
    Text(String),
}

/// A compiled predicate: an SQL boolean expression plus its positional binds.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    sql: String,
    binds: Vec<QueryValue>,
}

impl CompiledQuery {
    pub fn match_all() -> Self {
        Self {
            sql: "1".to_string(),
            binds: Vec::new(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn binds(&self) -> &[QueryValue] {
        &self.binds
    }

    /// Bind this predicate's literals onto `query`, in placeholder order.
    pub fn bind_all<'q>(
        &'q self,
        mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        for value in &self.binds {
            query = match value {
                QueryValue::Int(i) => query.bind(*i),
                QueryValue::Float(f) => query.bind(*f),
                QueryValue::Text(s) => query.bind(s.as_str()),
            };
        }
        query
    }
}

/// Compile `query` against the machine symbol table.
pub fn compile_machine_query(query: &str) -> Result<CompiledQuery, ProvisionError> {
    compile(query, MACHINE_SYMBOLS)
}

/// Compile `query` against `symbols`. An empty query matches everything.
pub fn compile(query: &str, symbols: &[(&str, &str)]) -> Result<CompiledQuery, ProvisionError> {
    if query.trim().is_empty() {
        return Ok(CompiledQuery::match_all());
    }

    let tokens = tokenize(query)?;
    let mut pos = 0;
    let ast = parse_expr(&tokens, &mut pos, 0)?;
    if pos != tokens.len() {
        return Err(syntax("unexpected input after expression"));
    }
    if !matches!(ast, Sexp::List(_)) {
        return Err(syntax("query must be a parenthesized expression"));
    }

    let mut compiler = Compiler {
        symbols,
        binds: Vec::new(),
    };
    let sql = compiler.predicate(&ast)?;
    Ok(CompiledQuery {
        sql,
        binds: compiler.binds,
    })
}

fn syntax(msg: impl Into<String>) -> ProvisionError {
    ProvisionError::QuerySyntax(msg.into())
}

fn tokenize(input: &str) -> Result<Vec<Token>, ProvisionError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => s.push(escaped),
                            None => return Err(syntax("unterminated string")),
                        },
                        Some(other) => s.push(other),
                        None => return Err(syntax("unterminated string")),
                    }
                }
                tokens.push(Token::Str(s));
            }
            _ => {
                let mut atom = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    atom.push(c);
                    chars.next();
                }
                tokens.push(Token::Atom(atom));
            }
        }
    }

    Ok(tokens)
}

fn parse_expr(tokens: &[Token], pos: &mut usize, depth: usize) -> Result<Sexp, ProvisionError> {
    if depth > MAX_DEPTH {
        return Err(syntax("expression nested too deeply"));
    }
    let token = tokens
        .get(*pos)
        .ok_or_else(|| syntax("unexpected end of query"))?;
    *pos += 1;

    match token {
        Token::Open => {
            let mut items = Vec::new();
            loop {
                match tokens.get(*pos) {
                    Some(Token::Close) => {
                        *pos += 1;
                        return Ok(Sexp::List(items));
                    }
                    Some(_) => items.push(parse_expr(tokens, pos, depth + 1)?),
                    None => return Err(syntax("unbalanced parentheses")),
                }
            }
        }
        Token::Close => Err(syntax("unbalanced parentheses")),
        Token::Str(s) => Ok(Sexp::Str(s.clone())),
        Token::Atom(a) => Ok(parse_atom(a)),
    }
}

fn parse_atom(atom: &str) -> Sexp {
    let numeric = atom
        .trim_start_matches(&['-', '+'][..])
        .starts_with(|c: char| c.is_ascii_digit() || c == '.');
    if numeric {
        if let Ok(i) = atom.parse::<i64>() {
            return Sexp::Int(i);
        }
        if let Ok(f) = atom.parse::<f64>() {
            return Sexp::Float(f);
        }
    }
    Sexp::Symbol(atom.to_string())
}

enum Operand<'a> {
    Column(&'a str),
    Value(QueryValue),
    Nil,
}

struct Compiler<'s> {
    symbols: &'s [(&'s str, &'s str)],
    binds: Vec<QueryValue>,
}

impl<'s> Compiler<'s> {
    fn predicate(&mut self, expr: &Sexp) -> Result<String, ProvisionError> {
        let items = match expr {
            Sexp::List(items) => items,
            _ => return Err(syntax("expected a parenthesized expression")),
        };
        let (op, args) = items
            .split_first()
            .ok_or_else(|| syntax("s-expr is empty"))?;
        let op = match op {
            Sexp::Symbol(op) => op.as_str(),
            _ => return Err(syntax("s-expr operation must be a symbol")),
        };

        match op {
            "and" | "or" => {
                if args.is_empty() {
                    return Err(syntax(format!("`{}` needs at least one operand", op)));
                }
                let joiner = if op == "and" { " AND " } else { " OR " };
                let parts = args
                    .iter()
                    .map(|a| self.predicate(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", parts.join(joiner)))
            }
            "=" | "!=" | ">" | ">=" | "<" | "<=" | "=~" => {
                if args.len() != 2 {
                    return Err(syntax(format!("`{}` takes exactly 2 operands", op)));
                }
                let lhs = self.operand(&args[0])?;
                let rhs = self.operand(&args[1])?;
                self.comparison(op, lhs, rhs)
            }
            other => Err(syntax(format!("`{}` is not a valid operation", other))),
        }
    }

    /// Comparisons take columns and literals only; a nested expression as an
    /// operand is a syntax error rather than a boolean-valued subquery.
    fn operand(&self, expr: &Sexp) -> Result<Operand<'s>, ProvisionError> {
        match expr {
            Sexp::Symbol(sym) if sym == "nil" => Ok(Operand::Nil),
            Sexp::Symbol(sym) => self
                .symbols
                .iter()
                .find(|(name, _)| *name == sym.as_str())
                .map(|&(_, column)| Operand::Column(column))
                .ok_or_else(|| syntax(format!("unknown symbol `{}`", sym))),
            Sexp::Str(s) => Ok(Operand::Value(QueryValue::Text(s.clone()))),
            Sexp::Int(i) => Ok(Operand::Value(QueryValue::Int(*i))),
            Sexp::Float(f) => Ok(Operand::Value(QueryValue::Float(*f))),
            Sexp::List(_) => Err(syntax("comparison operands must be symbols or literals")),
        }
    }

    fn comparison(
        &mut self,
        op: &str,
        lhs: Operand<'_>,
        rhs: Operand<'_>,
    ) -> Result<String, ProvisionError> {
        if op == "=~" {
            if !matches!(rhs, Operand::Value(QueryValue::Text(_))) {
                return Err(syntax("=~ operator requires a string as second operand"));
            }
            let lhs = self.render(lhs);
            let rhs = self.render(rhs);
            return Ok(format!("instr({}, {}) > 0", lhs, rhs));
        }

        let has_nil = matches!(lhs, Operand::Nil) || matches!(rhs, Operand::Nil);
        let sql_op = match (op, has_nil) {
            ("=", true) => "IS",
            ("!=", true) => "IS NOT",
            (op, _) => op,
        };
        let lhs = self.render(lhs);
        let rhs = self.render(rhs);
        Ok(format!("{} {} {}", lhs, sql_op, rhs))
    }

    fn render(&mut self, operand: Operand<'_>) -> String {
        match operand {
            Operand::Column(column) => column.to_string(),
            Operand::Nil => "NULL".to_string(),
            Operand::Value(v) => {
                self.binds.push(v);
                "?".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(q: &str) -> CompiledQuery {
        compile_machine_query(q).unwrap()
    }

    fn syntax_err(q: &str) -> String {
        match compile_machine_query(q) {
            Err(ProvisionError::QuerySyntax(msg)) => msg,
            other => panic!("expected syntax error for {:?}, got {:?}", q, other),
        }
    }

    #[test]
    fn test_empty_query_matches_all() {
        assert_eq!(compiled(""), CompiledQuery::match_all());
        assert_eq!(compiled("   \n"), CompiledQuery::match_all());
    }

    #[test]
    fn test_simple_equality() {
        let q = compiled(r#"(= bmc_type "moonshot")"#);
        assert_eq!(q.sql(), "q.bmc_type = ?");
        assert_eq!(q.binds(), &[QueryValue::Text("moonshot".into())]);
    }

    #[test]
    fn test_nested_boolean() {
        let q = compiled(r#"(or (= bmc_type "a") (and (>= interface_count 2) (< assignee_count 1.5)))"#);
        assert_eq!(
            q.sql(),
            "(q.bmc_type = ? OR (q.interface_count >= ? AND q.assignee_count < ?))"
        );
        assert_eq!(
            q.binds(),
            &[
                QueryValue::Text("a".into()),
                QueryValue::Int(2),
                QueryValue::Float(1.5)
            ]
        );
    }

    #[test]
    fn test_nil_and_substring() {
        assert_eq!(compiled("(= name nil)").sql(), "q.name IS NULL");
        assert_eq!(compiled("(!= nil name)").sql(), "NULL IS NOT q.name");

        let q = compiled(r#"(=~ name "node\"1")"#);
        assert_eq!(q.sql(), "instr(q.name, ?) > 0");
        assert_eq!(q.binds(), &[QueryValue::Text("node\"1".into())]);
    }

    #[test]
    fn test_negative_numbers_and_symbols() {
        let q = compiled("(> interface_count -1)");
        assert_eq!(q.binds(), &[QueryValue::Int(-1)]);
        assert!(syntax_err("(= name -foo)").contains("unknown symbol"));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(syntax_err("(= flavour 1)").contains("unknown symbol `flavour`"));
        assert!(syntax_err("(xor (= name 1))").contains("not a valid operation"));
        assert!(syntax_err("()").contains("empty"));
        assert!(syntax_err("(1 name)").contains("must be a symbol"));
        assert!(syntax_err("(= name 1").contains("unbalanced"));
        assert!(syntax_err("(= name 1))").contains("unexpected input"));
        assert!(syntax_err("name").contains("parenthesized"));
        assert!(syntax_err("(= name)").contains("exactly 2"));
        assert!(syntax_err("(and)").contains("at least one"));
        assert!(syntax_err("(and name)").contains("parenthesized"));
        assert!(syntax_err("(=~ name 3)").contains("requires a string"));
        assert!(syntax_err(r#"(= name "open"#).contains("unterminated"));
    }

    #[test]
    fn test_comparison_rejects_nested_operands() {
        for q in [
            "(= (= name 1) 1)",
            "(= name (and (= name 1)))",
            r#"(=~ (or (= name "a")) "a")"#,
            "(< (interface_count) 2)",
        ] {
            assert_eq!(syntax_err(q), "comparison operands must be symbols or literals", "{}", q);
        }
        // Nesting stays available through the boolean forms
        compiled(r#"(and (= name "a") (or (= name "b") (and (= name "c"))))"#);
    }
}
