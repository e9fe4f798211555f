use crate::data::Dictionary;
use crate::error::EvalError;
use crate::value::Value;
use futures_util::future::BoxFuture;

/// Read-only view of the dictionary handed to an [`Evaluator`].
#[derive(Clone, Copy)]
pub struct DataContext<'a> {
    dictionary: &'a Dictionary,
}

impl<'a> DataContext<'a> {
    pub fn new(dictionary: &'a Dictionary) -> Self {
        Self { dictionary }
    }

    pub fn dictionary(&self) -> &'a Dictionary {
        self.dictionary
    }

    pub fn column_value(&self, path: &str) -> Option<Value> {
        self.dictionary.column_value(path)
    }

    pub fn parameter(&self, name: &str) -> Option<Value> {
        self.dictionary.parameter(name).cloned()
    }

    pub fn total(&self, name: &str) -> Option<Value> {
        self.dictionary.total_value(name)
    }

    pub fn system_variable(&self, name: &str) -> Option<Value> {
        let system = self.dictionary.system();
        let value = match name {
            "Page#" => Value::Int(system.page as i64),
            "TotalPages#" => Value::Int(system.total_pages as i64),
            "Row#" => Value::Int(system.row as i64),
            "AbsRow#" => Value::Int(system.abs_row as i64),
            "PageN" => Value::Text(format!("Page {}", system.page)),
            "PageNofM" => Value::Text(format!(
                "Page {} of {}",
                system.page, system.total_pages
            )),
            _ => return None,
        };
        Some(value)
    }

    /// System variables shadow parameters, which shadow totals, which shadow
    /// columns.
    pub fn resolve(&self, name: &str) -> Option<Value> {
        self.system_variable(name)
            .or_else(|| self.parameter(name))
            .or_else(|| self.total(name))
            .or_else(|| self.column_value(name))
    }
}

/// Resolves opaque expression strings. The engine never parses expressions
/// itself; filters, sort keys, group conditions, totals and bracketed text
/// all go through this trait.
pub trait Evaluator: Send + Sync {
    fn calc(&self, expression: &str, context: &DataContext<'_>) -> Result<Value, EvalError>;

    fn calc_async<'a>(
        &'a self,
        expression: &'a str,
        context: &'a DataContext<'a>,
    ) -> BoxFuture<'a, Result<Value, EvalError>> {
        Box::pin(futures_util::future::ready(self.calc(expression, context)))
    }

    fn get_column_value(&self, name: &str, context: &DataContext<'_>) -> Result<Value, EvalError> {
        context
            .resolve(name)
            .ok_or_else(|| EvalError::UnknownIdentifier(name.to_string()))
    }
}

impl<F> Evaluator for F
where
    F: Fn(&str, &DataContext<'_>) -> Result<Value, EvalError> + Send + Sync,
{
    fn calc(&self, expression: &str, context: &DataContext<'_>) -> Result<Value, EvalError> {
        self(expression, context)
    }
}

/// Small built-in evaluator: literals, names (optionally bracketed),
/// `+`/`-`, comparisons, `!`, `&&`/`||` and parentheses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnEvaluator;

impl Evaluator for ColumnEvaluator {
    fn calc(&self, expression: &str, context: &DataContext<'_>) -> Result<Value, EvalError> {
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Ok(Value::Null);
        }
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            context,
            evaluator: self,
        };
        let value = parser.or()?;
        if parser.pos != tokens.len() {
            return Err(EvalError::Syntax(format!(
                "unexpected trailing input in `{expression}`"
            )));
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Value),
    Text(String),
    Name(String),
    Op(&'static str),
    Open,
    Close,
}

const OPERATORS: [&str; 14] = [
    "||", "&&", "==", "!=", "<>", "<=", ">=", "=", "<", ">", "+", "-", "!", "*",
];

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if ch.is_whitespace() {
            i += 1;
            continue;
        }
        if ch == '(' || ch == ')' {
            tokens.push(if ch == '(' { Token::Open } else { Token::Close });
            i += 1;
            continue;
        }
        if ch == '"' || ch == '\'' {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|c| *c == ch)
                .map(|p| start + p)
                .ok_or_else(|| EvalError::Syntax("unterminated string literal".to_string()))?;
            tokens.push(Token::Text(chars[start..end].iter().collect()));
            i = end + 1;
            continue;
        }
        if ch == '[' {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|c| *c == ']')
                .map(|p| start + p)
                .ok_or_else(|| EvalError::Syntax("unterminated `[`".to_string()))?;
            let name: String = chars[start..end].iter().collect();
            tokens.push(Token::Name(name.trim().to_string()));
            i = end + 1;
            continue;
        }
        if ch.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let raw: String = chars[start..i].iter().collect();
            let value = if raw.contains('.') {
                raw.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| EvalError::Syntax(format!("bad number `{raw}`")))?
            } else {
                raw.parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| EvalError::Syntax(format!("bad number `{raw}`")))?
            };
            tokens.push(Token::Number(value));
            continue;
        }
        if ch.is_alphabetic() || ch == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '#'))
            {
                i += 1;
            }
            tokens.push(Token::Name(chars[start..i].iter().collect()));
            continue;
        }
        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
            return Err(EvalError::Syntax(format!("unexpected character `{ch}`")));
        };
        tokens.push(Token::Op(*op));
        i += op.len();
    }
    Ok(tokens)
}

struct Parser<'t, 'c> {
    tokens: &'t [Token],
    pos: usize,
    context: &'c DataContext<'c>,
    evaluator: &'c ColumnEvaluator,
}

impl Parser<'_, '_> {
    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn or(&mut self) -> Result<Value, EvalError> {
        let mut left = self.and()?;
        while self.peek_op() == Some("||") {
            self.pos += 1;
            let right = self.and()?;
            left = Value::Bool(left.is_truthy() || right.is_truthy());
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Value, EvalError> {
        let mut left = self.comparison()?;
        while self.peek_op() == Some("&&") {
            self.pos += 1;
            let right = self.comparison()?;
            left = Value::Bool(left.is_truthy() && right.is_truthy());
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Value, EvalError> {
        let left = self.additive()?;
        let Some(op) = self.peek_op() else {
            return Ok(left);
        };
        if !matches!(op, "=" | "==" | "!=" | "<>" | "<" | ">" | "<=" | ">=") {
            return Ok(left);
        }
        self.pos += 1;
        let right = self.additive()?;
        let ordering = left.sort_cmp(&right);
        let result = match op {
            "=" | "==" => left.loose_eq(&right),
            "!=" | "<>" => !left.loose_eq(&right),
            "<" => ordering.is_lt(),
            ">" => ordering.is_gt(),
            "<=" => ordering.is_le(),
            _ => ordering.is_ge(),
        };
        Ok(Value::Bool(result))
    }

    fn additive(&mut self) -> Result<Value, EvalError> {
        let mut left = self.unary()?;
        while let Some(op @ ("+" | "-" | "*")) = self.peek_op() {
            self.pos += 1;
            let right = self.unary()?;
            left = arithmetic(op, left, right)?;
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Value, EvalError> {
        match self.peek_op() {
            Some("!") => {
                self.pos += 1;
                Ok(Value::Bool(!self.unary()?.is_truthy()))
            }
            Some("-") => {
                self.pos += 1;
                arithmetic("-", Value::Int(0), self.unary()?)
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<Value, EvalError> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| EvalError::Syntax("unexpected end of expression".to_string()))?;
        self.pos += 1;
        match token {
            Token::Number(value) => Ok(value.clone()),
            Token::Text(text) => Ok(Value::Text(text.clone())),
            Token::Name(name) => match name.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                _ => self.evaluator.get_column_value(name, self.context),
            },
            Token::Open => {
                let value = self.or()?;
                match self.tokens.get(self.pos) {
                    Some(Token::Close) => {
                        self.pos += 1;
                        Ok(value)
                    }
                    _ => Err(EvalError::Syntax("missing `)`".to_string())),
                }
            }
            Token::Close | Token::Op(_) => {
                Err(EvalError::Syntax(format!("unexpected token {token:?}")))
            }
        }
    }
}

fn arithmetic(op: &str, left: Value, right: Value) -> Result<Value, EvalError> {
    if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
        return Ok(Value::Int(match op {
            "+" => a.saturating_add(*b),
            "-" => a.saturating_sub(*b),
            _ => a.saturating_mul(*b),
        }));
    }
    if op == "+" && (matches!(left, Value::Text(_)) || matches!(right, Value::Text(_))) {
        return Ok(Value::Text(format!("{left}{right}")));
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::Float(match op {
            "+" => a + b,
            "-" => a - b,
            _ => a * b,
        })),
        _ if left.is_null() || right.is_null() => Ok(Value::Null),
        _ => Err(EvalError::Message(format!(
            "cannot apply `{op}` to `{left}` and `{right}`"
        ))),
    }
}

/// Piece of a text object's template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextPart {
    Literal(String),
    Expression(String),
}

/// Splits `text` into literals and bracketed expressions. Brackets nest, so
/// `[a[b]]` is one expression `a[b]`. An unclosed opening bracket is kept as
/// literal text.
pub fn split_expressions(text: &str, open: &str, close: &str) -> Vec<TextPart> {
    let mut parts = Vec::new();
    if open.is_empty() || close.is_empty() {
        parts.push(TextPart::Literal(text.to_string()));
        return parts;
    }
    let mut literal = String::new();
    let mut rest = text;
    while let Some(start) = rest.find(open) {
        let after_open = &rest[start + open.len()..];
        let mut depth = 1usize;
        let mut cursor = 0usize;
        let mut end = None;
        while cursor < after_open.len() {
            let tail = &after_open[cursor..];
            if tail.starts_with(close) {
                depth -= 1;
                if depth == 0 {
                    end = Some(cursor);
                    break;
                }
                cursor += close.len();
            } else if tail.starts_with(open) {
                depth += 1;
                cursor += open.len();
            } else {
                cursor += tail.chars().next().map(char::len_utf8).unwrap_or(1);
            }
        }
        let Some(end) = end else {
            break;
        };
        literal.push_str(&rest[..start]);
        if !literal.is_empty() {
            parts.push(TextPart::Literal(std::mem::take(&mut literal)));
        }
        parts.push(TextPart::Expression(after_open[..end].to_string()));
        rest = &after_open[end + close.len()..];
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        parts.push(TextPart::Literal(literal));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TableDataSource;

    fn dictionary() -> Dictionary {
        let mut dict = Dictionary::new();
        dict.register_data(
            TableDataSource::new("Orders", &["Id", "Amount", "City"])
                .with_row(vec![Value::Int(7), Value::Float(12.5), Value::from("Oslo")]),
        );
        dict.sources[0].rows = vec![0];
        dict.first("Orders");
        dict.set_parameter("Limit", 10);
        dict
    }

    #[test]
    fn column_evaluator_handles_comparisons_and_logic() {
        let dict = dictionary();
        let ctx = DataContext::new(&dict);
        let eval = ColumnEvaluator;
        assert_eq!(eval.calc("[Orders.Id]", &ctx), Ok(Value::Int(7)));
        assert_eq!(eval.calc("Orders.Amount > Limit", &ctx), Ok(Value::Bool(true)));
        assert_eq!(
            eval.calc("[Orders.City] == 'Oslo' && !(Orders.Id <> 7)", &ctx),
            Ok(Value::Bool(true))
        );
        assert_eq!(eval.calc("Orders.Id + 1", &ctx), Ok(Value::Int(8)));
        assert_eq!(
            eval.calc("'x' + Orders.City", &ctx),
            Ok(Value::from("xOslo"))
        );
        assert!(matches!(
            eval.calc("Orders.Missing", &ctx),
            Err(EvalError::UnknownIdentifier(_))
        ));
        assert!(matches!(eval.calc("(1", &ctx), Err(EvalError::Syntax(_))));
    }

    #[test]
    fn system_variables_are_resolved() {
        let mut dict = dictionary();
        dict.system.page = 2;
        dict.system.total_pages = 5;
        let ctx = DataContext::new(&dict);
        assert_eq!(ColumnEvaluator.calc("Page#", &ctx), Ok(Value::Int(2)));
        assert_eq!(
            ColumnEvaluator.calc("[PageNofM]", &ctx),
            Ok(Value::from("Page 2 of 5"))
        );
    }

    fn length_of(expression: &str, _: &DataContext<'_>) -> Result<Value, EvalError> {
        Ok(Value::from(expression.len() as i64))
    }

    #[test]
    fn plain_functions_are_evaluators() {
        let dict = Dictionary::new();
        let ctx = DataContext::new(&dict);
        let eval = length_of;
        assert_eq!(eval.calc("abc", &ctx), Ok(Value::Int(3)));
        let value = pollster::block_on(eval.calc_async("abcd", &ctx));
        assert_eq!(value, Ok(Value::Int(4)));
    }

    #[test]
    fn split_expressions_handles_nesting_and_unclosed_brackets() {
        let parts = split_expressions("Total: [Sum([a])] of [b", "[", "]");
        assert_eq!(
            parts,
            vec![
                TextPart::Literal("Total: ".to_string()),
                TextPart::Expression("Sum([a])".to_string()),
                TextPart::Literal(" of [b".to_string()),
            ]
        );
        assert_eq!(
            split_expressions("<<x>>", "<<", ">>"),
            vec![TextPart::Expression("x".to_string())]
        );
    }
}
