//! Query text parser using nom.
//!
//! Parses method-chain query text into a [`QueryModel`].
//!
//! # Syntax Overview
//!
//! ```text
//! Product.where(p => p.Price >= 10 && p.Name.StartsWith($prefix)).order_by(p => p.Name).take(5)
//! ───┬─── ──────────────────────┬─────────────────────────────── ─────────┬──────────  ───┬───
//!    │                          │                                         │               │
//!    │                          │                                         │               └── Result operator
//!    │                          │                                         └── Ordering
//!    │                          └── Filter lambda
//!    └── Entity set
//! ```
//!
//! Expressions support `&& || ! == != < <= > >= + - * / % ??`, the
//! conditional `a ? b : c`, member access, string and sequence methods,
//! `string.Compare` and `Math.*` calls, host function calls such as
//! `is_even(p.Id)`, `$name` parameters and `new { Name = p.Name }` records.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{map, opt, recognize},
    error::{Error as NomError, ErrorKind},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use std::cell::RefCell;
use std::sync::Arc;

use crate::error::{RelqError, RelqResult};
use crate::expr::{BinaryOp, E, Expr, ExprType, lit, null};
use crate::query::{Query, QueryModel};
use crate::value::Value;

/// Parsed, not yet lowered, expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Syntax {
    Literal(Value),
    Param(String),
    Ident(String),
    Member(Box<Syntax>, String),
    Call {
        target: Option<Box<Syntax>>,
        name: String,
        args: Vec<Syntax>,
    },
    Lambda {
        params: Vec<String>,
        body: Box<Syntax>,
    },
    Not(Box<Syntax>),
    Negate(Box<Syntax>),
    Binary(BinaryOp, Box<Syntax>, Box<Syntax>),
    Conditional(Box<Syntax>, Box<Syntax>, Box<Syntax>),
    Record(Vec<(String, Syntax)>),
}

/// One `.name(args)` link of a query chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    pub name: String,
    /// Byte offset of the operator name in the query text.
    pub position: usize,
    pub args: Vec<Syntax>,
}

/// A parsed query chain.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryText {
    pub source: String,
    pub operators: Vec<Operator>,
}

/// Parse and lower a complete query string.
pub fn parse(input: &str) -> RelqResult<QueryModel> {
    let text = parse_text(input)?;
    lower_query(&text)
}

/// Parse a query string without lowering it.
pub fn parse_text(input: &str) -> RelqResult<QueryText> {
    let input = input.trim();

    match parse_query_text(input) {
        Ok(("", (source, operators))) => Ok(QueryText {
            source: source.to_string(),
            operators: operators
                .into_iter()
                .map(|(name, args)| Operator {
                    name: name.to_string(),
                    position: offset(input, name),
                    args,
                })
                .collect(),
        }),
        Ok((remaining, _)) => Err(RelqError::parse(
            input.len() - remaining.len(),
            format!("Unexpected trailing content: '{}'", remaining),
        )),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(RelqError::parse(
            input.len() - e.input.len(),
            format!("Parse failed near '{}'", preview(e.input)),
        )),
        Err(nom::Err::Incomplete(_)) => {
            Err(RelqError::parse(input.len(), "Unexpected end of input"))
        }
    }
}

/// Parse a standalone expression such as a lambda.
pub fn parse_expression(input: &str) -> RelqResult<Syntax> {
    let input = input.trim();
    match parse_expr(input) {
        Ok((rest, syntax)) if rest.trim().is_empty() => Ok(syntax),
        Ok((rest, _)) => Err(RelqError::parse(
            input.len() - rest.len(),
            format!("Unexpected trailing content: '{}'", rest),
        )),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(RelqError::parse(
            input.len() - e.input.len(),
            format!("Parse failed near '{}'", preview(e.input)),
        )),
        Err(nom::Err::Incomplete(_)) => {
            Err(RelqError::parse(input.len(), "Unexpected end of input"))
        }
    }
}

fn offset(whole: &str, part: &str) -> usize {
    (part.as_ptr() as usize).saturating_sub(whole.as_ptr() as usize)
}

fn preview(s: &str) -> String {
    s.chars().take(20).collect()
}

// ============================================================================
// Grammar
// ============================================================================

type Chain<'a> = (&'a str, Vec<(&'a str, Vec<Syntax>)>);

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

/// `Entity` followed by any number of `.operator(args)`.
fn parse_query_text(input: &str) -> IResult<&str, Chain<'_>> {
    let (input, source) = ws(parse_identifier)(input)?;
    let (input, operators) = many0(parse_operator)(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, (source, operators)))
}

fn parse_operator(input: &str) -> IResult<&str, (&str, Vec<Syntax>)> {
    let (input, _) = ws(char('.'))(input)?;
    let (input, name) = parse_identifier(input)?;
    let (input, args) = parse_arguments(input)?;
    Ok((input, (name, args)))
}

fn parse_arguments(input: &str) -> IResult<&str, Vec<Syntax>> {
    delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), parse_expr),
        ws(char(')')),
    )(input)
}

fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

/// Full expression: a lambda or a conditional.
fn parse_expr(input: &str) -> IResult<&str, Syntax> {
    ws(alt((parse_lambda, parse_conditional)))(input)
}

/// `p => body` or `(a, b) => body`.
fn parse_lambda(input: &str) -> IResult<&str, Syntax> {
    let (input, params) = alt((
        map(parse_identifier, |p: &str| vec![p.to_string()]),
        delimited(
            ws(char('(')),
            separated_list0(ws(char(',')), map(parse_identifier, str::to_string)),
            ws(char(')')),
        ),
    ))(input)?;
    let (input, _) = ws(tag("=>"))(input)?;
    let (input, body) = parse_expr(input)?;
    Ok((
        input,
        Syntax::Lambda {
            params,
            body: Box::new(body),
        },
    ))
}

fn parse_conditional(input: &str) -> IResult<&str, Syntax> {
    let (input, test) = parse_coalesce(input)?;
    let (input, branches) = opt(tuple((
        preceded(ws(char('?')), parse_expr),
        preceded(ws(char(':')), parse_expr),
    )))(input)?;
    Ok(match branches {
        Some((if_true, if_false)) => (
            input,
            Syntax::Conditional(Box::new(test), Box::new(if_true), Box::new(if_false)),
        ),
        None => (input, test),
    })
}

/// Left-associative binary operators of one precedence level. Longer
/// tokens must come before their prefixes.
fn binary_level<'a>(
    input: &'a str,
    operand: fn(&'a str) -> IResult<&'a str, Syntax>,
    ops: &[(&'static str, BinaryOp)],
) -> IResult<&'a str, Syntax> {
    let (mut input, mut left) = operand(input)?;
    'next: loop {
        let (rest, _) = multispace0(input)?;
        for (token, op) in ops {
            if let Ok((rest, _)) = tag::<_, _, NomError<&str>>(*token)(rest) {
                let (rest, right) = operand(rest)?;
                left = Syntax::Binary(*op, Box::new(left), Box::new(right));
                input = rest;
                continue 'next;
            }
        }
        return Ok((input, left));
    }
}

fn parse_coalesce(input: &str) -> IResult<&str, Syntax> {
    binary_level(input, parse_or, &[("??", BinaryOp::Coalesce)])
}

fn parse_or(input: &str) -> IResult<&str, Syntax> {
    binary_level(input, parse_and, &[("||", BinaryOp::Or)])
}

fn parse_and(input: &str) -> IResult<&str, Syntax> {
    binary_level(input, parse_equality, &[("&&", BinaryOp::And)])
}

fn parse_equality(input: &str) -> IResult<&str, Syntax> {
    binary_level(
        input,
        parse_relational,
        &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
    )
}

fn parse_relational(input: &str) -> IResult<&str, Syntax> {
    binary_level(
        input,
        parse_additive,
        &[
            ("<=", BinaryOp::Le),
            (">=", BinaryOp::Ge),
            ("<", BinaryOp::Lt),
            (">", BinaryOp::Gt),
        ],
    )
}

fn parse_additive(input: &str) -> IResult<&str, Syntax> {
    binary_level(
        input,
        parse_multiplicative,
        &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
    )
}

fn parse_multiplicative(input: &str) -> IResult<&str, Syntax> {
    binary_level(
        input,
        parse_unary,
        &[
            ("*", BinaryOp::Mul),
            ("/", BinaryOp::Div),
            ("%", BinaryOp::Mod),
        ],
    )
}

fn parse_unary(input: &str) -> IResult<&str, Syntax> {
    let (input, _) = multispace0(input)?;
    if let Ok((rest, _)) = char::<_, NomError<&str>>('!')(input) {
        let (rest, operand) = parse_unary(rest)?;
        return Ok((rest, Syntax::Not(Box::new(operand))));
    }
    if let Ok((rest, _)) = char::<_, NomError<&str>>('-')(input) {
        let (rest, operand) = parse_unary(rest)?;
        // fold negative number literals
        let negated = match operand {
            Syntax::Literal(Value::Int(n)) => Syntax::Literal(Value::Int(-n)),
            Syntax::Literal(Value::Float(f)) => Syntax::Literal(Value::Float(-f)),
            other => Syntax::Negate(Box::new(other)),
        };
        return Ok((rest, negated));
    }
    parse_postfix(input)
}

/// Primary followed by `.Member` and `.Method(args)` links.
fn parse_postfix(input: &str) -> IResult<&str, Syntax> {
    let (mut input, mut target) = parse_primary(input)?;
    loop {
        let Ok((rest, _)) = ws(char::<_, NomError<&str>>('.'))(input) else {
            return Ok((input, target));
        };
        let (rest, name) = parse_identifier(rest)?;
        match parse_arguments(rest) {
            Ok((rest, args)) => {
                target = Syntax::Call {
                    target: Some(Box::new(target)),
                    name: name.to_string(),
                    args,
                };
                input = rest;
            }
            Err(nom::Err::Error(_)) => {
                target = Syntax::Member(Box::new(target), name.to_string());
                input = rest;
            }
            Err(e) => return Err(e),
        }
    }
}

fn parse_primary(input: &str) -> IResult<&str, Syntax> {
    let (input, _) = multispace0(input)?;
    alt((
        parse_number,
        map(parse_string, |s| Syntax::Literal(Value::Text(s))),
        map(preceded(char('$'), parse_identifier), |name: &str| {
            Syntax::Param(name.to_string())
        }),
        delimited(char('('), parse_expr, char(')')),
        parse_word,
    ))(input)
}

fn parse_number(input: &str) -> IResult<&str, Syntax> {
    let (rest, text) = recognize(pair(digit1, opt(pair(char('.'), digit1))))(input)?;
    let value = if text.contains('.') {
        text.parse::<f64>().ok().map(Value::Float)
    } else {
        text.parse::<i64>().ok().map(Value::Int)
    };
    match value {
        Some(value) => Ok((rest, Syntax::Literal(value))),
        None => Err(nom::Err::Failure(NomError::new(input, ErrorKind::Digit))),
    }
}

/// Single- or double-quoted string with backslash escapes.
fn parse_string(input: &str) -> IResult<&str, String> {
    let mut chars = input.char_indices();
    let quote = match chars.next() {
        Some((_, c @ ('\'' | '"'))) => c,
        _ => return Err(nom::Err::Error(NomError::new(input, ErrorKind::Char))),
    };
    let mut out = String::new();
    let mut escaped = false;
    for (i, c) in chars {
        if escaped {
            out.push(match c {
                'n' => '\n',
                't' => '\t',
                other => other,
            });
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Ok((&input[i + c.len_utf8()..], out));
        } else {
            out.push(c);
        }
    }
    Err(nom::Err::Failure(NomError::new(input, ErrorKind::Char)))
}

/// Keywords, records, bare function calls and identifiers.
fn parse_word(input: &str) -> IResult<&str, Syntax> {
    let (rest, word) = parse_identifier(input)?;
    match word {
        "true" => Ok((rest, Syntax::Literal(Value::Bool(true)))),
        "false" => Ok((rest, Syntax::Literal(Value::Bool(false)))),
        "null" => Ok((rest, Syntax::Literal(Value::Null))),
        "new" => parse_record(rest),
        _ => match parse_arguments(rest) {
            Ok((rest, args)) => Ok((
                rest,
                Syntax::Call {
                    target: None,
                    name: word.to_string(),
                    args,
                },
            )),
            Err(nom::Err::Error(_)) => Ok((rest, Syntax::Ident(word.to_string()))),
            Err(e) => Err(e),
        },
    }
}

/// `{ Name = expr, p.Member }`; a bare member takes its own name.
fn parse_record(input: &str) -> IResult<&str, Syntax> {
    let (input, fields) = delimited(
        ws(char('{')),
        separated_list0(ws(char(',')), parse_record_field),
        ws(char('}')),
    )(input)?;
    Ok((input, Syntax::Record(fields)))
}

fn parse_record_field(input: &str) -> IResult<&str, (String, Syntax)> {
    let named = tuple((ws(parse_identifier), char('='), parse_expr))(input);
    if let Ok((rest, (name, _, value))) = named {
        return Ok((rest, (name.to_string(), value)));
    }
    let (rest, value) = parse_expr(input)?;
    let name = match &value {
        Syntax::Member(_, name) => name.clone(),
        _ => return Err(nom::Err::Failure(NomError::new(input, ErrorKind::Verify))),
    };
    Ok((rest, (name, value)))
}

// ============================================================================
// Lowering
// ============================================================================

type Scope = [(String, E)];

/// Lowers syntax into expression trees. Builder closures cannot return
/// errors, so the first failure is recorded and surfaced at the end.
#[derive(Default)]
struct Lowering {
    error: RefCell<Option<RelqError>>,
}

/// Case- and underscore-insensitive name used to match methods and
/// operators, so `order_by`, `OrderBy` and `orderBy` are the same.
fn normalized(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

impl Lowering {
    fn fail(&self, err: RelqError) -> E {
        let mut slot = self.error.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        }
        null()
    }

    fn finish<T>(self, value: T) -> RelqResult<T> {
        match self.error.into_inner() {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }

    /// Bind a lambda's parameters to `args` and lower its body.
    fn lambda(&self, syntax: &Syntax, scope: &Scope, args: &[E]) -> E {
        let Syntax::Lambda { params, body } = syntax else {
            return self.fail(RelqError::untranslatable(
                "lambda",
                "expected a lambda such as `p => p.Name`",
            ));
        };
        if params.len() != args.len() {
            return self.fail(RelqError::untranslatable(
                "lambda",
                format!(
                    "lambda takes {} parameters where {} are in scope",
                    params.len(),
                    args.len()
                ),
            ));
        }
        let mut inner = scope.to_vec();
        inner.extend(params.iter().cloned().zip(args.iter().cloned()));
        self.expr(body, &inner)
    }

    fn expr(&self, syntax: &Syntax, scope: &Scope) -> E {
        match syntax {
            Syntax::Literal(value) => lit(value.clone()),
            Syntax::Param(name) => E(Arc::new(Expr::QueryParameter {
                name: name.as_str().into(),
                ty: ExprType::unknown(),
            })),
            Syntax::Ident(name) => match scope.iter().rev().find(|(n, _)| n == name) {
                Some((_, e)) => e.clone(),
                None => self.fail(RelqError::untranslatable(
                    name.as_str(),
                    "unknown identifier",
                )),
            },
            Syntax::Member(target, name) => self.expr(target, scope).member(name),
            Syntax::Call { target, name, args } => self.call(target.as_deref(), name, args, scope),
            Syntax::Lambda { .. } => self.fail(RelqError::untranslatable(
                "lambda",
                "lambdas are only allowed as method arguments",
            )),
            Syntax::Not(operand) => self.expr(operand, scope).not(),
            Syntax::Negate(operand) => self.expr(operand, scope).neg(),
            Syntax::Binary(op, left, right) => {
                let left = self.expr(left, scope);
                let right = self.expr(right, scope);
                match op {
                    BinaryOp::Eq => left.eq(right),
                    BinaryOp::Ne => left.ne(right),
                    BinaryOp::Lt => left.lt(right),
                    BinaryOp::Le => left.le(right),
                    BinaryOp::Gt => left.gt(right),
                    BinaryOp::Ge => left.ge(right),
                    BinaryOp::And => left.and(right),
                    BinaryOp::Or => left.or(right),
                    BinaryOp::Add => left.add(right),
                    BinaryOp::Sub => left.sub(right),
                    BinaryOp::Mul => left.mul(right),
                    BinaryOp::Div => left.div(right),
                    BinaryOp::Mod => left.rem(right),
                    BinaryOp::Coalesce => left.coalesce(right),
                }
            }
            Syntax::Conditional(test, if_true, if_false) => E::cond(
                self.expr(test, scope),
                self.expr(if_true, scope),
                self.expr(if_false, scope),
            ),
            Syntax::Record(fields) => {
                let lowered: Vec<(&str, E)> = fields
                    .iter()
                    .map(|(name, value)| (name.as_str(), self.expr(value, scope)))
                    .collect();
                E::record(lowered)
            }
        }
    }

    fn call(&self, target: Option<&Syntax>, name: &str, args: &[Syntax], scope: &Scope) -> E {
        let Some(target) = target else {
            let args = args.iter().map(|a| self.expr(a, scope)).collect();
            return E::host(name, args);
        };

        // string.Compare(a, b), Math.Abs(x)
        if let Syntax::Ident(class) = target {
            if !scope.iter().any(|(n, _)| n == class) {
                return self.static_call(class, name, args, scope);
            }
        }

        let this = self.expr(target, scope);
        let arg = |i: usize| self.expr(&args[i], scope);
        let method = normalized(name);
        let arity_ok = |n: usize| {
            if args.len() == n {
                true
            } else {
                self.fail(RelqError::untranslatable(
                    name,
                    format!("takes {} arguments, got {}", n, args.len()),
                ));
                false
            }
        };
        match method.as_str() {
            "equals" if arity_ok(1) => this.equals(arg(0)),
            "contains" if arity_ok(1) => this.contains(arg(0)),
            "startswith" if arity_ok(1) => this.starts_with(arg(0)),
            "endswith" if arity_ok(1) => this.ends_with(arg(0)),
            "indexof" if arity_ok(1) => this.index_of(arg(0)),
            "toupper" if arity_ok(0) => this.to_upper(),
            "tolower" if arity_ok(0) => this.to_lower(),
            "trim" if arity_ok(0) => this.trim(),
            "length" if arity_ok(0) => this.length(),
            "substring" if arity_ok(2) => this.substring(arg(0), arg(1)),
            "replace" if arity_ok(2) => this.replace(arg(0), arg(1)),
            "any" if args.is_empty() => this.any(),
            "any" if arity_ok(1) => this.any_where(|x| self.lambda(&args[0], scope, &[x])),
            "all" if arity_ok(1) => this.all(|x| self.lambda(&args[0], scope, &[x])),
            "count" if args.is_empty() => this.count(),
            "count" if arity_ok(1) => this.count_where(|x| self.lambda(&args[0], scope, &[x])),
            "sum" if arity_ok(1) => this.sum(|x| self.lambda(&args[0], scope, &[x])),
            "min" if arity_ok(1) => this.min(|x| self.lambda(&args[0], scope, &[x])),
            "max" if arity_ok(1) => this.max(|x| self.lambda(&args[0], scope, &[x])),
            "average" if arity_ok(1) => this.average(|x| self.lambda(&args[0], scope, &[x])),
            "equals" | "contains" | "startswith" | "endswith" | "indexof" | "toupper"
            | "tolower" | "trim" | "length" | "substring" | "replace" | "any" | "all"
            | "count" | "sum" | "min" | "max" | "average" => null(),
            _ => self.fail(RelqError::untranslatable(name, "unknown method")),
        }
    }

    fn static_call(&self, class: &str, name: &str, args: &[Syntax], scope: &Scope) -> E {
        let lowered: Vec<E> = args.iter().map(|a| self.expr(a, scope)).collect();
        let construct = format!("{}.{}", class, name);
        match (class, normalized(name).as_str(), lowered.as_slice()) {
            ("string" | "String", "compare", [a, b]) => E::compare(a, b),
            ("Math", "abs", [x]) => x.abs(),
            ("Math", "round", [x]) => x.round(),
            ("Math", "floor", [x]) => x.floor(),
            ("Math", "ceiling", [x]) => x.ceiling(),
            _ => self.fail(RelqError::untranslatable(construct, "unknown function")),
        }
    }
}

/// Lower a parsed query chain through the [`Query`] builder.
pub fn lower_query(text: &QueryText) -> RelqResult<QueryModel> {
    let lowering = Lowering::default();
    let mut query = Query::from(&text.source);

    for op in &text.operators {
        let args = &op.args;
        let expect = |n: usize| -> RelqResult<()> {
            if args.len() == n {
                Ok(())
            } else {
                Err(RelqError::parse(
                    op.position,
                    format!("'{}' takes {} arguments, got {}", op.name, n, args.len()),
                ))
            }
        };
        let l = &lowering;
        query = match normalized(&op.name).as_str() {
            "where" | "filter" => {
                expect(1)?;
                query.filter_n(|ps| l.lambda(&args[0], &[], ps))
            }
            "select" => {
                expect(1)?;
                query.select(|ps| l.lambda(&args[0], &[], ps))
            }
            "orderby" => {
                expect(1)?;
                query.ordering(|ps| l.lambda(&args[0], &[], ps), false, false)
            }
            "orderbydesc" | "orderbydescending" => {
                expect(1)?;
                query.ordering(|ps| l.lambda(&args[0], &[], ps), true, false)
            }
            "thenby" => {
                expect(1)?;
                query.ordering(|ps| l.lambda(&args[0], &[], ps), false, true)
            }
            "thenbydesc" | "thenbydescending" => {
                expect(1)?;
                query.ordering(|ps| l.lambda(&args[0], &[], ps), true, true)
            }
            "join" => {
                expect(3)?;
                let entity = entity_name(&args[0], op)?;
                query.join(
                    &entity,
                    |ps| l.lambda(&args[1], &[], ps),
                    |x| l.lambda(&args[2], &[], &[x]),
                )
            }
            "from" => {
                expect(1)?;
                query.from_also(&entity_name(&args[0], op)?)
            }
            "groupby" => {
                expect(1)?;
                query.group_by(|ps| l.lambda(&args[0], &[], ps))
            }
            "take" => {
                expect(1)?;
                query.take(l.expr(&args[0], &[]))
            }
            "skip" => {
                expect(1)?;
                query.skip(l.expr(&args[0], &[]))
            }
            "distinct" => {
                expect(0)?;
                query.distinct()
            }
            "include" => {
                expect(1)?;
                match &args[0] {
                    Syntax::Literal(Value::Text(path)) => query.include(path),
                    _ => {
                        return Err(RelqError::parse(
                            op.position,
                            "include expects a quoted navigation path",
                        ));
                    }
                }
            }
            "sum" | "min" | "max" | "average" => {
                expect(1)?;
                let selector = |x: E| l.lambda(&args[0], &[], &[x]);
                match normalized(&op.name).as_str() {
                    "sum" => query.sum(selector),
                    "min" => query.min(selector),
                    "max" => query.max(selector),
                    _ => query.average(selector),
                }
            }
            // count, any, first and first_or_default take an optional predicate
            terminal @ ("count" | "any" | "first" | "firstordefault") => {
                if args.len() > 1 {
                    expect(1)?;
                }
                if let Some(predicate) = args.first() {
                    query = query.filter_n(|ps| l.lambda(predicate, &[], ps));
                }
                match terminal {
                    "count" => query.count(),
                    "any" => query.any(),
                    "first" => query.first(),
                    _ => query.first_or_default(),
                }
            }
            _ => {
                return Err(RelqError::parse(
                    op.position,
                    format!("Unknown operator '{}'", op.name),
                ));
            }
        };
    }

    let query = lowering.finish(query)?;
    query.build()
}

fn entity_name(syntax: &Syntax, op: &Operator) -> RelqResult<String> {
    match syntax {
        Syntax::Ident(name) | Syntax::Literal(Value::Text(name)) => Ok(name.clone()),
        _ => Err(RelqError::parse(
            op.position,
            format!("'{}' expects an entity name", op.name),
        )),
    }
}
