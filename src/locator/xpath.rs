//! Path-expression locators
//!
//! Compiles the subset of XPath 1.0 that site templates use and evaluates it
//! over a parsed `scraper::Html` tree. Only element nodes are selected; text
//! and attributes are reachable from predicates, not as results.
//!
//! Supported:
//! - absolute (`/html/body`), descendant (`//span`) and relative (`./a`, `.//a`) paths
//! - `.`, `..`, `*`, `node()`, element names
//! - axes: `child`, `descendant`, `descendant-or-self`, `parent`, `self`,
//!   `following-sibling`, `preceding-sibling`
//! - predicates: `[n]`, `[last()]`, `[@a]`, `[@a="v"]`, `[@a!="v"]`, `[text()="v"]`,
//!   `[.="v"]`, `contains(x, "v")`, `starts-with(x, "v")`, `normalize-space(x)`,
//!   `not(..)`, `and`, `or` and grouping parentheses

use scraper::{ElementRef, Html};

use crate::error::LocatorError;

/// A compiled path expression.
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    absolute: bool,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Parent,
    SelfNode,
    FollowingSibling,
    PrecedingSibling,
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    /// `node()`, also matches the document node
    Node,
    /// `*`
    AnyElement,
    Name(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Position(usize),
    Last,
    Test(Cond),
}

#[derive(Debug, Clone, PartialEq)]
enum Cond {
    And(Box<Cond>, Box<Cond>),
    Or(Box<Cond>, Box<Cond>),
    Not(Box<Cond>),
    Exists(Operand),
    Equals(Operand, String),
    NotEquals(Operand, String),
    Contains(Operand, String),
    StartsWith(Operand, String),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Attr(String),
    /// Direct text-node children
    Text,
    /// String value of the context node
    Context,
    NormalizeSpace(Box<Operand>),
}

impl PathExpr {
    /// Compile a path expression, reporting the byte offset of the first error.
    pub fn compile(expression: &str) -> Result<Self, LocatorError> {
        Parser::new(expression).parse_path()
    }

    /// Evaluate against `html`, relative to `scope` (the document when `None`).
    ///
    /// Results are in document order without duplicates.
    pub fn select<'a>(
        &self,
        html: &'a Html,
        scope: Option<ElementRef<'a>>,
        limit: Option<usize>,
    ) -> Vec<ElementRef<'a>> {
        let start = match (self.absolute, scope) {
            (false, Some(el)) => Ctx::Element(el),
            _ => Ctx::Document,
        };

        let mut current = vec![start];
        for step in &self.steps {
            let mut next = Vec::new();
            for ctx in &current {
                let mut candidates: Vec<Ctx<'a>> = step
                    .axis
                    .walk(html, *ctx)
                    .into_iter()
                    .filter(|c| step.test.matches(c))
                    .collect();
                for predicate in &step.predicates {
                    candidates = predicate.apply(html, candidates);
                }
                next.extend(candidates);
            }
            next.sort_by_key(Ctx::order_key);
            next.dedup_by_key(|c| c.order_key());
            current = next;
            if current.is_empty() {
                break;
            }
        }

        let elements = current.into_iter().filter_map(|c| match c {
            Ctx::Element(el) => Some(el),
            Ctx::Document => None,
        });
        match limit {
            Some(n) => elements.take(n).collect(),
            None => elements.collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Ctx<'a> {
    Document,
    Element(ElementRef<'a>),
}

impl<'a> Ctx<'a> {
    fn order_key(&self) -> Option<impl Ord + Copy> {
        match self {
            Ctx::Document => None,
            Ctx::Element(el) => Some(el.id()),
        }
    }

    fn children(self, html: &'a Html) -> Vec<Ctx<'a>> {
        match self {
            Ctx::Document => vec![Ctx::Element(html.root_element())],
            Ctx::Element(el) => el
                .children()
                .filter_map(ElementRef::wrap)
                .map(Ctx::Element)
                .collect(),
        }
    }

    /// Descendant elements in document order, excluding self.
    fn descendants(self, html: &'a Html) -> Vec<Ctx<'a>> {
        let root = match self {
            Ctx::Document => return Ctx::Element(html.root_element()).descendants_or_self(html),
            Ctx::Element(el) => el,
        };
        root.descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .map(Ctx::Element)
            .collect()
    }

    fn descendants_or_self(self, html: &'a Html) -> Vec<Ctx<'a>> {
        let mut out = vec![self];
        out.extend(self.descendants(html));
        out
    }

    fn parent(self) -> Option<Ctx<'a>> {
        let el = match self {
            Ctx::Document => return None,
            Ctx::Element(el) => el,
        };
        let parent = el.parent()?;
        if parent.value().is_document() {
            Some(Ctx::Document)
        } else {
            ElementRef::wrap(parent).map(Ctx::Element)
        }
    }

    fn attr(&self, name: &str) -> Option<&'a str> {
        match self {
            Ctx::Document => None,
            Ctx::Element(el) => el.value().attr(name),
        }
    }

    fn string_value(&self, html: &'a Html) -> String {
        let el = match self {
            Ctx::Document => html.root_element(),
            Ctx::Element(el) => *el,
        };
        el.text().collect()
    }

    fn text_children(&self) -> Vec<String> {
        match self {
            Ctx::Document => Vec::new(),
            Ctx::Element(el) => el
                .children()
                .filter_map(|node| {
                    node.value().as_text().map(|text| {
                        let s: &str = text;
                        s.to_string()
                    })
                })
                .collect(),
        }
    }
}

impl Axis {
    fn walk<'a>(self, html: &'a Html, ctx: Ctx<'a>) -> Vec<Ctx<'a>> {
        match self {
            Axis::Child => ctx.children(html),
            Axis::Descendant => ctx.descendants(html),
            Axis::DescendantOrSelf => ctx.descendants_or_self(html),
            Axis::Parent => ctx.parent().into_iter().collect(),
            Axis::SelfNode => vec![ctx],
            Axis::FollowingSibling => match ctx {
                Ctx::Document => Vec::new(),
                Ctx::Element(el) => el
                    .next_siblings()
                    .filter_map(ElementRef::wrap)
                    .map(Ctx::Element)
                    .collect(),
            },
            // Nearest sibling first, so positional predicates count backwards
            Axis::PrecedingSibling => match ctx {
                Ctx::Document => Vec::new(),
                Ctx::Element(el) => el
                    .prev_siblings()
                    .filter_map(ElementRef::wrap)
                    .map(Ctx::Element)
                    .collect(),
            },
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "parent" => Axis::Parent,
            "self" => Axis::SelfNode,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            _ => return None,
        })
    }
}

impl NodeTest {
    fn matches(&self, ctx: &Ctx<'_>) -> bool {
        match (self, ctx) {
            (NodeTest::Node, _) => true,
            (_, Ctx::Document) => false,
            (NodeTest::AnyElement, Ctx::Element(_)) => true,
            (NodeTest::Name(name), Ctx::Element(el)) => el.value().name().eq_ignore_ascii_case(name),
        }
    }
}

impl Predicate {
    fn apply<'a>(&self, html: &'a Html, candidates: Vec<Ctx<'a>>) -> Vec<Ctx<'a>> {
        match self {
            Predicate::Position(n) => candidates.into_iter().nth(n - 1).into_iter().collect(),
            Predicate::Last => candidates.into_iter().last().into_iter().collect(),
            Predicate::Test(cond) => candidates
                .into_iter()
                .filter(|c| cond.eval(html, c))
                .collect(),
        }
    }
}

impl Cond {
    fn eval<'a>(&self, html: &'a Html, ctx: &Ctx<'a>) -> bool {
        match self {
            Cond::And(a, b) => a.eval(html, ctx) && b.eval(html, ctx),
            Cond::Or(a, b) => a.eval(html, ctx) || b.eval(html, ctx),
            Cond::Not(inner) => !inner.eval(html, ctx),
            Cond::Exists(op) => !op.values(html, ctx).is_empty(),
            Cond::Equals(op, v) => op.values(html, ctx).iter().any(|s| s == v),
            Cond::NotEquals(op, v) => op.values(html, ctx).iter().any(|s| s != v),
            Cond::Contains(op, v) => op.values(html, ctx).iter().any(|s| s.contains(v.as_str())),
            Cond::StartsWith(op, v) => op.values(html, ctx).iter().any(|s| s.starts_with(v.as_str())),
        }
    }
}

impl Operand {
    /// Every string the operand denotes; comparisons are existential over them.
    fn values<'a>(&self, html: &'a Html, ctx: &Ctx<'a>) -> Vec<String> {
        match self {
            Operand::Attr(name) => ctx.attr(name).map(String::from).into_iter().collect(),
            Operand::Text => ctx.text_children(),
            Operand::Context => vec![ctx.string_value(html)],
            Operand::NormalizeSpace(inner) => {
                let joined = inner.values(html, ctx).into_iter().next().unwrap_or_default();
                vec![joined.split_whitespace().collect::<Vec<_>>().join(" ")]
            }
        }
    }
}

struct Parser<'s> {
    src: &'s str,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn new(src: &'s str) -> Self {
        Self { src, pos: 0 }
    }

    fn error(&self, reason: impl Into<String>) -> LocatorError {
        LocatorError::InvalidPath {
            expression: self.src.to_string(),
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn rest(&self) -> &'s str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), LocatorError> {
        self.skip_ws();
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{token}`")))
        }
    }

    /// Consume `keyword` only when it is not the prefix of a longer name.
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let rest = self.rest();
        if !rest.starts_with(keyword) {
            return false;
        }
        let boundary = rest[keyword.len()..]
            .chars()
            .next()
            .map_or(true, |c| !is_name_char(c));
        if boundary {
            self.pos += keyword.len();
        }
        boundary
    }

    fn name(&mut self) -> Result<&'s str, LocatorError> {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !is_name_char(*c))
            .map_or(rest.len(), |(i, _)| i);
        if len == 0 {
            return Err(self.error("expected a name"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn string_literal(&mut self) -> Result<String, LocatorError> {
        self.skip_ws();
        let quote = match self.peek() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error("expected a quoted string")),
        };
        self.pos += 1;
        let rest = self.rest();
        let end = rest
            .find(quote)
            .ok_or_else(|| self.error("unterminated string"))?;
        self.pos += end + 1;
        Ok(rest[..end].to_string())
    }

    fn parse_path(mut self) -> Result<PathExpr, LocatorError> {
        self.skip_ws();
        let mut steps = Vec::new();
        let absolute = if self.eat("//") {
            steps.push(descendant_or_self());
            true
        } else {
            self.eat("/")
        };

        if absolute && self.rest().trim().is_empty() && steps.is_empty() {
            return Ok(PathExpr { absolute, steps });
        }

        loop {
            steps.push(self.parse_step()?);
            self.skip_ws();
            if self.eat("//") {
                steps.push(descendant_or_self());
            } else if !self.eat("/") {
                break;
            }
        }

        self.skip_ws();
        if !self.rest().is_empty() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(PathExpr { absolute, steps })
    }

    fn parse_step(&mut self) -> Result<Step, LocatorError> {
        self.skip_ws();
        if self.eat("..") {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }
        if self.eat(".") {
            return Ok(Step {
                axis: Axis::SelfNode,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }
        if self.peek() == Some('@') {
            return Err(self.error("attribute steps are not supported; use an attribute extract kind"));
        }

        let (axis, test) = if self.eat("*") {
            (Axis::Child, NodeTest::AnyElement)
        } else {
            let name = self.name()?;
            if self.eat("::") {
                let axis = Axis::from_name(name)
                    .ok_or_else(|| self.error(format!("unsupported axis `{name}`")))?;
                (axis, self.parse_node_test()?)
            } else if self.eat("()") {
                (Axis::Child, node_function(name).ok_or_else(|| self.error("unsupported node test"))?)
            } else {
                (Axis::Child, NodeTest::Name(name.to_ascii_lowercase()))
            }
        };

        let mut predicates = Vec::new();
        loop {
            self.skip_ws();
            if !self.eat("[") {
                break;
            }
            predicates.push(self.parse_predicate()?);
            self.expect("]")?;
        }

        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, LocatorError> {
        if self.eat("*") {
            return Ok(NodeTest::AnyElement);
        }
        let name = self.name()?;
        if self.eat("()") {
            node_function(name).ok_or_else(|| self.error("unsupported node test"))
        } else {
            Ok(NodeTest::Name(name.to_ascii_lowercase()))
        }
    }

    fn parse_predicate(&mut self) -> Result<Predicate, LocatorError> {
        self.skip_ws();
        let digits = self.rest().chars().take_while(char::is_ascii_digit).count();
        if digits > 0 {
            let n: usize = self.rest()[..digits]
                .parse()
                .map_err(|_| self.error("position out of range"))?;
            if n == 0 {
                return Err(self.error("positions start at 1"));
            }
            self.pos += digits;
            return Ok(Predicate::Position(n));
        }
        let checkpoint = self.pos;
        if self.eat("last()") {
            self.skip_ws();
            if self.peek() == Some(']') {
                return Ok(Predicate::Last);
            }
            self.pos = checkpoint;
        }
        Ok(Predicate::Test(self.parse_or()?))
    }

    fn parse_or(&mut self) -> Result<Cond, LocatorError> {
        let mut left = self.parse_and()?;
        loop {
            self.skip_ws();
            if !self.eat_keyword("or") {
                return Ok(left);
            }
            let right = self.parse_and()?;
            left = Cond::Or(Box::new(left), Box::new(right));
        }
    }

    fn parse_and(&mut self) -> Result<Cond, LocatorError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_ws();
            if !self.eat_keyword("and") {
                return Ok(left);
            }
            let right = self.parse_unary()?;
            left = Cond::And(Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Cond, LocatorError> {
        self.skip_ws();
        if self.eat("not(") {
            let inner = self.parse_or()?;
            self.expect(")")?;
            return Ok(Cond::Not(Box::new(inner)));
        }
        if self.eat("(") {
            let inner = self.parse_or()?;
            self.expect(")")?;
            return Ok(inner);
        }
        if self.eat("contains(") {
            let (op, value) = self.parse_call_args()?;
            return Ok(Cond::Contains(op, value));
        }
        if self.eat("starts-with(") {
            let (op, value) = self.parse_call_args()?;
            return Ok(Cond::StartsWith(op, value));
        }

        let op = self.parse_operand()?;
        self.skip_ws();
        if self.eat("!=") {
            Ok(Cond::NotEquals(op, self.string_literal()?))
        } else if self.eat("=") {
            Ok(Cond::Equals(op, self.string_literal()?))
        } else {
            Ok(Cond::Exists(op))
        }
    }

    fn parse_call_args(&mut self) -> Result<(Operand, String), LocatorError> {
        let op = self.parse_operand()?;
        self.expect(",")?;
        let value = self.string_literal()?;
        self.expect(")")?;
        Ok((op, value))
    }

    fn parse_operand(&mut self) -> Result<Operand, LocatorError> {
        self.skip_ws();
        if self.eat("@") {
            return Ok(Operand::Attr(self.name()?.to_string()));
        }
        if self.eat("text()") {
            return Ok(Operand::Text);
        }
        if self.eat("normalize-space(") {
            self.skip_ws();
            if self.eat(")") {
                return Ok(Operand::NormalizeSpace(Box::new(Operand::Context)));
            }
            let inner = self.parse_operand()?;
            self.expect(")")?;
            return Ok(Operand::NormalizeSpace(Box::new(inner)));
        }
        if self.eat(".") {
            return Ok(Operand::Context);
        }
        Err(self.error("expected `@attr`, `text()`, `.` or a function call"))
    }
}

fn descendant_or_self() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        test: NodeTest::Node,
        predicates: Vec::new(),
    }
}

fn node_function(name: &str) -> Option<NodeTest> {
    match name {
        "node" => Some(NodeTest::Node),
        _ => None,
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}
