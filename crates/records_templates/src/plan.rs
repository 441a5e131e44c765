//! Template compilation.
//!
//! Template sources are compiled once into an [`ExpansionPlan`], a tree of
//! render nodes the engine walks. Supported tags:
//!
//! ```text
//! {{ images[0] | render_links(5) }}      expand a placeholder through filters
//! {% call scan = imaging_metadata_file %} bind a callback result
//! {% let fov = scan | special_autofill_table("imaging-fov") %}
//! {% for i in range(slm) %} ... {% endfor %}
//! {# comment #}
//! ```
//!
//! Block tags and comments swallow the newline that follows them and the
//! indentation before them when they start a line.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::definition::PlaceholderKind;
use crate::error::{RecordsError, RecordsResult};

/// A compiled template.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionPlan {
    pub template: String,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Expand(Expr),
    Let { name: String, expr: Expr },
    Call { name: String, callback: String },
    Loop {
        var: String,
        count: Count,
        body: Vec<Node>,
    },
}

/// A target followed by a filter chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub target: Target,
    pub filters: Vec<FilterCall>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Placeholder { kind: PlaceholderKind, index: Index },
    Local { name: String, index: Option<Index> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Index {
    Literal(usize),
    Var(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterCall {
    pub name: String,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(usize),
    Str(String),
    Name(String),
}

/// Loop bound.
#[derive(Debug, Clone, PartialEq)]
pub enum Count {
    Static(usize),
    /// A local or a placeholder kind, measured at render time
    Dynamic(String),
}

fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        Regex::new(r"(?s)\{\{(.*?)\}\}|\{%(.*?)%\}|\{#.*?#\}").expect("tag pattern is valid")
    })
}

impl ExpansionPlan {
    /// Compile a template source. Errors name the template and line.
    pub fn compile(template: &str, source: &str) -> RecordsResult<Self> {
        let nodes = Compiler::new(template, source).run()?;
        debug!("Compiled template {} into {} node(s)", template, nodes.len());
        Ok(Self {
            template: template.to_string(),
            nodes,
        })
    }

    /// Callback names the template calls, in order of first use.
    pub fn callbacks(&self) -> Vec<&str> {
        let mut names = Vec::new();
        collect_callbacks(&self.nodes, &mut names);
        names
    }
}

fn collect_callbacks<'p>(nodes: &'p [Node], names: &mut Vec<&'p str>) {
    for node in nodes {
        match node {
            Node::Call { callback, .. } if !names.contains(&callback.as_str()) => {
                names.push(callback)
            }
            Node::Loop { body, .. } => collect_callbacks(body, names),
            _ => {}
        }
    }
}

struct OpenLoop {
    var: String,
    count: Count,
    body: Vec<Node>,
    line: usize,
}

struct Compiler<'s> {
    template: &'s str,
    source: &'s str,
    root: Vec<Node>,
    loops: Vec<OpenLoop>,
}

impl<'s> Compiler<'s> {
    fn new(template: &'s str, source: &'s str) -> Self {
        Self {
            template,
            source,
            root: Vec::new(),
            loops: Vec::new(),
        }
    }

    fn run(mut self) -> RecordsResult<Vec<Node>> {
        let source = self.source;
        let mut cursor = 0;
        let mut after_block = false;

        for caps in tag_pattern().captures_iter(source) {
            let Some(tag) = caps.get(0) else { continue };
            let is_expression = caps.get(1).is_some();

            self.text(cursor, tag.start(), after_block, !is_expression)?;

            let line = line_of(source, tag.start());
            if let Some(expr) = caps.get(1) {
                let expr = parse_expr(expr.as_str()).map_err(|m| self.syntax(line, m))?;
                self.current().push(Node::Expand(expr));
            } else if let Some(statement) = caps.get(2) {
                self.statement(statement.as_str(), line)?;
            }

            after_block = !is_expression;
            cursor = tag.end();
        }
        self.text(cursor, source.len(), after_block, false)?;

        if let Some(open) = self.loops.last() {
            return Err(self.syntax(open.line, "'for' is never closed with 'endfor'"));
        }
        Ok(self.root)
    }

    /// Emit literal text between tags, applying block trimming.
    fn text(&mut self, start: usize, end: usize, after_block: bool, before_block: bool) -> RecordsResult<()> {
        let source = self.source;
        let mut text = &source[start..end];
        let mut at_line_start = start == 0 || source[..start].ends_with('\n');

        if after_block {
            if let Some(rest) = text.strip_prefix("\r\n").or_else(|| text.strip_prefix('\n')) {
                text = rest;
                at_line_start = true;
            }
        }
        if before_block {
            text = strip_indent(text, at_line_start);
        }

        for marker in ["{{", "{%", "{#"] {
            if let Some(offset) = text.find(marker) {
                let line = line_of(source, start + offset);
                return Err(self.syntax(line, format!("unclosed '{}' tag", marker)));
            }
        }

        if !text.is_empty() {
            self.current().push(Node::Text(text.to_string()));
        }
        Ok(())
    }

    fn statement(&mut self, statement: &str, line: usize) -> RecordsResult<()> {
        let tokens = tokenize(statement).map_err(|m| self.syntax(line, m))?;
        let mut parser = Parser::new(tokens);
        let keyword = parser
            .ident("statement")
            .map_err(|m| self.syntax(line, m))?;

        match keyword.as_str() {
            "call" => {
                let node = parser.call().map_err(|m| self.syntax(line, m))?;
                self.current().push(node);
            }
            "let" => {
                let node = parser.assignment().map_err(|m| self.syntax(line, m))?;
                self.current().push(node);
            }
            "for" => {
                let (var, count) = parser.for_header().map_err(|m| self.syntax(line, m))?;
                self.loops.push(OpenLoop {
                    var,
                    count,
                    body: Vec::new(),
                    line,
                });
            }
            "endfor" => {
                parser.finish().map_err(|m| self.syntax(line, m))?;
                let open = self
                    .loops
                    .pop()
                    .ok_or_else(|| self.syntax(line, "'endfor' without 'for'"))?;
                self.current().push(Node::Loop {
                    var: open.var,
                    count: open.count,
                    body: open.body,
                });
            }
            other => return Err(self.syntax(line, format!("unknown statement '{}'", other))),
        }
        Ok(())
    }

    fn current(&mut self) -> &mut Vec<Node> {
        match self.loops.last_mut() {
            Some(open) => &mut open.body,
            None => &mut self.root,
        }
    }

    fn syntax(&self, line: usize, message: impl Into<String>) -> RecordsError {
        RecordsError::Syntax {
            template: self.template.to_string(),
            line,
            message: message.into(),
        }
    }
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

/// Drop trailing indentation when it is all that precedes a block tag on its line.
fn strip_indent(text: &str, at_line_start: bool) -> &str {
    let is_indent = |s: &str| s.chars().all(|c| c == ' ' || c == '\t');
    match text.rfind('\n') {
        Some(pos) if is_indent(&text[pos + 1..]) => &text[..pos + 1],
        None if at_line_start && is_indent(text) => "",
        _ => text,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(usize),
    Str(String),
    Sym(char),
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_alphabetic() || c == '_' {
            let mut end = start;
            while let Some(&(i, c)) = chars.peek() {
                if !(c.is_ascii_alphanumeric() || c == '_') {
                    break;
                }
                end = i + c.len_utf8();
                chars.next();
            }
            tokens.push(Token::Ident(input[start..end].to_string()));
        } else if c.is_ascii_digit() {
            let mut end = start;
            while let Some(&(i, c)) = chars.peek() {
                if !c.is_ascii_digit() {
                    break;
                }
                end = i + 1;
                chars.next();
            }
            let value = input[start..end]
                .parse::<usize>()
                .map_err(|e| format!("invalid integer '{}': {}", &input[start..end], e))?;
            tokens.push(Token::Int(value));
        } else if c == '"' || c == '\'' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            for (_, next) in chars.by_ref() {
                if next == c {
                    closed = true;
                    break;
                }
                value.push(next);
            }
            if !closed {
                return Err("unterminated string".to_string());
            }
            tokens.push(Token::Str(value));
        } else if "[]()|,=".contains(c) {
            tokens.push(Token::Sym(c));
            chars.next();
        } else {
            return Err(format!("unexpected character '{}'", c));
        }
    }
    Ok(tokens)
}

fn parse_expr(input: &str) -> Result<Expr, String> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser::new(tokens);
    let expr = parser.expr()?;
    parser.finish()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, sym: char) -> bool {
        if self.peek() == Some(&Token::Sym(sym)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, sym: char) -> Result<(), String> {
        if self.eat(sym) {
            Ok(())
        } else {
            Err(format!("expected '{}'{}", sym, self.found()))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, String> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(format!("expected {}{}", what, self.found())),
        }
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), String> {
        match self.peek() {
            Some(Token::Ident(name)) if name == keyword => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(format!("expected '{}'{}", keyword, self.found())),
        }
    }

    fn finish(&self) -> Result<(), String> {
        match self.peek() {
            None => Ok(()),
            Some(_) => Err(format!("unexpected trailing input{}", self.found())),
        }
    }

    fn found(&self) -> String {
        match self.peek() {
            None => ", found end of tag".to_string(),
            Some(Token::Ident(name)) => format!(", found '{}'", name),
            Some(Token::Int(n)) => format!(", found {}", n),
            Some(Token::Str(s)) => format!(", found \"{}\"", s),
            Some(Token::Sym(c)) => format!(", found '{}'", c),
        }
    }

    /// `name = callback`
    fn call(&mut self) -> Result<Node, String> {
        let name = self.local_name()?;
        self.expect('=')?;
        let callback = self.ident("callback name")?;
        self.finish()?;
        Ok(Node::Call { name, callback })
    }

    /// `name = expr`
    fn assignment(&mut self) -> Result<Node, String> {
        let name = self.local_name()?;
        self.expect('=')?;
        let expr = self.expr()?;
        self.finish()?;
        Ok(Node::Let { name, expr })
    }

    /// `var in COUNT` or `var in range(COUNT)`
    fn for_header(&mut self) -> Result<(String, Count), String> {
        let var = self.local_name()?;
        self.keyword("in")?;
        let ranged = matches!(self.peek(), Some(Token::Ident(name)) if name == "range")
            && self.tokens.get(self.pos + 1) == Some(&Token::Sym('('));
        if ranged {
            self.pos += 2;
        }
        let count = match self.next() {
            Some(Token::Int(n)) => Count::Static(n),
            Some(Token::Ident(name)) => Count::Dynamic(name),
            _ => return Err("loop count must be an integer or a name".to_string()),
        };
        if ranged {
            self.expect(')')?;
        }
        self.finish()?;
        Ok((var, count))
    }

    fn local_name(&mut self) -> Result<String, String> {
        let name = self.ident("a name")?;
        if PlaceholderKind::from_name(&name).is_some() {
            return Err(format!("'{}' is a placeholder kind and cannot be bound", name));
        }
        Ok(name)
    }

    fn expr(&mut self) -> Result<Expr, String> {
        let name = self.ident("a placeholder kind or local name")?;
        let index = if self.eat('[') {
            let index = self.index()?;
            self.expect(']')?;
            Some(index)
        } else {
            None
        };

        let target = match PlaceholderKind::from_name(&name) {
            Some(kind) => Target::Placeholder {
                kind,
                index: index.ok_or_else(|| format!("'{}' needs an index, e.g. {}[0]", name, name))?,
            },
            None => Target::Local { name, index },
        };

        let mut filters = Vec::new();
        while self.eat('|') {
            let name = self.ident("filter name")?;
            let mut args = Vec::new();
            if self.eat('(') && !self.eat(')') {
                loop {
                    args.push(self.arg()?);
                    if self.eat(')') {
                        break;
                    }
                    self.expect(',')?;
                }
            }
            filters.push(FilterCall { name, args });
        }
        Ok(Expr { target, filters })
    }

    fn index(&mut self) -> Result<Index, String> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Index::Literal(n)),
            Some(Token::Ident(name)) => Ok(Index::Var(name)),
            _ => Err("index must be a non-negative integer or a loop variable".to_string()),
        }
    }

    fn arg(&mut self) -> Result<Arg, String> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Arg::Int(n)),
            Some(Token::Str(s)) => Ok(Arg::Str(s)),
            Some(Token::Ident(name)) => Ok(Arg::Name(name)),
            _ => Err("filter arguments must be integers, strings or names".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> RecordsResult<ExpansionPlan> {
        ExpansionPlan::compile("test", source)
    }

    #[test]
    fn test_expression_with_filters() {
        let plan = compile("Images: {{ images[1] | render_links(5) }}\n").unwrap();
        assert_eq!(
            plan.nodes,
            vec![
                Node::Text("Images: ".to_string()),
                Node::Expand(Expr {
                    target: Target::Placeholder {
                        kind: PlaceholderKind::Images,
                        index: Index::Literal(1),
                    },
                    filters: vec![FilterCall {
                        name: "render_links".to_string(),
                        args: vec![Arg::Int(5)],
                    }],
                }),
                Node::Text("\n".to_string()),
            ]
        );
    }

    #[test]
    fn test_block_trimming() {
        let plan = compile("# Title\n  {% call scan = imaging_metadata_file %}\nBody\n").unwrap();
        assert_eq!(
            plan.nodes,
            vec![
                Node::Text("# Title\n".to_string()),
                Node::Call {
                    name: "scan".to_string(),
                    callback: "imaging_metadata_file".to_string(),
                },
                Node::Text("Body\n".to_string()),
            ]
        );
    }

    #[test]
    fn test_nested_loops() {
        let plan = compile(
            "{% for i in range(documents) %}\n{% for j in 2 %}\n{{ documents[i] }}\n{% endfor %}\n{% endfor %}\n",
        )
        .unwrap();
        match &plan.nodes[..] {
            [Node::Loop { var, count, body }] => {
                assert_eq!(var, "i");
                assert_eq!(count, &Count::Dynamic("documents".to_string()));
                assert!(matches!(&body[..], [Node::Loop { count: Count::Static(2), .. }]));
            }
            other => panic!("unexpected plan {:?}", other),
        }
    }

    #[test]
    fn test_let_with_string_args() {
        let plan =
            compile(r#"{% let fov = scan | special_autofill_table("imaging-fov") %}"#).unwrap();
        assert_eq!(
            plan.nodes,
            vec![Node::Let {
                name: "fov".to_string(),
                expr: Expr {
                    target: Target::Local {
                        name: "scan".to_string(),
                        index: None,
                    },
                    filters: vec![FilterCall {
                        name: "special_autofill_table".to_string(),
                        args: vec![Arg::Str("imaging-fov".to_string())],
                    }],
                },
            }]
        );
    }

    #[test]
    fn test_comments_are_dropped() {
        let plan = compile("a\n{# note #}\nb").unwrap();
        assert_eq!(
            plan.nodes,
            vec![Node::Text("a\n".to_string()), Node::Text("b".to_string())]
        );
    }

    #[test]
    fn test_callbacks_listed_once() {
        let plan = compile(
            "{% call a = imaging_metadata_file %}{% for i in 2 %}{% call b = imaging_metadata_file %}{% endfor %}",
        )
        .unwrap();
        assert_eq!(plan.callbacks(), vec!["imaging_metadata_file"]);
    }

    #[test]
    fn test_syntax_errors_name_the_line() {
        let cases = [
            ("ok\n{{ images }}", 2),
            ("ok\nok\n{{ images[0] | }}", 3),
            ("{% for i in 3 %}\nbody\n", 1),
            ("line\n{% endfor %}", 2),
            ("a\nb\n{{ documents[0]", 3),
            ("{{ images[-1] }}", 1),
            ("{% let images = documents[0] %}", 1),
            ("{% while x %}", 1),
            ("{{ }}", 1),
        ];
        for (source, expected) in cases {
            match compile(source) {
                Err(RecordsError::Syntax { line, template, .. }) => {
                    assert_eq!(line, expected, "source: {:?}", source);
                    assert_eq!(template, "test");
                }
                other => panic!("expected syntax error for {:?}, got {:?}", source, other),
            }
        }
    }
}
