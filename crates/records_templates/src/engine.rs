//! Plan execution.

use std::collections::HashMap;

use tracing::debug;

use crate::definition::PlaceholderKind;
use crate::error::{RecordsError, RecordsResult};
use crate::filters::{link_paths, FilterRegistry};
use crate::plan::{Arg, Count, ExpansionPlan, Expr, Index, Node, Target};
use crate::resolver::{BindingValue, Bindings};
use crate::session::Session;
use crate::value::Value;

/// Executes compiled plans against resolved bindings in one forward pass.
pub struct RenderEngine<'r> {
    filters: &'r FilterRegistry,
}

impl<'r> RenderEngine<'r> {
    pub fn new(filters: &'r FilterRegistry) -> Self {
        Self { filters }
    }

    /// Render a plan to markdown. Files the output links to are recorded in
    /// the session.
    pub fn render(
        &self,
        plan: &ExpansionPlan,
        bindings: &Bindings,
        session: &mut Session<'_>,
    ) -> RecordsResult<String> {
        let mut out = String::new();
        let mut locals = HashMap::new();
        self.exec(&plan.nodes, bindings, session, &mut locals, &mut out)?;
        debug!("Rendered {} ({} bytes)", plan.template, out.len());
        Ok(out)
    }

    fn exec(
        &self,
        nodes: &[Node],
        bindings: &Bindings,
        session: &mut Session<'_>,
        locals: &mut HashMap<String, Value>,
        out: &mut String,
    ) -> RecordsResult<()> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Expand(expr) => {
                    let value = self.eval(expr, bindings, session, locals)?;
                    out.push_str(&finalize(value, session));
                }
                Node::Let { name, expr } => {
                    let value = self.eval(expr, bindings, session, locals)?;
                    locals.insert(name.clone(), value);
                }
                Node::Call { name, callback } => {
                    let value = session.invoke(callback)?;
                    locals.insert(name.clone(), value);
                }
                Node::Loop { var, count, body } => {
                    let count = loop_count(count, bindings, locals)?;
                    let shadowed = locals.remove(var);
                    for i in 0..count {
                        locals.insert(var.clone(), Value::Count(i));
                        self.exec(body, bindings, session, locals, out)?;
                    }
                    locals.remove(var);
                    if let Some(value) = shadowed {
                        locals.insert(var.clone(), value);
                    }
                }
            }
        }
        Ok(())
    }

    fn eval(
        &self,
        expr: &Expr,
        bindings: &Bindings,
        session: &mut Session<'_>,
        locals: &HashMap<String, Value>,
    ) -> RecordsResult<Value> {
        let mut value = match &expr.target {
            Target::Placeholder { kind, index } => {
                let index = resolve_index(index, locals)?;
                binding_value(bindings, *kind, index, session)?
            }
            Target::Local { name, index } => {
                let value = lookup(name, locals)?;
                match index {
                    None => value.clone(),
                    Some(index) => {
                        let index = resolve_index(index, locals)?;
                        match value.item(index) {
                            Some(Some(item)) => item,
                            Some(None) => {
                                return Err(RecordsError::IndexOutOfRange {
                                    target: name.clone(),
                                    index,
                                    len: value.len().unwrap_or(0),
                                })
                            }
                            None => {
                                return Err(RecordsError::Render(format!(
                                    "'{}' is {} and cannot be indexed",
                                    name,
                                    value.type_name()
                                )))
                            }
                        }
                    }
                }
            }
        };

        for call in &expr.filters {
            let filter = self
                .filters
                .get(&call.name)
                .ok_or_else(|| RecordsError::Render(format!("unknown filter '{}'", call.name)))?;
            let args = call
                .args
                .iter()
                .map(|arg| match arg {
                    Arg::Int(n) => Ok(Value::Count(*n)),
                    Arg::Str(s) => Ok(Value::Text(s.clone())),
                    Arg::Name(name) => lookup(name, locals).cloned(),
                })
                .collect::<RecordsResult<Vec<_>>>()?;
            value = filter.apply(value, &args, session)?;
        }
        Ok(value)
    }
}

fn lookup<'v>(name: &str, locals: &'v HashMap<String, Value>) -> RecordsResult<&'v Value> {
    locals
        .get(name)
        .ok_or_else(|| RecordsError::Render(format!("undefined name '{}'", name)))
}

fn resolve_index(index: &Index, locals: &HashMap<String, Value>) -> RecordsResult<usize> {
    match index {
        Index::Literal(n) => Ok(*n),
        Index::Var(name) => lookup(name, locals)?.as_count().ok_or_else(|| {
            RecordsError::Render(format!("index '{}' is not a loop variable", name))
        }),
    }
}

fn binding_value(
    bindings: &Bindings,
    kind: PlaceholderKind,
    index: usize,
    session: &mut Session<'_>,
) -> RecordsResult<Value> {
    let binding = bindings.get(kind, index)?;
    Ok(match &binding.value {
        BindingValue::Paths(paths) => Value::Paths(paths.clone()),
        BindingValue::Content {
            markdown,
            references,
        } => {
            for path in references {
                session.reference(path);
            }
            Value::Text(markdown.clone())
        }
    })
}

fn loop_count(
    count: &Count,
    bindings: &Bindings,
    locals: &HashMap<String, Value>,
) -> RecordsResult<usize> {
    match count {
        Count::Static(n) => Ok(*n),
        Count::Dynamic(name) => {
            if let Some(kind) = PlaceholderKind::from_name(name) {
                return Ok(bindings.len(kind));
            }
            let value = lookup(name, locals)?;
            value.len().ok_or_else(|| {
                RecordsError::Render(format!(
                    "cannot loop over '{}', it is {}",
                    name,
                    value.type_name()
                ))
            })
        }
    }
}

/// Turn a value into output text, recording any linked files.
fn finalize(value: Value, session: &mut Session<'_>) -> String {
    match value {
        Value::Paths(paths) => link_paths(&paths, session.header_level(), session),
        Value::Text(text) => text,
        Value::Lines(lines) => lines.join("\n"),
        Value::Table(table) => table.to_markdown(),
        Value::Special(model) => {
            for path in &model.sources {
                session.reference(path);
            }
            model.to_markdown(session.header_level())
        }
        Value::Count(n) => n.to_string(),
    }
}
