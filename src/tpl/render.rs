use crate::data::Value;
use crate::error::TplError;
use crate::tpl::ast::{Block, Branch, Call, Node, Param, PathExpr};
use crate::tpl::engine::Engine;
use crate::tpl::expr;
use crate::tpl::helpers::{HashArgs, HelperDef, HelperResult, Options, builtin};
use crate::tpl::render_context::Context;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Maximum nesting of helper bodies and partials within one render.
pub const MAX_DEPTH: usize = 64;

/// 单次渲染的状态：引擎、define 片段表、嵌套深度
pub struct Renderer<'e> {
    engine: &'e Engine,
    definitions: HashMap<String, Arc<Vec<Node>>>,
    depth: usize,
}

impl<'e> Renderer<'e> {
    pub(crate) fn new(engine: &'e Engine) -> Self {
        Self {
            engine,
            definitions: HashMap::new(),
            depth: 0,
        }
    }

    pub(crate) fn render(
        &mut self,
        nodes: &[Node],
        ctx: &mut Context<'_>,
        out: &mut String,
    ) -> Result<(), TplError> {
        for node in nodes {
            match node {
                Node::Text(text) | Node::Raw(text) => out.push_str(text),
                Node::Mustache { call, escaped } => self.render_mustache(call, *escaped, ctx, out)?,
                Node::Section(call) => self.render_section(call, ctx, out)?,
                Node::Block(block) => self.render_block(block, ctx, out)?,
                Node::Partial {
                    name,
                    context,
                    line,
                } => self.render_partial(name, context.as_ref(), *line, ctx, out)?,
            }
        }
        Ok(())
    }

    /// Renders a helper body or partial one level deeper.
    pub(crate) fn render_nested(
        &mut self,
        nodes: &[Node],
        ctx: &mut Context<'_>,
        out: &mut String,
    ) -> Result<(), TplError> {
        if self.depth >= MAX_DEPTH {
            return Err(TplError::Render(format!(
                "template nesting exceeds {} levels",
                MAX_DEPTH
            )));
        }
        self.depth += 1;
        let result = self.render(nodes, ctx, out);
        self.depth -= 1;
        result
    }

    pub(crate) fn define(&mut self, name: String, body: Vec<Node>) {
        self.definitions.insert(name, Arc::new(body));
    }

    pub(crate) fn definition(&self, name: &str) -> Option<Arc<Vec<Node>>> {
        self.definitions.get(name).cloned()
    }

    /// `{{name …}}`: helper call, or variable output when `name` is not a
    /// helper and carries no arguments.
    fn render_mustache(
        &mut self,
        call: &Call,
        escaped: bool,
        ctx: &mut Context<'_>,
        out: &mut String,
    ) -> Result<(), TplError> {
        let text = match self.engine.helpers().find(&call.name) {
            Some(helper) => self.call_helper(helper.as_ref(), call, &[], ctx)?,
            None if has_arguments(call) => return Err(TplError::UnknownHelper(call.name.clone())),
            None => match resolve_path(&call.path, ctx) {
                Some(value) => value.to_string(),
                None => return Ok(()),
            },
        };
        self.write(out, &text, escaped);
        Ok(())
    }

    /// `{{#name …}}` without a body. Helper output is written as is.
    fn render_section(
        &mut self,
        call: &Call,
        ctx: &mut Context<'_>,
        out: &mut String,
    ) -> Result<(), TplError> {
        if let Some(helper) = self.engine.helpers().find(&call.name) {
            let text = self.call_helper(helper.as_ref(), call, &[], ctx)?;
            out.push_str(&text);
            return Ok(());
        }
        match resolve_path(&call.path, ctx) {
            Some(value) if !has_arguments(call) => {
                self.write(out, &value.to_string(), true);
                Ok(())
            }
            _ => Err(TplError::UnknownHelper(call.name.clone())),
        }
    }

    fn render_block(
        &mut self,
        block: &Block,
        ctx: &mut Context<'_>,
        out: &mut String,
    ) -> Result<(), TplError> {
        let call = &block.call;
        if let Some(helper) = self.engine.helpers().find(&call.name) {
            let text = self.call_helper(helper.as_ref(), call, &block.branches, ctx)?;
            out.push_str(&text);
            return Ok(());
        }

        // 非助手的块按变量段落处理
        let value = match resolve_path(&call.path, ctx) {
            Some(value) if !has_arguments(call) => value,
            _ => return Err(TplError::UnknownHelper(call.name.clone())),
        };
        let mut options = Options::new(self, ctx, call, &block.branches);
        let text = builtin::section(&value, &mut options)?;
        out.push_str(&text);
        Ok(())
    }

    fn render_partial(
        &mut self,
        name: &str,
        context: Option<&Param>,
        line: usize,
        ctx: &mut Context<'_>,
        out: &mut String,
    ) -> Result<(), TplError> {
        debug!("Loading partial '{}' (line {})", name, line);
        let source = self.engine.partials_loader().load(name)?;
        let template = self.engine.compile(&source.source)?;

        match context {
            Some(param) => {
                let value = resolve_param(param, ctx);
                ctx.push(value, None);
                let result = self.render_nested(&template.nodes, ctx, out);
                ctx.pop();
                result
            }
            None => self.render_nested(&template.nodes, ctx, out),
        }
    }

    fn call_helper(
        &mut self,
        helper: &dyn HelperDef,
        call: &Call,
        branches: &[Branch],
        ctx: &mut Context<'_>,
    ) -> HelperResult {
        let params: Vec<Value> = call.params.iter().map(|p| resolve_param(p, ctx)).collect();
        let hash: HashArgs = call
            .hash
            .iter()
            .map(|(key, p)| (key.clone(), resolve_param(p, ctx)))
            .collect();
        let mut options = Options::new(self, ctx, call, branches);
        helper.call(&params, &hash, &mut options)
    }

    fn write(&self, out: &mut String, text: &str, escaped: bool) {
        if escaped {
            out.push_str(&self.engine.escape(text));
        } else {
            out.push_str(text);
        }
    }
}

fn has_arguments(call: &Call) -> bool {
    !call.params.is_empty() || !call.hash.is_empty()
}

/// Resolves a param eagerly: undefined paths become null, comparisons
/// become booleans, slices are applied.
pub(crate) fn resolve_param(param: &Param, ctx: &Context) -> Value {
    match param {
        Param::Literal(lit) => lit.to_value(),
        Param::Comparison(cmp) => Value::Bool(expr::evaluate(cmp, ctx)),
        Param::Path(path) => resolve_path(path, ctx).unwrap_or(Value::Null),
    }
}

fn resolve_path(path: &PathExpr, ctx: &Context) -> Option<Value> {
    let value = ctx.resolve(path)?;
    Some(match path.slice {
        Some(slice) => slice.apply(value),
        None => value.clone(),
    })
}

/// Escapes `& < > " '` for HTML output.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}
