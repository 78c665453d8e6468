pub mod builtin;

use crate::data::Value;
use crate::error::TplError;
use crate::tpl::ast::{Branch, Call, Node, Param};
use crate::tpl::expr;
use crate::tpl::render::{Renderer, resolve_param};
use crate::tpl::render_context::{Context, DataVars};
use dashmap::DashMap;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::trace;

/// `key=value` arguments of a helper call, resolved, in source order.
pub type HashArgs = IndexMap<String, Value>;

pub type HelperResult = Result<String, TplError>;

/// A named function callable from a template tag.
///
/// Positional params and hash args arrive already resolved against the
/// current context. Block helpers render their body and inverse through
/// [`Options`].
pub trait HelperDef: Send + Sync {
    fn call(&self, params: &[Value], hash: &HashArgs, options: &mut Options<'_, '_, '_>)
    -> HelperResult;
}

impl<F> HelperDef for F
where
    F: Fn(&[Value], &HashArgs, &mut Options<'_, '_, '_>) -> HelperResult + Send + Sync,
{
    fn call(
        &self,
        params: &[Value],
        hash: &HashArgs,
        options: &mut Options<'_, '_, '_>,
    ) -> HelperResult {
        self(params, hash, options)
    }
}

/// 助手注册表：名称 → 助手实现
#[derive(Clone)]
pub struct HelperRegistry {
    helpers: Arc<DashMap<String, Arc<dyn HelperDef>>>,
}

impl HelperRegistry {
    /// Registry preloaded with the built-in helpers.
    pub fn new() -> Self {
        let registry = Self::empty();
        builtin::register_all(&registry);
        registry
    }

    pub fn empty() -> Self {
        Self {
            helpers: Arc::new(DashMap::new()),
        }
    }

    /// 注册助手，同名覆盖
    pub fn register(&self, name: impl Into<String>, helper: impl HelperDef + 'static) {
        self.helpers.insert(name.into(), Arc::new(helper));
    }

    /// Registers a closure. Separate from [`register`](Self::register) so the
    /// closure's argument types are inferred.
    pub fn register_fn<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value], &HashArgs, &mut Options<'_, '_, '_>) -> HelperResult
            + Send
            + Sync
            + 'static,
    {
        self.register(name, f);
    }

    pub fn remove(&self, name: &str) -> bool {
        self.helpers.remove(name).is_some()
    }

    pub fn has(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn HelperDef>, TplError> {
        self.find(name)
            .ok_or_else(|| TplError::UnknownHelper(name.to_string()))
    }

    pub(crate) fn find(&self, name: &str) -> Option<Arc<dyn HelperDef>> {
        self.helpers.get(name).map(|h| h.value().clone())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.helpers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for HelperRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a helper can do beyond looking at its arguments: render its
/// body or inverse, push a new scope, read the context, and share fragments
/// through the render-scoped definitions table.
pub struct Options<'r, 'a, 'e> {
    renderer: &'r mut Renderer<'e>,
    ctx: &'r mut Context<'a>,
    call: &'r Call,
    branches: &'r [Branch],
}

impl<'r, 'a, 'e> Options<'r, 'a, 'e> {
    pub(crate) fn new(
        renderer: &'r mut Renderer<'e>,
        ctx: &'r mut Context<'a>,
        call: &'r Call,
        branches: &'r [Branch],
    ) -> Self {
        trace!("helper '{}' called at line {}", call.name, call.line);
        Self {
            renderer,
            ctx,
            call,
            branches,
        }
    }

    pub fn name(&self) -> &str {
        &self.call.name
    }

    /// `true` when the tag has a body, i.e. `{{#name}}…{{/name}}`.
    pub fn is_block(&self) -> bool {
        !self.branches.is_empty()
    }

    pub fn data_variables_enabled(&self) -> bool {
        self.ctx.data_variables_enabled()
    }

    /// Value of the current frame.
    pub fn context(&self) -> &Value {
        self.ctx.current()
    }

    pub fn lookup(&self, path: &str) -> Option<Value> {
        self.ctx.lookup(path)
    }

    /// Evaluates a comparison such as `count > 1` against the current frame.
    pub fn evaluate(&self, expr_text: &str) -> Result<bool, TplError> {
        expr::evaluate_str(expr_text, self.ctx)
    }

    /// Source text of positional param `i`: the path as written for
    /// variables, the literal value otherwise.
    pub fn raw_param(&self, i: usize) -> Option<String> {
        match self.call.params.get(i)? {
            Param::Path(path) => Some(path.raw.clone()),
            Param::Literal(lit) => Some(lit.to_value().to_string()),
            Param::Comparison(_) => None,
        }
    }

    /// Renders the main body in the current frame.
    pub fn render(&mut self) -> HelperResult {
        let body = self.body();
        self.render_nodes(body)
    }

    /// Renders the main body in a new frame of `value`.
    pub fn render_with(&mut self, value: Value) -> HelperResult {
        self.ctx.push(value, None);
        let result = self.render();
        self.ctx.pop();
        result
    }

    /// Renders the main body in an iteration frame carrying `vars`.
    pub fn render_iteration(&mut self, value: Value, vars: DataVars) -> HelperResult {
        self.ctx.push(value, Some(vars));
        let result = self.render();
        self.ctx.pop();
        result
    }

    /// Renders the first `elseif` branch whose condition holds, or the
    /// `else` branch. Empty when neither applies.
    pub fn inverse(&mut self) -> HelperResult {
        let branches = self.branches;
        for branch in branches.iter().skip(1) {
            let selected = match &branch.condition {
                None => true,
                Some(cond) => resolve_param(cond, self.ctx).is_truthy(),
            };
            if selected {
                return self.render_nodes(&branch.body);
            }
        }
        Ok(String::new())
    }

    pub fn inverse_with(&mut self, value: Value) -> HelperResult {
        self.ctx.push(value, None);
        let result = self.inverse();
        self.ctx.pop();
        result
    }

    /// Stores the main body under `name` for the rest of this render.
    pub fn define(&mut self, name: impl Into<String>) {
        let body = self.body().to_vec();
        self.renderer.define(name.into(), body);
    }

    /// Renders a fragment stored by [`define`](Self::define) in the current
    /// frame. Unknown names render nothing.
    pub fn invoke(&mut self, name: &str) -> HelperResult {
        match self.renderer.definition(name) {
            Some(nodes) => self.render_nodes(&nodes),
            None => Ok(String::new()),
        }
    }

    fn body(&self) -> &'r [Node] {
        self.branches.first().map_or(&[][..], |b| b.body.as_slice())
    }

    fn render_nodes(&mut self, nodes: &[Node]) -> HelperResult {
        let mut out = String::new();
        self.renderer.render_nested(nodes, self.ctx, &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shout;

    impl HelperDef for Shout {
        fn call(&self, params: &[Value], _: &HashArgs, _: &mut Options<'_, '_, '_>) -> HelperResult {
            Ok(params
                .first()
                .map(|v| v.to_string().to_uppercase() + "!")
                .unwrap_or_default())
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = HelperRegistry::new();
        for name in ["if", "unless", "each", "with", "upper", "inflect", "define", "invoke"] {
            assert!(registry.has(name), "missing {}", name);
        }
        assert!(HelperRegistry::empty().names().is_empty());
    }

    #[test]
    fn test_register_remove() {
        let registry = HelperRegistry::empty();
        registry.register("shout", Shout);
        registry.register_fn("answer", |_, _, _| Ok("42".to_string()));

        assert_eq!(registry.names(), vec!["answer", "shout"]);
        assert!(registry.get("shout").is_ok());
        assert!(registry.remove("shout"));
        assert!(!registry.remove("shout"));
        assert!(matches!(
            registry.get("shout"),
            Err(TplError::UnknownHelper(name)) if name == "shout"
        ));
    }

    #[test]
    fn test_clones_share_entries() {
        let registry = HelperRegistry::empty();
        let other = registry.clone();
        other.register("shout", Shout);
        assert!(registry.has("shout"));
    }
}
