use crate::data::{Value, to_value};
use crate::error::TplError;
use crate::loader::Loader;
use crate::options::EngineOptions;
use crate::tpl::ast::Template;
use crate::tpl::cache::{TemplateCache, cache_key};
use crate::tpl::helpers::{HashArgs, HelperDef, HelperRegistry, HelperResult, Options};
use crate::tpl::parser::parse_template;
use crate::tpl::render::Renderer;
use crate::tpl::render_context::Context;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Loads, compiles and renders templates.
///
/// An engine is cheap to share: it is `Send + Sync`, and every render call
/// gets its own scope stack and definitions table.
pub struct Engine {
    loader: Arc<dyn Loader>,
    partials_loader: Arc<dyn Loader>,
    helpers: HelperRegistry,
    cache: Option<Arc<dyn TemplateCache>>,
    escape: fn(&str) -> String,
    enable_data_variables: bool,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        let partials_loader = options
            .partials_loader
            .unwrap_or_else(|| options.loader.clone());
        Self {
            loader: options.loader,
            partials_loader,
            helpers: options.helpers,
            cache: options.cache,
            escape: options.escape,
            enable_data_variables: options.enable_data_variables,
        }
    }

    /// 渲染模板：`name` 交给 loader 解析（StringLoader 下即模板源码本身）
    pub fn render<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> Result<String, TplError> {
        let value = to_value(data)?;
        self.render_value(name, &value)
    }

    pub fn render_value(&self, name: &str, data: &Value) -> Result<String, TplError> {
        let source = self.loader.load(name)?;
        let template = self.compile(&source.source)?;

        let mut ctx = Context::new(data, self.enable_data_variables);
        let mut out = String::with_capacity(source.source.len());
        Renderer::new(self).render(&template.nodes, &mut ctx, &mut out)?;
        Ok(out)
    }

    /// Returns the compiled form of `source`, from the cache when present.
    pub fn compile(&self, source: &str) -> Result<Arc<Template>, TplError> {
        let Some(cache) = &self.cache else {
            return Ok(Arc::new(parse_template(source)?));
        };

        let key = cache_key(source);
        if let Some(template) = cache.get(&key)? {
            debug!("Template cache hit: {}", key);
            return Ok(template);
        }

        debug!("Template cache miss: {}, compiling", key);
        let template = Arc::new(parse_template(source)?);
        cache.set(&key, template.clone())?;
        debug!("Stored compiled template: {}", key);
        Ok(template)
    }

    /// Registers a closure helper, replacing any helper of the same name.
    pub fn add_helper<F>(&self, name: impl Into<String>, helper: F)
    where
        F: Fn(&[Value], &HashArgs, &mut Options<'_, '_, '_>) -> HelperResult
            + Send
            + Sync
            + 'static,
    {
        self.helpers.register_fn(name, helper);
    }

    pub fn remove_helper(&self, name: &str) -> bool {
        self.helpers.remove(name)
    }

    pub fn has_helper(&self, name: &str) -> bool {
        self.helpers.has(name)
    }

    pub fn get_helper(&self, name: &str) -> Result<Arc<dyn HelperDef>, TplError> {
        self.helpers.get(name)
    }

    pub fn helpers(&self) -> &HelperRegistry {
        &self.helpers
    }

    pub fn data_variables_enabled(&self) -> bool {
        self.enable_data_variables
    }

    pub(crate) fn partials_loader(&self) -> &dyn Loader {
        self.partials_loader.as_ref()
    }

    pub(crate) fn escape(&self, text: &str) -> String {
        (self.escape)(text)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use crate::tpl::cache::MemoryCache;
    use serde_json::json;

    #[derive(Serialize)]
    struct User {
        name: String,
        age: u8,
    }

    #[test]
    fn test_render_struct() {
        let engine = Engine::default();
        let user = User {
            name: "jason".to_string(),
            age: 18,
        };
        let out = engine.render("{{name}} is {{age}}", &user).unwrap();
        assert_eq!(out, "jason is 18");
    }

    #[test]
    fn test_compile_uses_cache() {
        let cache = Arc::new(MemoryCache::new());
        let engine = Engine::new(EngineOptions::new().shared_cache(cache.clone()));
        let first = engine.compile("{{a}}").unwrap();
        let second = engine.compile("{{a}}").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        engine.compile("{{b}}").unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_default_engine_does_not_cache() {
        let engine = Engine::default();
        assert!(engine.cache.is_none());
        let first = engine.compile("{{a}}").unwrap();
        let second = engine.compile("{{a}}").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);

        let cached = Engine::new(EngineOptions::new().cache(MemoryCache::new()));
        assert!(Arc::ptr_eq(
            &cached.compile("{{a}}").unwrap(),
            &cached.compile("{{a}}").unwrap()
        ));
    }

    #[test]
    fn test_parse_error_is_not_cached() {
        let cache = Arc::new(MemoryCache::new());
        let engine = Engine::new(EngineOptions::new().shared_cache(cache.clone()));
        assert!(matches!(engine.render("{{#if x}}", &()), Err(TplError::Parse { .. })));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_named_templates_and_partials() {
        let loader = MemoryLoader::new();
        loader.add("page", "<h1>{{title}}</h1>{{> footer}}");
        loader.add("footer", "<p>{{owner.name}}</p>");
        let engine = Engine::new(EngineOptions::new().loader(loader));
        let data = json!({ "title": "Home", "owner": { "name": "ann" } });
        assert_eq!(
            engine.render("page", &data).unwrap(),
            "<h1>Home</h1><p>ann</p>"
        );
        assert!(matches!(engine.render("nope", &data), Err(TplError::NotFound(_))));
    }

    #[test]
    fn test_partial_with_context_and_separate_loader() {
        let partials = MemoryLoader::new();
        partials.add("card", "[{{name}}|{{../title}}]");
        let engine = Engine::new(EngineOptions::new().partials_loader(partials));
        let data = json!({ "title": "T", "owner": { "name": "ann" } });
        assert_eq!(engine.render("{{> card owner}}", &data).unwrap(), "[ann|T]");
        assert!(matches!(
            engine.render("{{> missing}}", &data),
            Err(TplError::NotFound(name)) if name == "missing"
        ));
    }
}
