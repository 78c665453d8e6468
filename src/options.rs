use crate::loader::{Loader, StringLoader};
use crate::tpl::cache::TemplateCache;
use crate::tpl::helpers::HelperRegistry;
use crate::tpl::render::html_escape;
use std::sync::Arc;

/// Engine configuration.
///
/// Defaults: templates are addressed by their source text
/// ([`StringLoader`]), partials use the same loader, built-in helpers, HTML
/// escaping, data variables off. No compile cache unless one is set with
/// [`cache`](Self::cache), e.g. `.cache(MemoryCache::new())`.
pub struct EngineOptions {
    pub(crate) loader: Arc<dyn Loader>,
    pub(crate) partials_loader: Option<Arc<dyn Loader>>, // 未设置时沿用 loader
    pub(crate) helpers: HelperRegistry,
    pub(crate) cache: Option<Arc<dyn TemplateCache>>,
    pub(crate) escape: fn(&str) -> String,
    pub(crate) enable_data_variables: bool,
}

impl EngineOptions {
    pub fn new() -> Self {
        EngineOptions {
            loader: Arc::new(StringLoader),
            partials_loader: None,
            helpers: HelperRegistry::new(),
            cache: None,
            escape: html_escape,
            enable_data_variables: false,
        }
    }

    pub fn loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    pub fn partials_loader(mut self, loader: impl Loader + 'static) -> Self {
        self.partials_loader = Some(Arc::new(loader));
        self
    }

    pub fn helpers(mut self, helpers: HelperRegistry) -> Self {
        self.helpers = helpers;
        self
    }

    pub fn cache(mut self, cache: impl TemplateCache + 'static) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Uses a cache that is also held elsewhere, e.g. by another engine.
    pub fn shared_cache(mut self, cache: Arc<dyn TemplateCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Drops any cache set earlier; every render compiles.
    pub fn no_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn escape(mut self, escape: fn(&str) -> String) -> Self {
        self.escape = escape;
        self
    }

    pub fn enable_data_variables(mut self, enable: bool) -> Self {
        self.enable_data_variables = enable;
        self
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::new()
    }
}
