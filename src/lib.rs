pub mod data;
pub mod error;
pub mod loader;
pub mod options;
pub mod tpl;

pub use data::{Value, to_value};
pub use error::TplError;
pub use loader::{FilesystemLoader, Loader, MemoryLoader, StringLoader, TemplateSource};
pub use options::EngineOptions;
pub use tpl::cache::{DiskCache, MemoryCache, TemplateCache};
pub use tpl::engine::Engine;
pub use tpl::helpers::{HashArgs, HelperDef, HelperRegistry, HelperResult, Options};
pub use tpl::render_context::DataVars;

#[cfg(feature = "macros")]
pub use hbtpl_macros::embed_templates;
