use crate::error::TplError;
use crate::tpl::cache::cache_key;
use anyhow::{Context, Result};
use dashmap::DashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

pub const DEFAULT_EXTENSION: &str = "hbs";

/// A template's name and text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    pub name: String,
    pub source: String,
}

impl TemplateSource {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Compile-cache identity of this source.
    pub fn key(&self) -> String {
        cache_key(&self.source)
    }
}

/// Resolves a template name to its source text.
pub trait Loader: Send + Sync {
    fn load(&self, name: &str) -> Result<TemplateSource, TplError>;
}

/// The name is the template.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringLoader;

impl Loader for StringLoader {
    fn load(&self, name: &str) -> Result<TemplateSource, TplError> {
        Ok(TemplateSource::new(name, name))
    }
}

/// 内存模板表，名称 → 源码
#[derive(Debug, Default)]
pub struct MemoryLoader {
    templates: DashMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a template.
    pub fn add(&self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }

    pub fn from_assets<N, S>(assets: impl IntoIterator<Item = (N, S)>) -> Self
    where
        N: Into<String>,
        S: Into<String>,
    {
        let loader = Self::new();
        for (name, source) in assets {
            loader.add(name, source);
        }
        loader
    }

    /// 递归读取目录下所有 `*.{ext}` 文件；名称为去掉扩展名的相对路径，如 `partials/header`
    pub fn from_dir(dir: impl AsRef<Path>, ext: &str) -> Result<Self> {
        let dir = dir.as_ref();
        let loader = Self::new();
        for entry in WalkDir::new(dir) {
            let entry =
                entry.with_context(|| format!("Failed to walk template dir: {}", dir.display()))?;
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|e| e != ext) {
                continue;
            }

            let source = fs::read_to_string(path)
                .with_context(|| format!("Failed to read template file: {}", path.display()))?;
            let name = template_name(dir, path)
                .with_context(|| format!("Invalid template path: {}", path.display()))?;
            debug!("Loaded template '{}' from {}", name, path.display());
            loader.add(name, source);
        }
        Ok(loader)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Template names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Loader for MemoryLoader {
    fn load(&self, name: &str) -> Result<TemplateSource, TplError> {
        self.templates
            .get(name)
            .map(|source| TemplateSource::new(name, source.value().clone()))
            .ok_or_else(|| TplError::NotFound(name.to_string()))
    }
}

fn template_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root)?.with_extension("");
    let parts = relative
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .context("Template path is not valid UTF-8")
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

/// Reads `root/<name>.<ext>` on every load.
#[derive(Debug, Clone)]
pub struct FilesystemLoader {
    root: PathBuf,
    extension: String,
}

impl FilesystemLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = ext.into();
        self
    }

    fn path_of(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        // 只接受根目录内的相对路径
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return None;
        }
        let file = format!("{}.{}", name, self.extension);
        Some(self.root.join(file))
    }
}

impl Loader for FilesystemLoader {
    fn load(&self, name: &str) -> Result<TemplateSource, TplError> {
        let path = self
            .path_of(name)
            .ok_or_else(|| TplError::NotFound(name.to_string()))?;
        match fs::read_to_string(&path) {
            Ok(source) => Ok(TemplateSource::new(name, source)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TplError::NotFound(name.to_string())),
            Err(e) => Err(TplError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_loader() {
        let src = StringLoader.load("{{a}}").unwrap();
        assert_eq!(src.source, "{{a}}");
        assert_eq!(src.key(), cache_key("{{a}}"));
    }

    #[test]
    fn test_memory_loader() {
        let loader = MemoryLoader::from_assets(vec![("a", "A"), ("b", "B")]);
        assert_eq!(loader.load("a").unwrap().source, "A");
        loader.add("a", "A2");
        assert_eq!(loader.load("a").unwrap().source, "A2");
        assert_eq!(loader.names(), vec!["a", "b"]);
        assert!(matches!(loader.load("c"), Err(TplError::NotFound(n)) if n == "c"));
    }

    #[test]
    fn test_from_dir() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("partials")).unwrap();
        fs::write(tmp.path().join("page.hbs"), "page").unwrap();
        fs::write(tmp.path().join("partials/header.hbs"), "header").unwrap();
        fs::write(tmp.path().join("notes.txt"), "skip").unwrap();

        let loader = MemoryLoader::from_dir(tmp.path(), "hbs").unwrap();
        assert_eq!(loader.names(), vec!["page", "partials/header"]);
        assert_eq!(loader.load("partials/header").unwrap().source, "header");
    }

    #[test]
    fn test_filesystem_loader() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("hello.hbs"), "Hello {{name}}").unwrap();
        fs::write(tmp.path().join("plain.txt"), "txt").unwrap();

        let loader = FilesystemLoader::new(tmp.path());
        assert_eq!(loader.load("hello").unwrap().source, "Hello {{name}}");
        assert!(matches!(loader.load("missing"), Err(TplError::NotFound(_))));
        assert!(matches!(loader.load("../hello"), Err(TplError::NotFound(_))));

        let txt = FilesystemLoader::new(tmp.path()).with_extension("txt");
        assert_eq!(txt.load("plain").unwrap().source, "txt");
    }
}
