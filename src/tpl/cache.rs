use crate::error::TplError;
use crate::tpl::ast::Template;
use dashmap::DashMap;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Storage for compiled templates, keyed by [`cache_key`].
///
/// Implementations must tolerate concurrent `get`/`set` for the same key;
/// the last write wins.
pub trait TemplateCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Arc<Template>>, TplError>;

    fn set(&self, key: &str, template: Arc<Template>) -> Result<(), TplError>;

    fn contains(&self, key: &str) -> Result<bool, TplError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Lowercase hex SHA-256 of the template source.
pub fn cache_key(source: &str) -> String {
    format!("{:x}", Sha256::digest(source.as_bytes()))
}

/// 进程内缓存
#[derive(Default)]
pub struct MemoryCache {
    templates: DashMap<String, Arc<Template>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn clear(&self) {
        self.templates.clear();
    }
}

impl TemplateCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Arc<Template>>, TplError> {
        Ok(self.templates.get(key).map(|t| t.value().clone()))
    }

    fn set(&self, key: &str, template: Arc<Template>) -> Result<(), TplError> {
        self.templates.insert(key.to_string(), template);
        Ok(())
    }
}

/// One JSON file per compiled template under a directory.
///
/// The directory is created on the first write. Entries are written to a
/// temporary file and renamed into place, so readers never observe a
/// partial entry.
pub struct DiskCache {
    dir: PathBuf,
    seq: AtomicU64,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, TplError> {
        // 键直接作为文件名，只允许安全字符
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(TplError::cache(key, "key is not a valid file name"));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl TemplateCache for DiskCache {
    fn get(&self, key: &str) -> Result<Option<Arc<Template>>, TplError> {
        let path = self.entry_path(key)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TplError::cache(key, e)),
        };
        let corrupt = |e: serde_json::Error| {
            TplError::cache(key, format!("corrupt entry {}: {}", path.display(), e))
        };
        // 每层块嵌套约占 5 层 JSON，默认 128 层上限装不下合法的深层模板
        let mut de = serde_json::Deserializer::from_str(&content);
        de.disable_recursion_limit();
        let template = Template::deserialize(&mut de).map_err(corrupt)?;
        de.end().map_err(corrupt)?;
        Ok(Some(Arc::new(template)))
    }

    fn set(&self, key: &str, template: Arc<Template>) -> Result<(), TplError> {
        let path = self.entry_path(key)?;
        if !self.dir.is_dir() {
            debug!("Creating template cache directory {}", self.dir.display());
            fs::create_dir_all(&self.dir).map_err(|e| TplError::cache(key, e))?;
        }

        let json = serde_json::to_string(template.as_ref()).map_err(|e| TplError::cache(key, e))?;
        let tmp = self.dir.join(format!(
            ".{}.{}.{}.tmp",
            key,
            std::process::id(),
            self.seq.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, json).map_err(|e| TplError::cache(key, e))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(TplError::cache(key, e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpl::parser::parse_template;

    #[test]
    fn test_cache_key_is_stable_hex() {
        let key = cache_key("hello");
        assert_eq!(
            key,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_ne!(key, cache_key("hello "));
    }

    #[test]
    fn test_memory_cache() {
        let cache = MemoryCache::new();
        let tpl = Arc::new(parse_template("{{a}}").unwrap());
        assert!(!cache.contains("k").unwrap());
        cache.set("k", tpl.clone()).unwrap();
        assert!(cache.contains("k").unwrap());
        assert!(Arc::ptr_eq(&cache.get("k").unwrap().unwrap(), &tpl));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disk_cache_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("compiled");
        let cache = DiskCache::new(&dir);
        let tpl = parse_template("{{#each xs}}{{this}}{{/each}}").unwrap();
        let key = cache_key("{{#each xs}}{{this}}{{/each}}");

        assert!(cache.get(&key).unwrap().is_none());
        assert!(!dir.exists());

        cache.set(&key, Arc::new(tpl.clone())).unwrap();
        assert_eq!(cache.get(&key).unwrap().as_deref(), Some(&tpl));
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);
    }

    #[test]
    fn test_disk_cache_reads_deep_nesting() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(tmp.path());
        let source = format!("{}x{}", "{{#if a}}".repeat(40), "{{/if}}".repeat(40));
        let tpl = parse_template(&source).unwrap();
        let key = cache_key(&source);

        cache.set(&key, Arc::new(tpl.clone())).unwrap();
        assert_eq!(cache.get(&key).unwrap().as_deref(), Some(&tpl));
    }

    #[test]
    fn test_disk_cache_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(tmp.path());
        assert!(matches!(cache.get("../escape"), Err(TplError::Cache { .. })));

        fs::write(tmp.path().join("bad.json"), "not json").unwrap();
        assert!(matches!(cache.get("bad"), Err(TplError::Cache { .. })));
    }
}
