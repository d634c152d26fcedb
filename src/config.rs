//! 数据库配置

use crate::error::Result;
use crate::storage::{
    StoreOptions, DEFAULT_LIST_THRESHOLD, DEFAULT_MAX_CACHED_STRING, DEFAULT_NODE_CACHE_SIZE,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_QUERY_CACHE_SIZE: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 数据库文件，`None` 为内存数据库
    pub path: Option<PathBuf>,
    /// 表名前缀
    pub prefix: String,
    /// 类型定义根目录
    pub classpath: Option<PathBuf>,
    pub frozen: bool,
    pub node_cache_size: usize,
    pub list_cache_threshold: usize,
    pub max_cached_string: usize,
    pub query_cache_size: usize,
    pub log_queries: bool,
    pub read_only: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            prefix: String::new(),
            classpath: None,
            frozen: true,
            node_cache_size: DEFAULT_NODE_CACHE_SIZE,
            list_cache_threshold: DEFAULT_LIST_THRESHOLD,
            max_cached_string: DEFAULT_MAX_CACHED_STRING,
            query_cache_size: DEFAULT_QUERY_CACHE_SIZE,
            log_queries: false,
            read_only: false,
        }
    }
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_classpath(mut self, classpath: impl Into<PathBuf>) -> Self {
        self.classpath = Some(classpath.into());
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn unfrozen(mut self) -> Self {
        self.frozen = false;
        self
    }

    /// 补齐结尾的 `_`
    pub fn table_prefix(&self) -> String {
        if self.prefix.is_empty() || self.prefix.ends_with('_') {
            self.prefix.clone()
        } else {
            format!("{}_", self.prefix)
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            node_cache_size: self.node_cache_size.max(1),
            list_threshold: self.list_cache_threshold,
            max_cached_string: self.max_cached_string,
            read_only: self.read_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::default();
        assert!(config.frozen);
        assert_eq!(config.node_cache_size, 256);
        assert_eq!(config.list_cache_threshold, 8);
        assert_eq!(config.max_cached_string, 1024);
        assert_eq!(config.query_cache_size, 128);
        assert!(config.path.is_none());
    }

    #[test]
    fn test_prefix() {
        assert_eq!(DatabaseConfig::default().table_prefix(), "");
        assert_eq!(DatabaseConfig::default().with_prefix("app").table_prefix(), "app_");
        assert_eq!(DatabaseConfig::default().with_prefix("app_").table_prefix(), "app_");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("graphene.json");
        fs::write(&file, r#"{"prefix": "t", "frozen": false, "node_cache_size": 16}"#).unwrap();
        let config = DatabaseConfig::from_file(&file).unwrap();
        assert_eq!(config.prefix, "t");
        assert!(!config.frozen);
        assert_eq!(config.node_cache_size, 16);
        assert_eq!(config.query_cache_size, DEFAULT_QUERY_CACHE_SIZE);

        fs::write(&file, "not json").unwrap();
        assert!(DatabaseConfig::from_file(&file).is_err());
    }
}
