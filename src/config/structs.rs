use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::errors::{OctolinkError, Result};

/// 应用配置（启动时加载一次，之后按引用传给各组件）
///
/// 优先级：ENV > config.toml > 默认值
/// ENV 前缀：OCTO，分隔符：__
/// 示例：OCTO__SERVER__PORT=9000
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub bloom: BloomConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub access_log: AccessLogConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 从 TOML 文件（可选）和环境变量加载配置
    pub fn load(path: &str) -> Result<Self> {
        use config::{Config, Environment, File};

        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("OCTO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;

        if std::path::Path::new(path).exists() {
            eprintln!("[INFO] Configuration loaded from: {}", path);
        }
        Ok(config)
    }

    /// 校验运行时无法接受的配置值
    pub fn validate(&self) -> Result<()> {
        if !(self.bloom.error_rate > 0.0 && self.bloom.error_rate < 1.0) {
            return Err(OctolinkError::config(format!(
                "bloom.error_rate must be in (0, 1), got {}",
                self.bloom.error_rate
            )));
        }
        if self.bloom.capacity == 0 || self.bloom.local_capacity == 0 {
            return Err(OctolinkError::config("bloom capacity must be positive"));
        }
        if self.cache.memory.max_capacity == 0 {
            return Err(OctolinkError::config("cache.memory.max_capacity must be positive"));
        }
        if self.generator.max_attempts_per_length == 0 {
            return Err(OctolinkError::config(
                "generator.max_attempts_per_length must be positive",
            ));
        }
        if self.analytics.workers == 0 || self.analytics.queue_capacity == 0 {
            return Err(OctolinkError::config(
                "analytics.workers and analytics.queue_capacity must be positive",
            ));
        }
        if self.server.domain.trim().is_empty() {
            return Err(OctolinkError::config("server.domain must not be empty"));
        }
        Ok(())
    }

    /// 生成示例 TOML 配置文件
    pub fn generate_sample() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|e| format!("# Error generating sample config: {}", e))
    }

    /// 保存配置到 TOML 文件
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| OctolinkError::serialization(e.to_string()))?;

        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// 渲染 `short_link` 的公开地址（`{domain}/{code}`）
    #[serde(default = "default_domain")]
    pub domain: String,
}

/// 数据库连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_database_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_database_timeout")]
    pub timeout: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CacheBackend {
    Redis,
    #[default]
    Memory,
}

/// 缓存系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    /// `url -> code` 与 `code -> url` 映射的有效期
    #[serde(default = "default_day_secs")]
    pub link_ttl_secs: u64,
    /// PV/UV/来源计数的有效期
    #[serde(default = "default_day_secs")]
    pub stats_ttl_secs: u64,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Redis 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,
}

/// 内存缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// 最大条目数，超出后按 TinyLFU 淘汰
    #[serde(default = "default_memory_capacity")]
    pub max_capacity: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BloomBackend {
    Redis,
    #[default]
    Local,
}

/// 成员索引（布隆过滤器）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomConfig {
    #[serde(default)]
    pub backend: BloomBackend,
    /// RedisBloom 键预留的容量
    #[serde(default = "default_bloom_capacity")]
    pub capacity: u64,
    /// 进程内过滤器的预期容量
    #[serde(default = "default_bloom_local_capacity")]
    pub local_capacity: u64,
    #[serde(default = "default_bloom_error_rate")]
    pub error_rate: f64,
    /// 位于 redis 键前缀之下的键名
    #[serde(default = "default_bloom_key")]
    pub key: String,
}

/// 短码生成配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_max_attempts_per_length")]
    pub max_attempts_per_length: u32,
}

/// 访问统计配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_analytics_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    #[serde(default = "default_top_sources")]
    pub top_sources: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccessLogBackend {
    #[default]
    None,
    RedisStream,
    Database,
}

/// 访问日志投递配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogConfig {
    #[serde(default)]
    pub backend: AccessLogBackend,
    #[serde(default = "default_stream_key")]
    pub stream_key: String,
    #[serde(default = "default_stream_max_len")]
    pub stream_max_len: usize,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
    /// 在本进程内运行 stream -> access_logs 消费者
    #[serde(default)]
    pub consumer_enabled: bool,
    #[serde(default = "default_consumer_batch_size")]
    pub consumer_batch_size: usize,
    #[serde(default = "default_consumer_block_ms")]
    pub consumer_block_ms: usize,
    /// 主 sink 失败时写入的 JSON 行文件
    #[serde(default)]
    pub fallback_file: Option<String>,
}

/// 过期链接清理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// 为 0 时禁用清理任务
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_enable_rotation")]
    pub enable_rotation: bool,
}

// ============================================================
// 默认值函数
// ============================================================

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_domain() -> String {
    "http://localhost:8080".to_string()
}

fn default_database_url() -> String {
    "octolink.db".to_string()
}

fn default_database_pool_size() -> u32 {
    10
}

fn default_database_timeout() -> u64 {
    30
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

fn default_day_secs() -> u64 {
    86_400
}

fn default_memory_capacity() -> u64 {
    100_000
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_redis_key_prefix() -> String {
    "sl:".to_string()
}

fn default_bloom_capacity() -> u64 {
    1_000_000_000
}

fn default_bloom_local_capacity() -> u64 {
    1_000_000
}

fn default_bloom_error_rate() -> f64 {
    0.01
}

fn default_bloom_key() -> String {
    "bloom".to_string()
}

fn default_max_attempts_per_length() -> u32 {
    1000
}

fn default_analytics_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_task_timeout_ms() -> u64 {
    2000
}

fn default_top_sources() -> usize {
    10
}

fn default_stream_key() -> String {
    "access_logs".to_string()
}

fn default_stream_max_len() -> usize {
    100_000
}

fn default_consumer_group() -> String {
    "octolink".to_string()
}

fn default_consumer_name() -> String {
    "octolink-1".to_string()
}

fn default_consumer_batch_size() -> usize {
    100
}

fn default_consumer_block_ms() -> usize {
    5000
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_max_backups() -> u32 {
    5
}

fn default_enable_rotation() -> bool {
    true
}

// ============================================================
// Default 实现
// ============================================================

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            domain: default_domain(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            pool_size: default_database_pool_size(),
            timeout: default_database_timeout(),
            retry_count: default_retry_count(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            link_ttl_secs: default_day_secs(),
            stats_ttl_secs: default_day_secs(),
            redis: RedisConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_memory_capacity(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_redis_key_prefix(),
        }
    }
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            backend: BloomBackend::default(),
            capacity: default_bloom_capacity(),
            local_capacity: default_bloom_local_capacity(),
            error_rate: default_bloom_error_rate(),
            key: default_bloom_key(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_length: default_max_attempts_per_length(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            workers: default_analytics_workers(),
            queue_capacity: default_queue_capacity(),
            task_timeout_ms: default_task_timeout_ms(),
            top_sources: default_top_sources(),
        }
    }
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            backend: AccessLogBackend::default(),
            stream_key: default_stream_key(),
            stream_max_len: default_stream_max_len(),
            consumer_group: default_consumer_group(),
            consumer_name: default_consumer_name(),
            consumer_enabled: false,
            consumer_batch_size: default_consumer_batch_size(),
            consumer_block_ms: default_consumer_block_ms(),
            fallback_file: None,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            max_backups: default_max_backups(),
            enable_rotation: default_enable_rotation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.redis.key_prefix, "sl:");
        assert_eq!(config.cache.link_ttl_secs, 86_400);
        assert_eq!(config.generator.max_attempts_per_length, 1000);
        assert_eq!(config.analytics.top_sources, 10);
        assert_eq!(config.access_log.backend, AccessLogBackend::None);
    }

    #[test]
    fn test_validate_rejects_bad_error_rate() {
        let mut config = AppConfig::default();
        config.bloom.error_rate = 1.5;
        assert!(matches!(config.validate(), Err(OctolinkError::Config(_))));
        config.bloom.error_rate = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = AppConfig::default();
        config.analytics.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_config_round_trips_through_toml() {
        let sample = AppConfig::generate_sample();
        assert!(sample.contains("[server]"));
        assert!(sample.contains("[bloom]"));
        let parsed: AppConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.server.port, 8080);
        assert_eq!(parsed.bloom.backend, BloomBackend::Local);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [cache]
            backend = "redis"

            [access_log]
            backend = "redis_stream"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.cache.backend, CacheBackend::Redis);
        assert_eq!(parsed.cache.stats_ttl_secs, 86_400);
        assert_eq!(parsed.cache.memory.max_capacity, 100_000);
        assert_eq!(parsed.access_log.backend, AccessLogBackend::RedisStream);
        assert_eq!(parsed.access_log.stream_key, "access_logs");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("octolink.toml");
        std::fs::write(&path, "[server]\nport = 9123\n").unwrap();

        let config = AppConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 9123);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_save_to_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        AppConfig::default().save_to_file(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("domain"));
    }
}
