use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub oracle: OracleConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `memory` 表示使用进程内存储
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url == "memory"
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub tag_max_tokens: u32,
    pub receipt_max_tokens: u32,
    pub match_max_tokens: u32,
    pub timeout_secs: u64,
}

// api_key 不进日志
impl std::fmt::Debug for OracleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("tag_max_tokens", &self.tag_max_tokens)
            .field("receipt_max_tokens", &self.receipt_max_tokens)
            .field("match_max_tokens", &self.match_max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 每次 enrich 调用处理的吊牌数 (oracle 有响应时间上限)
    pub enrich_batch_size: i64,
    /// 后台 drain 的最大轮数
    pub max_enrich_rounds: u32,
    /// finalize 批量写入的分块大小
    pub intake_chunk_size: usize,
    pub default_brand: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enrich_batch_size: 5,
            max_enrich_rounds: 50,
            intake_chunk_size: 500,
            default_brand: "Free People".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/kickstart".to_string(),
                max_connections: 20,
            },
            oracle: OracleConfig {
                api_key: String::new(),
                base_url: "https://api.anthropic.com".to_string(),
                model: "claude-sonnet-4-20250514".to_string(),
                tag_max_tokens: 500,
                receipt_max_tokens: 2000,
                match_max_tokens: 4000,
                timeout_secs: 60,
            },
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    /// 加载顺序：默认值 → kickstart.toml (可选) → KICKSTART__* 环境变量
    ///
    /// `DATABASE_URL` 与 `ANTHROPIC_API_KEY` 最后覆盖。
    pub fn load() -> Result<Self, config::ConfigError> {
        let defaults = AppConfig::default();

        let mut cfg: AppConfig = Config::builder()
            .add_source(Config::try_from(&defaults)?)
            .add_source(File::with_name("kickstart").required(false))
            .add_source(
                Environment::with_prefix("KICKSTART")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            cfg.database.url = url;
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            cfg.oracle.api_key = key;
        }

        Ok(cfg)
    }
}
