//! 执行引擎配置。
//!
//! # 教案式说明
//! - **意图（Why）**：头部名称、缺省协议、工作池大小等都随部署变化，统一收敛到一个可从 TOML 加载的结构；
//! - **契约（What）**：所有字段都有缺省值，未知字段视为错误；[`EngineConfig::validate`] 在引擎构建前调用，
//!   任何违反约束的配置都不会进入请求路径；
//! - **风险提示（Trade-offs）**：缺省协议名只在构建引擎时与协议集合比对，配置文件本身无法得知有哪些协议。

use serde::Deserialize;
use spark_rpc_router::ResolverConfig;
use thiserror::Error;

/// 配置加载或校验失败。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to parse engine config: {0}")]
    Parse(String),

    #[error("worker_threads must be at least 1")]
    ZeroWorkers,

    #[error("header name `{0}` must not be empty")]
    EmptyHeader(&'static str),

    #[error("header name `{0}` is configured more than once")]
    DuplicateHeader(String),

    #[error("default_protocol must not be empty")]
    EmptyDefaultProtocol,
}

/// 引擎读取与写出的头部名称，比较时大小写不敏感。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeaderNames {
    /// 协议选择；响应中回写实际使用的协议名。
    pub protocol: String,
    /// 请求关联标识。
    pub request_id: String,
    /// 响应耗时（秒）。
    pub timing: String,
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            protocol: "x-rpc-protocol".to_owned(),
            request_id: "x-rpc-request-id".to_owned(),
            timing: "x-rpc-timing".to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub resolver: ResolverConfig,
    pub default_protocol: String,
    pub headers: HeaderNames,
    /// 同时执行的请求上限。
    pub worker_threads: usize,
    /// 写入错误信封 `error` 字段的服务端标识。
    pub server_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolver: ResolverConfig::default(),
            default_protocol: "json".to_owned(),
            headers: HeaderNames::default(),
            worker_threads: 16,
            server_name: "spark-rpc".to_owned(),
        }
    }
}

impl EngineConfig {
    /// 从 TOML 文本加载并校验。
    ///
    /// ```
    /// use spark_rpc_engine::EngineConfig;
    ///
    /// let config = EngineConfig::from_toml_str(
    ///     r#"
    ///     default_protocol = "messagepack"
    ///     worker_threads = 4
    ///
    ///     [resolver]
    ///     default_version = "v1"
    ///     "#,
    /// )
    /// .expect("valid config");
    /// assert_eq!(config.worker_threads, 4);
    /// assert_eq!(config.headers.protocol, "x-rpc-protocol");
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.default_protocol.trim().is_empty() {
            return Err(ConfigError::EmptyDefaultProtocol);
        }
        let names = [
            ("protocol", &self.headers.protocol),
            ("request_id", &self.headers.request_id),
            ("timing", &self.headers.timing),
        ];
        for (idx, (field, name)) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(ConfigError::EmptyHeader(*field));
            }
            if names[..idx]
                .iter()
                .any(|(_, other)| other.eq_ignore_ascii_case(name))
            {
                return Err(ConfigError::DuplicateHeader((*name).clone()));
            }
        }
        Ok(())
    }

    pub fn with_default_protocol(mut self, name: impl Into<String>) -> Self {
        self.default_protocol = name.into();
        self
    }

    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self
    }
}
