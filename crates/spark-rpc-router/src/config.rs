use serde::Deserialize;

/// 查询串取值的字面量解析策略。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryLiteralMode {
    /// 声明类型接受字符串的参数保留原文，其余参数尝试按字面量解析。
    #[default]
    SchemaDriven,
    /// 所有取值都尝试按字面量解析，失败时保留原文。
    Eager,
    /// 一律保留原文。
    Off,
}

/// 路径解析配置。
///
/// # 教案式说明
/// - **意图（Why）**：路径前缀、缺省版本与查询串策略都是部署相关的选择，集中到一个可反序列化的结构中，
///   由执行引擎的配置整体嵌入；
/// - **契约（What）**：
///   - `api_prefix` 以 `/` 开头、不以 `/` 结尾（[`ResolverConfig::normalized_prefix`] 负责规整）；
///   - `default_version` 为空时，未知版本直接导致函数查找失败；
/// - **风险提示（Trade-offs）**：缺省版本回退会把未知版本段并入命名空间，调用方可能因此命中意料之外的函数，
///   部署多个版本时应谨慎开启。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    pub api_prefix: String,
    pub default_version: Option<String>,
    pub query_literals: QueryLiteralMode,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api".to_owned(),
            default_version: None,
            query_literals: QueryLiteralMode::default(),
        }
    }
}

impl ResolverConfig {
    pub fn with_default_version(mut self, version: impl Into<String>) -> Self {
        self.default_version = Some(version.into());
        self
    }

    pub fn with_query_literals(mut self, mode: QueryLiteralMode) -> Self {
        self.query_literals = mode;
        self
    }

    /// 形如 `/api` 的前缀；空前缀返回空串。
    pub fn normalized_prefix(&self) -> String {
        let trimmed = self.api_prefix.trim().trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }
}
