//! `Authorization` 头部鉴权器。
//!
//! # 教案式说明
//! - **意图（Why）**：提供两种开箱即用的 [`Authenticator`]：用户名口令（`Basic`）与令牌（`Bearer`）；
//! - **契约（What）**：
//!   - 请求未携带 `Authorization` 时返回 `Ok(None)`，是否放行由业务函数决定；
//!   - 方案名（大小写不敏感）与鉴权器不符、凭证格式错误时返回 [`RpcError::Authentication`]；
//!   - 凭证格式正确但未命中存储时返回 `is_authenticated == false` 的 [`AuthInfo`]；
//!   - 命中时 `is_authenticated == true`，存储中的附加信息并入 `attributes`；
//! - **风险提示（Trade-offs）**：口令以明文比较并常驻内存，只适用于测试与内部工具，
//!   生产部署应实现自己的 [`Authenticator`] 接入外部身份服务。

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use spark_rpc_core::{AuthInfo, Authenticator, Map, RequestParts, RpcError};

pub const AUTHORIZATION: &str = "Authorization";

/// 拆出 `<scheme> <credentials>`，并核对方案名。
fn read_credentials<'a>(
    request: &'a RequestParts,
    scheme: &str,
) -> Result<Option<&'a str>, RpcError> {
    let Some(header) = request.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let header = header.trim();
    let (given, credentials) = header.split_once(' ').unwrap_or((header, ""));
    if !given.eq_ignore_ascii_case(scheme) {
        return Err(RpcError::Authentication(given.to_owned()));
    }
    Ok(Some(credentials.trim()))
}

#[derive(Clone, Debug, PartialEq)]
struct UserRecord {
    password: String,
    attributes: Map,
}

/// 基于内存用户表的 `Basic` 鉴权。
#[derive(Clone, Debug, Default)]
pub struct BasicAuthenticator {
    users: BTreeMap<String, UserRecord>,
}

impl BasicAuthenticator {
    pub const SCHEME: &'static str = "basic";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        attributes: Map,
    ) -> Self {
        self.users.insert(
            username.into(),
            UserRecord {
                password: password.into(),
                attributes,
            },
        );
        self
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, request: &RequestParts) -> Result<Option<AuthInfo>, RpcError> {
        let Some(credentials) = read_credentials(request, Self::SCHEME)? else {
            return Ok(None);
        };
        let decoded = STANDARD
            .decode(credentials)
            .map_err(|err| {
                RpcError::Authentication(format!("basic credentials are not base64: {err}"))
            })?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| RpcError::Authentication("basic credentials are not UTF-8".to_owned()))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| RpcError::Authentication("basic credentials lack ':'".to_owned()))?;

        let mut info = AuthInfo::new(Self::SCHEME);
        info.principal = Some(username.to_owned());
        if let Some(user) = self.users.get(username).filter(|user| user.password == password) {
            info.is_authenticated = true;
            info.attributes = user.attributes.clone();
        }
        Ok(Some(info))
    }
}

/// 基于内存令牌表的 `Bearer` 鉴权。
#[derive(Clone, Debug, Default)]
pub struct BearerAuthenticator {
    tokens: BTreeMap<String, Map>,
}

impl BearerAuthenticator {
    pub const SCHEME: &'static str = "bearer";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, attributes: Map) -> Self {
        self.tokens.insert(token.into(), attributes);
        self
    }
}

impl Authenticator for BearerAuthenticator {
    fn authenticate(&self, request: &RequestParts) -> Result<Option<AuthInfo>, RpcError> {
        let Some(token) = read_credentials(request, Self::SCHEME)? else {
            return Ok(None);
        };
        let mut info = AuthInfo::new(Self::SCHEME);
        info.principal = Some(token.to_owned());
        if let Some(attributes) = self.tokens.get(token) {
            info.is_authenticated = true;
            info.attributes = attributes.clone();
        }
        Ok(Some(info))
    }
}

#[cfg(test)]
mod tests {
    use spark_rpc_core::{RpcRequest, Value};

    use super::*;

    fn parts(authorization: Option<&str>) -> RequestParts {
        let mut request = RpcRequest::get("/api/v1/me");
        if let Some(value) = authorization {
            request = request.with_header(AUTHORIZATION, value);
        }
        request.into_parts("r1").0
    }

    fn basic() -> BasicAuthenticator {
        let attributes: Map = [("role".to_owned(), Value::from("admin"))].into_iter().collect();
        BasicAuthenticator::new().with_user("ada", "s3cret", attributes)
    }

    #[test]
    fn basic_credentials_are_checked_against_the_user_store() {
        let header = format!("Basic {}", STANDARD.encode("ada:s3cret"));
        let info = basic().authenticate(&parts(Some(&header))).expect("ok").expect("present");
        assert!(info.is_authenticated);
        assert_eq!(info.principal.as_deref(), Some("ada"));
        assert_eq!(info.attributes.get("role"), Some(&Value::from("admin")));

        let header = format!("basic {}", STANDARD.encode("ada:wrong"));
        let info = basic().authenticate(&parts(Some(&header))).expect("ok").expect("present");
        assert!(!info.is_authenticated);
        assert!(info.attributes.is_empty());
    }

    #[test]
    fn missing_header_and_scheme_mismatch() {
        assert_eq!(basic().authenticate(&parts(None)), Ok(None));
        let err = basic()
            .authenticate(&parts(Some("Bearer abc")))
            .expect_err("wrong scheme");
        assert_eq!(err.code(), 50011);
        assert_eq!(err.message(), "Invalid auth type: Bearer");
        assert!(basic().authenticate(&parts(Some("Basic !!!"))).is_err());
    }

    #[test]
    fn bearer_tokens_resolve_attributes() {
        let auth = BearerAuthenticator::new().with_token("tok-1", Map::new());
        let info = auth.authenticate(&parts(Some("Bearer tok-1"))).expect("ok").expect("present");
        assert!(info.is_authenticated);
        let info = auth.authenticate(&parts(Some("Bearer tok-2"))).expect("ok").expect("present");
        assert!(!info.is_authenticated);
        assert_eq!(info.scheme, "bearer");
    }
}
