//! 请求签名。

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use spark_rpc_core::Headers;
use url::Url;

pub const AUTHORIZATION: &str = "Authorization";

/// 在请求发出前写入鉴权信息。
///
/// 签名器可以读取最终地址与请求体（例如计算摘要），但只能修改头部。
pub trait RequestSigner: Send + Sync + 'static {
    fn sign(&self, url: &Url, headers: &mut Headers, body: &[u8]);
}

/// `Authorization: Basic base64(user:password)`。
#[derive(Clone, Debug)]
pub struct BasicSigner {
    header: String,
}

impl BasicSigner {
    pub fn new(username: &str, password: &str) -> Self {
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        Self {
            header: format!("Basic {encoded}"),
        }
    }
}

impl RequestSigner for BasicSigner {
    fn sign(&self, _url: &Url, headers: &mut Headers, _body: &[u8]) {
        headers.insert(AUTHORIZATION, self.header.as_str());
    }
}

/// `Authorization: Bearer <token>`。
#[derive(Clone, Debug)]
pub struct BearerSigner {
    header: String,
}

impl BearerSigner {
    pub fn new(token: &str) -> Self {
        Self {
            header: format!("Bearer {token}"),
        }
    }
}

impl RequestSigner for BearerSigner {
    fn sign(&self, _url: &Url, headers: &mut Headers, _body: &[u8]) {
        headers.insert(AUTHORIZATION, self.header.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signers_write_the_authorization_header() {
        let url = Url::parse("http://localhost/api/").expect("url");
        let mut headers = Headers::new();
        BasicSigner::new("ada", "s3cret").sign(&url, &mut headers, b"");
        assert_eq!(headers.get("authorization"), Some("Basic YWRhOnMzY3JldA=="));

        BearerSigner::new("tok-1").sign(&url, &mut headers, b"");
        assert_eq!(headers.get(AUTHORIZATION), Some("Bearer tok-1"));
    }
}
