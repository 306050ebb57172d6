//! 客户端经进程内回环调用执行引擎
//!
//! - **核心目标 (Why)**：客户端构建的地址、协议头与请求体能被引擎直接理解，引擎回写的协议头能被客户端用来解码；
//! - **设计手法 (How)**：[`Loopback`] 把 [`PreparedCall`] 转换为抽象请求交给 `Engine::process`，
//!   再把响应头与全部响应字节交还客户端。

mod support;

use std::sync::Arc;

use spark_rpc_client::{
    BasicSigner, Client, ClientError, PreparedCall, Transport, TransportResponse,
};
use spark_rpc_core::{Map, MemoryLogger, RpcRequest, Value};
use spark_rpc_engine::{BasicAuthenticator, Engine};

use support::builder;

struct Loopback(Engine);

impl Transport for Loopback {
    fn send(&self, call: PreparedCall) -> Result<TransportResponse, ClientError> {
        let response = self.0.process(call.into_request());
        let headers = response.headers.clone();
        Ok(TransportResponse {
            headers,
            body: response.into_bytes(),
        })
    }
}

fn loopback() -> Loopback {
    let auth = BasicAuthenticator::new().with_user("ada", "s3cret", Map::new());
    let engine = builder(Arc::new(MemoryLogger::new()))
        .authenticator(Arc::new(auth))
        .build()
        .expect("engine");
    Loopback(engine)
}

fn client() -> Client {
    Client::new("http://localhost:8818/api/")
        .expect("client")
        .with_version("v1")
}

fn args<const N: usize>(pairs: [(&str, Value); N]) -> Map {
    pairs.into_iter().map(|(k, v)| (k.to_owned(), v)).collect()
}

#[test]
fn unary_calls_round_trip_over_every_wrapping_codec() {
    let transport = loopback();
    for protocol in ["messagepack", "json", "native"] {
        let client = client().with_protocol(protocol).expect("protocol");
        let value = client
            .invoke(&transport, None, "add", args([("a", Value::Int(3)), ("b", Value::Int(4))]))
            .expect("add");
        assert_eq!(value, Value::Int(7), "{protocol}");
    }
}

#[test]
fn namespaces_and_errors_surface_through_the_client() {
    let transport = loopback();
    let echoed = client()
        .invoke(&transport, Some("strings"), "echo", args([("text", Value::from("hi"))]))
        .expect("echo");
    assert_eq!(echoed, Value::from("hi"));

    let err = client()
        .invoke(&transport, None, "mul", Map::new())
        .expect_err("unknown function");
    assert_eq!(err.code(), Some(50002));

    let err = client()
        .invoke(&transport, None, "add", args([("a", Value::Int(1)), ("c", Value::Int(2))]))
        .expect_err("unexpected keyword");
    assert_eq!(err.code(), Some(50010));
}

#[test]
fn streams_are_extracted_item_by_item() {
    let transport = loopback();
    let items: Vec<_> = client()
        .invoke_stream(&transport, None, "flaky", Map::new())
        .expect("stream")
        .collect();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0], Ok(Value::Int(1)));
    assert_eq!(items[1], Ok(Value::Int(2)));
    let Err(ClientError::Response(err)) = &items[2] else {
        panic!("expected an error envelope, got {:?}", items[2]);
    };
    assert_eq!(err.kind(), "ValueError");
    assert_eq!(err.message, "generator failed");
}

#[test]
fn signed_calls_authenticate_and_propagate_correlation() {
    let transport = loopback();
    let live = RpcRequest::get("/api/v1/outer")
        .with_header("x-rpc-tenant", "acme")
        .into_parts("up-9.0000aaaa")
        .0;
    let client = client()
        .with_signer(Arc::new(BasicSigner::new("ada", "s3cret")))
        .with_request(Arc::new(live));

    let call = client.call(None, "whoami", Map::new()).expect("prepared");
    assert_eq!(call.headers.get("x-rpc-request-id"), Some("up-9.0000aaaa"));
    assert_eq!(call.headers.get("x-rpc-tenant"), Some("acme"));

    let value = client.invoke(&transport, None, "whoami", Map::new()).expect("whoami");
    assert_eq!(value, Value::from("ada"));
}
