//! 集成测试共用的注册表与引擎装配。

#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use spark_rpc_codecs::{JsonProtocol, Protocol};
use spark_rpc_core::{
    ApiFragment, CallError, FunctionDef, MemoryLogger, Registry, Value, producer_from_iter,
};
use spark_rpc_engine::{Engine, EngineBuilder, RpcResponse};

pub fn calculator() -> ApiFragment {
    ApiFragment::new()
        .function(
            FunctionDef::unary("add", |call| {
                Ok(Value::Int(call.arg::<i64>("a")? + call.arg::<i64>("b")?))
            })
            .param("a", "int")
            .param("b", "int")
            .returns("int")
            .doc("Adds two integers."),
        )
        .function(
            FunctionDef::stream("count", |call| {
                let n = call.arg::<i64>("n")?;
                Ok(producer_from_iter((0..n).map(|i| Ok(Value::Int(i)))))
            })
            .param("n", "int")
            .returns("int"),
        )
        .function(
            FunctionDef::stream("flaky", |_| {
                Ok(producer_from_iter(vec![
                    Ok(Value::Int(1)),
                    Ok(Value::Int(2)),
                    Err(CallError::new("ValueError", "generator failed")),
                    Ok(Value::Int(3)),
                ]))
            })
            .returns("int"),
        )
        .function(
            FunctionDef::unary("boom", |_| -> Result<Value, CallError> { panic!("kaboom") })
                .returns("None"),
        )
        .function(
            FunctionDef::unary("sum_all", |mut call| {
                let mut total = 0;
                for item in call.take_stream()? {
                    total += item?.as_i64().unwrap_or(0);
                }
                Ok(Value::Int(total))
            })
            .param("numbers", "Stream[int]")
            .returns("int"),
        )
        .function(
            FunctionDef::unary("whoami", |call| {
                let auth = call.request.as_ref().and_then(|request| request.auth.as_ref());
                match auth {
                    Some(auth) if auth.is_authenticated => {
                        Ok(Value::from(auth.principal.clone().unwrap_or_default()))
                    }
                    _ => Err(CallError::new("PermissionDenied", "not authenticated")),
                }
            })
            .request_param("req")
            .returns("str"),
        )
}

pub fn registry() -> Arc<Registry> {
    let mut registry = Registry::new();
    registry.register(&calculator(), "v1", None).expect("v1 root");
    registry
        .register(
            &ApiFragment::new().function(
                FunctionDef::unary("echo", |call| Ok(Value::from(call.arg::<String>("text")?)))
                    .param("text", "str")
                    .returns("str"),
            ),
            "v1",
            Some("strings"),
        )
        .expect("v1 strings");
    Arc::new(registry)
}

pub fn builder(logger: Arc<MemoryLogger>) -> EngineBuilder {
    Engine::builder(registry()).logger(logger)
}

pub fn engine(logger: Arc<MemoryLogger>) -> Engine {
    builder(logger).build().expect("engine")
}

/// 以 JSON 解码完整响应体。
pub fn json_body(response: RpcResponse) -> Value {
    let bytes: Bytes = response.into_bytes();
    JsonProtocol.deserialize(&bytes).expect("json envelope")
}

/// 以 JSON 逐行解码流式响应体。
pub fn json_lines(response: RpcResponse) -> Vec<Value> {
    let bytes = response.into_bytes();
    bytes
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| JsonProtocol.deserialize(line).expect("json record"))
        .collect()
}
