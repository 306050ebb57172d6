//! 以固定响应的传输层驱动客户端
//!
//! - **核心目标 (Why)**：确认响应协议以服务端回写的协议头为准、流式响应逐项解包、错误信封转换为错误；
//! - **设计手法 (How)**：传输层记录收到的调用并返回预先编码好的字节，不涉及任何网络。

use std::sync::Mutex;

use bytes::Bytes;
use spark_rpc_client::{Client, ClientError, PreparedCall, Transport, TransportResponse};
use spark_rpc_codecs::{JsonProtocol, MessagePackProtocol, Protocol};
use spark_rpc_core::{Headers, Map, Value};

struct Canned {
    protocol: &'static str,
    body: Bytes,
    seen: Mutex<Vec<PreparedCall>>,
}

impl Canned {
    fn new(protocol: &'static str, body: Bytes) -> Self {
        Self {
            protocol,
            body,
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl Transport for Canned {
    fn send(&self, call: PreparedCall) -> Result<TransportResponse, ClientError> {
        self.seen
            .lock()
            .map_err(|_| ClientError::Transport("poisoned".into()))?
            .push(call);
        let headers: Headers = [("X-RPC-Protocol", self.protocol)].into_iter().collect();
        Ok(TransportResponse {
            headers,
            body: self.body.clone(),
        })
    }
}

fn envelope(result: Value) -> Value {
    Value::from_iter([("success", Value::Bool(true)), ("result", result)])
}

#[test]
fn unary_response_is_decoded_with_the_echoed_protocol() {
    let body = JsonProtocol.serialize(&envelope(Value::Int(7))).expect("encode");
    let transport = Canned::new("json", body);
    let client = Client::new("http://calc/api/").expect("client").with_version("v1");

    let args = Map::from([("a".to_owned(), Value::Int(3)), ("b".to_owned(), Value::Int(4))]);
    let value = client.invoke(&transport, None, "add", args).expect("invoke");
    assert_eq!(value, Value::Int(7));

    let seen = transport.seen.lock().expect("lock");
    assert_eq!(seen[0].protocol, "messagepack");
    let sent = MessagePackProtocol.deserialize(&seen[0].body).expect("decode request");
    assert_eq!(sent.get("b"), Some(&Value::Int(4)));
}

#[test]
fn streamed_responses_stop_at_the_error_envelope() {
    let error = Value::from_iter([
        ("success", Value::Bool(false)),
        ("message", Value::from("generator failed")),
        ("code", Value::Int(50000)),
        ("error", Value::from("[calc] Exception")),
    ]);
    let mut body = Vec::new();
    for record in [envelope(Value::Int(1)), envelope(Value::Int(2)), error] {
        body.extend_from_slice(&MessagePackProtocol.serialize(&record).expect("encode"));
    }
    let transport = Canned::new("messagepack", Bytes::from(body));
    let client = Client::new("http://calc/api/").expect("client").with_version("v1");

    let items: Vec<_> = client
        .invoke_stream(&transport, Some("gen"), "count", Map::new())
        .expect("stream")
        .collect();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0], Ok(Value::Int(1)));
    assert_eq!(items[1], Ok(Value::Int(2)));
    assert_eq!(items[2].as_ref().err().and_then(ClientError::code), Some(50000));
}

#[test]
fn unknown_echoed_protocol_is_reported() {
    let transport = Canned::new("pickle", Bytes::new());
    let client = Client::new("http://calc/api/").expect("client");
    let err = client
        .invoke(&transport, None, "ping", Map::new())
        .expect_err("unknown protocol");
    assert_eq!(err, ClientError::UnknownProtocol("pickle".to_owned()));
}
