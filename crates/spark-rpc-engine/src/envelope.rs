//! 成功与失败信封。
//!
//! 成功：`{success: true, result}`；失败：`{success: false, message, code, error}`，其中 `error`
//! 形如 `[<server>] <Kind>`，客户端据此区分错误来源与类别。

use spark_rpc_core::{Map, RpcError, Value};

pub const SUCCESS: &str = "success";
pub const RESULT: &str = "result";
pub const MESSAGE: &str = "message";
pub const CODE: &str = "code";
pub const ERROR: &str = "error";

pub fn success(result: Value) -> Value {
    let mut map = Map::new();
    map.insert(SUCCESS.to_owned(), Value::Bool(true));
    map.insert(RESULT.to_owned(), result);
    Value::Map(map)
}

pub fn failure(err: &RpcError, server_name: &str) -> Value {
    let mut map = Map::new();
    map.insert(SUCCESS.to_owned(), Value::Bool(false));
    map.insert(MESSAGE.to_owned(), Value::Str(err.message()));
    map.insert(CODE.to_owned(), Value::Int(err.code()));
    map.insert(
        ERROR.to_owned(),
        Value::Str(format!("[{server_name}] {}", err.kind())),
    );
    Value::Map(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_names_server_and_kind() {
        let err = RpcError::UnknownApiFunction { name: "mul".into() };
        let envelope = failure(&err, "calc");
        assert_eq!(envelope.get(SUCCESS), Some(&Value::Bool(false)));
        assert_eq!(envelope.get(CODE), Some(&Value::Int(50002)));
        assert_eq!(
            envelope.get(ERROR),
            Some(&Value::from("[calc] UnknownAPIFunction"))
        );
        assert!(envelope.get(MESSAGE).and_then(Value::as_str).is_some_and(|m| m.contains("mul")));
    }
}
