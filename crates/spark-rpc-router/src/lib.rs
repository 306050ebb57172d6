#![deny(unsafe_code)]
#![doc = "spark-rpc-router: 把入站请求映射为注册表中的函数与一组绑定好的参数。"]
#![doc = ""]
#![doc = "路径语法为 `/<api 前缀>/<版本>/[<命名空间段>/...]/<函数名>[?<查询串>]`；"]
#![doc = "查询串取值可按字面量还原为数字、布尔与容器，请求体交由协商出的协议解码。"]

mod config;
mod literal;
mod resolver;

pub use config::{QueryLiteralMode, ResolverConfig};
pub use literal::{MAX_DEPTH, parse_literal};
pub use resolver::{PathResolver, ResolvedCall, Target};
