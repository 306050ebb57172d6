use std::fmt;
use std::sync::Arc;

use spark_rpc_codecs::Protocol;
use spark_rpc_core::{
    Arguments, CallError, FunctionDescriptor, InboundStream, Invocation, Map, Registry,
    RequestBody, RequestHandle, RpcError, TypeSpec, Value,
};
use url::form_urlencoded;

use crate::config::{QueryLiteralMode, ResolverConfig};
use crate::literal::parse_literal;

/// 路径解析出的查找键。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub version: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.version, ns, self.name),
            None => write!(f, "{}/{}", self.version, self.name),
        }
    }
}

/// 解析完成的一次调用：命中的描述符与绑定好的参数。
#[derive(Debug)]
pub struct ResolvedCall {
    pub descriptor: Arc<FunctionDescriptor>,
    pub invocation: Invocation,
}

/// 把入站请求映射为注册表中的函数与参数集合。
///
/// # 教案级注释
/// - **意图 (Why)**：执行引擎不关心 URL 语法与参数来源，只需要“调用谁、传什么”；
/// - **执行逻辑 (How)**：
///   1. 去掉 API 前缀后按 `/` 切分：首段为候选版本、末段为函数名、中间为命名空间；
///   2. 候选版本未注册且配置了缺省版本时，改用缺省版本，并把候选版本连同中间段并入命名空间；
///   3. 查询串按 [`QueryLiteralMode`] 解析，同名键以首次出现为准；
///   4. 携带请求体的方法交给协商出的协议解码：若恰好一个参数声明为流类型，该参数绑定到惰性解码序列，
///      否则请求体必须解码为映射，并覆盖同名的查询参数；
///   5. 校验参数名、补齐缺省值、按需绑定实时请求。
/// - **契约 (What)**：未知函数为 `UnknownAPIFunction`；未知或缺失参数为 `KeywordArgumentError`；
///   非映射请求体为 `NonKeywordArgumentsError`；请求体解码失败为 `MalformedPayload`。
#[derive(Clone, Debug)]
pub struct PathResolver {
    registry: Arc<Registry>,
    config: ResolverConfig,
    prefix: String,
}

impl PathResolver {
    pub fn new(registry: Arc<Registry>, config: ResolverConfig) -> Self {
        let prefix = config.normalized_prefix();
        Self {
            registry,
            config,
            prefix,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// 只做路径层面的切分与版本回退，不查询函数是否存在。
    pub fn parse_target(&self, path: &str) -> Result<Target, RpcError> {
        let unknown = || RpcError::UnknownApiFunction {
            name: path.to_owned(),
        };
        let rest = if self.prefix.is_empty() {
            path
        } else {
            path.strip_prefix(self.prefix.as_str())
                .filter(|rest| rest.is_empty() || rest.starts_with('/'))
                .ok_or_else(unknown)?
        };
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        let [candidate, middle @ .., name] = segments.as_slice() else {
            return Err(unknown());
        };

        let target = match &self.config.default_version {
            Some(default) if !self.registry.is_known_version(candidate) => {
                let mut namespace = vec![*candidate];
                namespace.extend_from_slice(middle);
                Target {
                    version: default.clone(),
                    namespace: Some(namespace.join("/")),
                    name: (*name).to_owned(),
                }
            }
            _ => Target {
                version: (*candidate).to_owned(),
                namespace: (!middle.is_empty()).then(|| middle.join("/")),
                name: (*name).to_owned(),
            },
        };
        Ok(target)
    }

    /// 按路径查找描述符。
    pub fn lookup(&self, path: &str) -> Result<Arc<FunctionDescriptor>, RpcError> {
        let target = self.parse_target(path)?;
        self.registry
            .get_function(&target.version, target.namespace.as_deref(), &target.name)
            .ok_or(RpcError::UnknownApiFunction { name: target.name })
    }

    /// 查找并绑定参数。
    pub fn resolve(
        &self,
        request: &RequestHandle,
        body: RequestBody,
        protocol: &dyn Protocol,
    ) -> Result<ResolvedCall, RpcError> {
        let descriptor = self.lookup(request.path())?;
        let invocation = self.bind(&descriptor, request, body, protocol)?;
        Ok(ResolvedCall {
            descriptor,
            invocation,
        })
    }

    /// 为已知描述符绑定参数。
    pub fn bind(
        &self,
        descriptor: &FunctionDescriptor,
        request: &RequestHandle,
        body: RequestBody,
        protocol: &dyn Protocol,
    ) -> Result<Invocation, RpcError> {
        let mut values = self.query_values(descriptor, request.query());
        let mut stream: Option<(String, InboundStream)> = None;

        if request.method.has_body() {
            match descriptor.stream_param() {
                Some(name) => {
                    let items = protocol.deserialize_stream(body.into_reader())?;
                    let items: InboundStream =
                        Box::new(items.map(|item| item.map_err(CallError::from)));
                    stream = Some((name.to_owned(), items));
                }
                None => {
                    let bytes = body.read_all().map_err(|err| {
                        RpcError::MalformedPayload(format!("failed to read request body: {err}"))
                    })?;
                    if !bytes.is_empty() {
                        match protocol.deserialize_bytes(bytes)? {
                            Value::Map(map) => values.extend(map),
                            Value::Null => {}
                            other => {
                                return Err(RpcError::NonKeywordArguments(
                                    other.type_name().to_owned(),
                                ));
                            }
                        }
                    }
                }
            }
        }

        let streamed = stream.as_ref().map(|(name, _)| name.as_str());
        check_arguments(descriptor, &mut values, streamed)?;

        let mut args: Arguments = values.into_iter().collect();
        if let Some((name, items)) = stream {
            args.set_stream(name, items);
        }
        let mut invocation = Invocation::new(args);
        if descriptor.request_param().is_some() {
            invocation.request = Some(Arc::clone(request));
        }
        Ok(invocation)
    }

    fn query_values(&self, descriptor: &FunctionDescriptor, query: &str) -> Map {
        let mut values = Map::new();
        for (key, raw) in form_urlencoded::parse(query.as_bytes()) {
            if values.contains_key(key.as_ref()) {
                continue;
            }
            let keep_raw = match self.config.query_literals {
                QueryLiteralMode::Off => true,
                QueryLiteralMode::Eager => false,
                QueryLiteralMode::SchemaDriven => descriptor
                    .param(&key)
                    .and_then(|param| param.declared())
                    .is_some_and(TypeSpec::accepts_str),
            };
            let value = if keep_raw {
                None
            } else {
                parse_literal(&raw)
            };
            let value = value.unwrap_or_else(|| Value::Str(raw.into_owned()));
            values.insert(key.into_owned(), value);
        }
        values
    }
}

fn check_arguments(
    descriptor: &FunctionDescriptor,
    values: &mut Map,
    streamed: Option<&str>,
) -> Result<(), RpcError> {
    let function = descriptor.name();
    if let Some(unexpected) = values.keys().find(|key| descriptor.param(key).is_none()) {
        return Err(RpcError::KeywordArgument(format!(
            "{function}() got an unexpected keyword argument '{unexpected}'"
        )));
    }
    if let Some(name) = streamed.filter(|name| values.contains_key(*name)) {
        return Err(RpcError::KeywordArgument(format!(
            "{function}() got multiple values for argument '{name}'"
        )));
    }
    for param in descriptor.params() {
        if values.contains_key(&param.name) || streamed == Some(param.name.as_str()) {
            continue;
        }
        match &param.default {
            Some(default) if !param.required => {
                values.insert(param.name.clone(), default.clone());
            }
            _ => {
                return Err(RpcError::KeywordArgument(format!(
                    "{function}() missing required argument '{}'",
                    param.name
                )));
            }
        }
    }
    Ok(())
}
