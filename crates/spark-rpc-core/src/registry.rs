//! 函数注册表。
//!
//! # 教案级注释
//! - **目标 (Why)**
//!   - 启动阶段集中登记全部远程函数，命名冲突与类型声明问题在注册时即被捕获，而不是在首个请求时暴露；
//!   - 服务阶段只读，执行引擎通过 `Arc<Registry>` 在任意多个工作线程上并发查找，无需任何锁。
//! - **设计要点 (How)**
//!   - 以 (version, namespace, name) 为键的 `HashMap`，`has_function`/`get_function`/`is_known_version` 均为 O(1)；
//!   - 一次 `register` 调用先完整构建并校验整批描述符，全部通过后才合并，失败时注册表保持原状。
//! - **风险与注意事项 (Trade-offs)**
//!   - 命名空间以 `/` 连接的字符串保存，`"a/b"` 与 `["a", "b"]` 视为同一命名空间。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{RegistryError, RpcError};
use crate::function::{ApiCollection, FunctionDef, Handler};
use crate::logging::{KeyValue, Logger, NoopLogger};
use crate::schema::{ParamSpec, Position, validate_type};
use crate::types::TypeSpec;
use crate::value::{Map, Value};

/// 描述符的身份。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionKey {
    pub version: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl FunctionKey {
    pub fn new(
        version: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            namespace: normalize_namespace(namespace),
            name: name.into(),
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.version, ns, self.name),
            None => write!(f, "{}/{}", self.version, self.name),
        }
    }
}

fn normalize_namespace(namespace: Option<&str>) -> Option<String> {
    let joined = namespace?
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    (!joined.is_empty()).then_some(joined)
}

/// 已注册函数的不可变描述。
#[derive(Clone, Debug)]
pub struct FunctionDescriptor {
    key: FunctionKey,
    params: Vec<ParamSpec>,
    return_type: TypeSpec,
    gives_stream: bool,
    request_param: Option<String>,
    doc: Option<String>,
    handler: Handler,
}

impl FunctionDescriptor {
    pub fn key(&self) -> &FunctionKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// 参数模式（不含实时请求参数），保持声明顺序。
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|param| param.name == name)
    }

    pub fn return_type(&self) -> &TypeSpec {
        &self.return_type
    }

    pub fn gives_stream(&self) -> bool {
        self.gives_stream
    }

    pub fn request_param(&self) -> Option<&str> {
        self.request_param.as_deref()
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// 恰好一个参数声明为流类型时返回该参数名。
    pub fn stream_param(&self) -> Option<&str> {
        let mut streams = self.params.iter().filter(|param| param.is_stream());
        match (streams.next(), streams.next()) {
            (Some(param), None) => Some(param.name.as_str()),
            _ => None,
        }
    }

    /// 文档条目：`{doc, params: {name: {required, default, type}}, return_type, gives_stream}`。
    pub fn info(&self) -> Value {
        let params: Map = self
            .params
            .iter()
            .map(|param| {
                let type_name = param
                    .type_spec
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                let entry = Value::from_iter([
                    ("required", Value::Bool(param.required)),
                    ("default", param.default.clone().unwrap_or(Value::Null)),
                    ("type", Value::Str(type_name)),
                ]);
                (param.name.clone(), entry)
            })
            .collect();
        Value::from_iter([
            ("doc", Value::from(self.doc.clone())),
            ("params", Value::Map(params)),
            ("return_type", Value::Str(self.return_type.to_string())),
            ("gives_stream", Value::Bool(self.gives_stream)),
        ])
    }

    fn build(key: FunctionKey, def: FunctionDef) -> Result<Self, RegistryError> {
        let function = key.to_string();
        let mut params = def.params().to_vec();

        let leads_with_request = params
            .first()
            .is_some_and(|first| first.type_spec == Some(TypeSpec::Request));
        let request_param = leads_with_request.then(|| params.remove(0).name);
        let offset = usize::from(request_param.is_some());

        for (idx, param) in params.iter().enumerate() {
            let declared = param
                .type_spec
                .as_ref()
                .ok_or_else(|| RegistryError::TypeNotSpecified {
                    function: function.clone(),
                    argument: param.name.clone(),
                })?;
            let position = Position::Param {
                index: idx + offset,
                name: param.name.clone(),
            };
            validate_type(&function, &position, declared)?;
        }

        let gives_stream = def.handler().gives_stream();
        let declared_return = def
            .return_type()
            .cloned()
            .ok_or_else(|| RegistryError::TypeNotSpecified {
                function: function.clone(),
                argument: "return".to_owned(),
            })?;
        validate_type(&function, &Position::Return, &declared_return)?;
        let return_type = match (gives_stream, declared_return) {
            (true, TypeSpec::Stream(item)) => TypeSpec::Stream(item),
            (true, item) => TypeSpec::Stream(Box::new(item)),
            (false, stream @ TypeSpec::Stream(_)) => {
                return Err(RegistryError::UnsupportedType {
                    function,
                    position: Position::Return.to_string(),
                    type_name: format!("{stream} (handler returns a single value)"),
                });
            }
            (false, single) => single,
        };

        Ok(Self {
            key,
            params,
            return_type,
            gives_stream,
            request_param,
            doc: def.documentation().map(str::to_owned),
            handler: def.handler().clone(),
        })
    }
}

/// 版本化、带命名空间的函数注册表。
pub struct Registry {
    functions: HashMap<FunctionKey, Arc<FunctionDescriptor>>,
    versions: HashSet<String>,
    logger: Arc<dyn Logger>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.functions.keys().map(ToString::to_string).collect();
        keys.sort();
        f.debug_struct("Registry").field("functions", &keys).finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_logger(Arc::new(NoopLogger))
    }

    pub fn with_logger(logger: Arc<dyn Logger>) -> Self {
        Self {
            functions: HashMap::new(),
            versions: HashSet::new(),
            logger,
        }
    }

    /// 注册一组函数。
    ///
    /// # 教案级注释
    /// - **执行逻辑 (How)**
    ///   1. 跳过以 `_` 开头的非公开名字；
    ///   2. 剥离首位的实时请求参数，逐个校验参数与返回值的声明类型；
    ///   3. 检查与已注册条目、以及同批条目之间的身份冲突；
    ///   4. 全部通过后一次性合并。
    /// - **返回值 (What)**：按声明顺序返回新注册的身份；任何错误都使注册表保持调用前的状态。
    pub fn register(
        &mut self,
        collection: &dyn ApiCollection,
        version: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<FunctionKey>, RegistryError> {
        let mut batch: Vec<(FunctionKey, FunctionDescriptor)> = Vec::new();
        let mut seen = HashSet::new();

        for def in collection.functions() {
            if def.name().starts_with('_') {
                continue;
            }
            let key = FunctionKey::new(version, namespace, def.name());
            if self.functions.contains_key(&key) || !seen.insert(key.clone()) {
                return Err(RegistryError::DuplicateApiFunction {
                    version: key.version,
                    namespace: key.namespace,
                    name: key.name,
                });
            }
            let descriptor = FunctionDescriptor::build(key.clone(), def)?;
            batch.push((key, descriptor));
        }

        let mut registered = Vec::with_capacity(batch.len());
        for (key, descriptor) in batch {
            let fields = [
                KeyValue::new("rpc.function", key.to_string()),
                KeyValue::new("rpc.stream", descriptor.gives_stream),
            ];
            self.logger.debug_with_fields("registered api function", &fields);
            self.versions.insert(key.version.clone());
            self.functions.insert(key.clone(), Arc::new(descriptor));
            registered.push(key);
        }
        Ok(registered)
    }

    pub fn is_known_version(&self, version: &str) -> bool {
        self.versions.contains(version)
    }

    pub fn has_function(&self, version: &str, namespace: Option<&str>, name: &str) -> bool {
        self.functions
            .contains_key(&FunctionKey::new(version, namespace, name))
    }

    pub fn get_function(
        &self,
        version: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<Arc<FunctionDescriptor>> {
        self.functions
            .get(&FunctionKey::new(version, namespace, name))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// 已知版本，按字典序。
    pub fn versions(&self) -> Vec<&str> {
        let mut versions: Vec<_> = self.versions.iter().map(String::as_str).collect();
        versions.sort_unstable();
        versions
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<FunctionDescriptor>> {
        self.functions.values()
    }

    /// API 文档。
    ///
    /// - 同时给出版本与命名空间：返回该命名空间下的 `{name: info}`，未命中为 `UnknownVersionOrNamespace`；
    /// - 只给出版本：返回该版本下全部函数（带命名空间的以 `ns/name` 为键），未命中为 `UnknownVersion`；
    /// - 都不给：返回 `{version: {..}, namespace: {"version/ns": {..}}}`。
    pub fn doc(&self, version: Option<&str>, namespace: Option<&str>) -> Result<Value, RpcError> {
        let mut versions: BTreeMap<String, Map> = BTreeMap::new();
        let mut namespaces: BTreeMap<String, Map> = BTreeMap::new();
        for descriptor in self.functions.values() {
            let key = descriptor.key();
            let qualified = match &key.namespace {
                Some(ns) => format!("{ns}/{}", key.name),
                None => key.name.clone(),
            };
            versions
                .entry(key.version.clone())
                .or_default()
                .insert(qualified, descriptor.info());
            if let Some(ns) = &key.namespace {
                namespaces
                    .entry(format!("{}/{}", key.version, ns))
                    .or_default()
                    .insert(key.name.clone(), descriptor.info());
            }
        }

        match (version, normalize_namespace(namespace)) {
            (Some(version), Some(namespace)) => namespaces
                .remove(&format!("{version}/{namespace}"))
                .map(Value::Map)
                .ok_or_else(|| RpcError::UnknownVersionOrNamespace {
                    version: version.to_owned(),
                    namespace,
                }),
            (Some(version), None) => versions
                .remove(version)
                .map(Value::Map)
                .ok_or_else(|| RpcError::UnknownVersion(version.to_owned())),
            (None, _) => Ok(Value::from_iter([
                (
                    "version",
                    Value::Map(versions.into_iter().map(|(k, v)| (k, Value::Map(v))).collect()),
                ),
                (
                    "namespace",
                    Value::Map(namespaces.into_iter().map(|(k, v)| (k, Value::Map(v))).collect()),
                ),
            ])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{ApiFragment, producer_from_iter};

    fn echo(name: &str) -> FunctionDef {
        FunctionDef::unary(name, |call| call.arg::<Value>("x"))
            .param("x", "Any")
            .returns("Any")
    }

    #[test]
    fn private_names_are_skipped() {
        let mut registry = Registry::new();
        let keys = registry
            .register(
                &ApiFragment::new().function(echo("_hidden")).function(echo("shown")),
                "v1",
                None,
            )
            .expect("register");
        assert_eq!(keys.len(), 1);
        assert!(!registry.has_function("v1", None, "_hidden"));
    }

    #[test]
    fn failed_batches_leave_registry_untouched() {
        let mut registry = Registry::new();
        let bad = ApiFragment::new()
            .function(echo("ok"))
            .function(
                FunctionDef::unary("bad", |_| Ok(Value::Null))
                    .untyped_param("q")
                    .returns("None"),
            );
        let err = registry.register(&bad, "v1", None).expect_err("untyped parameter");
        assert!(matches!(
            err,
            RegistryError::TypeNotSpecified { ref argument, .. } if argument == "q"
        ));
        assert!(registry.is_empty());
        assert!(!registry.is_known_version("v1"));
    }

    #[test]
    fn missing_return_type_is_reported() {
        let mut registry = Registry::new();
        let def = FunctionDef::unary("f", |_| Ok(Value::Null));
        let err = registry.register(&vec![def], "v1", None).expect_err("no return type");
        assert_eq!(err.code(), 50007);
    }

    #[test]
    fn leading_request_param_is_extracted() {
        let mut registry = Registry::new();
        let def = echo("who").request_param("request");
        registry.register(&vec![def], "v1", None).expect("register");
        let descriptor = registry.get_function("v1", None, "who").expect("descriptor");
        assert_eq!(descriptor.request_param(), Some("request"));
        assert_eq!(descriptor.params().len(), 1);
    }

    #[test]
    fn stream_handlers_get_stream_return_types() {
        let mut registry = Registry::new();
        let def = FunctionDef::stream("count", |_| Ok(producer_from_iter(Vec::new())))
            .returns("int");
        registry.register(&vec![def], "v1", Some("nums")).expect("register");
        let descriptor = registry
            .get_function("v1", Some("nums"), "count")
            .expect("descriptor");
        assert!(descriptor.gives_stream());
        assert_eq!(descriptor.return_type().to_string(), "Stream[int]");
    }

    #[test]
    fn doc_lists_versions_and_namespaces() {
        let mut registry = Registry::new();
        registry.register(&vec![echo("a").doc("first")], "v1", None).expect("plain");
        registry.register(&vec![echo("b")], "v1", Some("ns")).expect("namespaced");

        let v1 = registry.doc(Some("v1"), None).expect("known version");
        assert!(v1.get("a").is_some());
        assert!(v1.get("ns/b").is_some());
        assert_eq!(
            v1.get("a").and_then(|a| a.get("doc")),
            Some(&Value::from("first"))
        );

        let ns = registry.doc(Some("v1"), Some("ns")).expect("known namespace");
        assert!(ns.get("b").is_some());

        assert_eq!(
            registry.doc(Some("v2"), None).map_err(|e| e.code()),
            Err(50005)
        );
        assert_eq!(
            registry.doc(Some("v1"), Some("zz")).map_err(|e| e.code()),
            Err(50008)
        );
    }
}
