//! 参数模式与递归类型校验。

use std::fmt;

use crate::error::RegistryError;
use crate::types::TypeSpec;
use crate::value::Value;

/// 单个参数的声明。
///
/// `type_spec` 为 `None` 表示调用方没有声明类型，注册时会以 `TypeNotSpecified` 拒绝。
#[derive(Clone, Debug, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub type_spec: Option<TypeSpec>,
    pub required: bool,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, type_spec: TypeSpec) -> Self {
        Self {
            name: name.into(),
            type_spec: Some(type_spec),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, type_spec: TypeSpec, default: Value) -> Self {
        Self {
            name: name.into(),
            type_spec: Some(type_spec),
            required: false,
            default: Some(default),
        }
    }

    /// 已声明的类型；校验通过的描述符上恒为 `Some`。
    pub fn declared(&self) -> Option<&TypeSpec> {
        self.type_spec.as_ref()
    }

    pub fn is_stream(&self) -> bool {
        self.type_spec.as_ref().is_some_and(TypeSpec::is_stream)
    }
}

/// 类型出现的位置，用于错误消息与位置约束。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Position {
    Param { index: usize, name: String },
    Return,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Param { name, .. } => write!(f, "parameter `{name}`"),
            Position::Return => f.write_str("return value"),
        }
    }
}

/// 递归校验声明类型是否在允许的词汇内。
///
/// # 契约说明（What）
/// - 词汇表外的名字（[`TypeSpec::Named`]）一律 `UnsupportedType`；
/// - 请求标记只允许作为首个参数的顶层类型；
/// - 流标记只允许出现在顶层（参数或返回值），不能嵌在容器里；
/// - `Union` 至少包含一个成员；泛型参数逐一递归校验。
pub fn validate_type(
    function: &str,
    position: &Position,
    spec: &TypeSpec,
) -> Result<(), RegistryError> {
    walk(function, position, spec, true)
}

fn walk(
    function: &str,
    position: &Position,
    spec: &TypeSpec,
    top_level: bool,
) -> Result<(), RegistryError> {
    let unsupported = |type_name: String| RegistryError::UnsupportedType {
        function: function.to_owned(),
        position: position.to_string(),
        type_name,
    };
    match spec {
        TypeSpec::Named(name) => Err(unsupported(name.clone())),
        TypeSpec::Request => {
            let leading = matches!(position, Position::Param { index: 0, .. });
            if top_level && leading {
                Ok(())
            } else {
                Err(unsupported(spec.to_string()))
            }
        }
        TypeSpec::Stream(item) => {
            if !top_level {
                return Err(unsupported(spec.to_string()));
            }
            walk(function, position, item, false)
        }
        TypeSpec::ListOf(item) => walk(function, position, item, false),
        TypeSpec::MapOf(key, value) => {
            walk(function, position, key, false)?;
            walk(function, position, value, false)
        }
        TypeSpec::TupleOf(items) => items
            .iter()
            .try_for_each(|item| walk(function, position, item, false)),
        TypeSpec::UnionOf(items) => {
            if items.is_empty() {
                return Err(unsupported(spec.to_string()));
            }
            items
                .iter()
                .try_for_each(|item| walk(function, position, item, false))
        }
        TypeSpec::Primitive(_) | TypeSpec::Container(_) | TypeSpec::Exception | TypeSpec::Any => {
            Ok(())
        }
    }
}
