//! 参数与返回值的类型词汇。
//!
//! 类型是一个封闭的标签枚举，注册时由 [`crate::schema::validate_type`] 递归校验。
//! 描述符构建器接受文本形式（`"int"`、`"List[str]"`、`"Dict[str, float]"`、`"Stream[dict]"` 等），
//! 由 [`TypeSpec::parse`] 转换；不认识的名字保留为 [`TypeSpec::Named`]，在校验阶段报
//! `UnsupportedType`，而不是在解析阶段静默丢弃。

use std::fmt;
use std::str::FromStr;

/// 标量类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Int,
    Float,
    Str,
    Bool,
    Bytes,
    None,
    /// 数值数组。
    Array,
}

impl Primitive {
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Int => "int",
            Primitive::Float => "float",
            Primitive::Str => "str",
            Primitive::Bool => "bool",
            Primitive::Bytes => "bytes",
            Primitive::None => "None",
            Primitive::Array => "ndarray",
        }
    }
}

/// 未参数化的容器。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    List,
    Tuple,
    Map,
}

impl ContainerKind {
    pub fn name(self) -> &'static str {
        match self {
            ContainerKind::List => "list",
            ContainerKind::Tuple => "tuple",
            ContainerKind::Map => "dict",
        }
    }
}

/// 声明类型。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeSpec {
    Primitive(Primitive),
    Container(ContainerKind),
    Exception,
    /// 实时请求对象标记，只能出现在首个参数。
    Request,
    Any,
    ListOf(Box<TypeSpec>),
    MapOf(Box<TypeSpec>, Box<TypeSpec>),
    TupleOf(Vec<TypeSpec>),
    UnionOf(Vec<TypeSpec>),
    /// 惰性序列标记：作为返回值表示逐项产出，作为参数表示从请求体逐项读取。
    Stream(Box<TypeSpec>),
    /// 词汇表之外的名字。
    Named(String),
}

impl TypeSpec {
    pub const INT: TypeSpec = TypeSpec::Primitive(Primitive::Int);
    pub const FLOAT: TypeSpec = TypeSpec::Primitive(Primitive::Float);
    pub const STR: TypeSpec = TypeSpec::Primitive(Primitive::Str);
    pub const BOOL: TypeSpec = TypeSpec::Primitive(Primitive::Bool);
    pub const NONE: TypeSpec = TypeSpec::Primitive(Primitive::None);

    pub fn list_of(item: TypeSpec) -> Self {
        TypeSpec::ListOf(Box::new(item))
    }

    pub fn map_of(key: TypeSpec, value: TypeSpec) -> Self {
        TypeSpec::MapOf(Box::new(key), Box::new(value))
    }

    pub fn stream_of(item: TypeSpec) -> Self {
        TypeSpec::Stream(Box::new(item))
    }

    /// 解析文本形式，无法识别时返回 [`TypeSpec::Named`]。
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let mut parser = Parser {
            input: trimmed.as_bytes(),
            pos: 0,
        };
        match parser.parse_type() {
            Some(spec) if parser.at_end() => spec,
            _ => TypeSpec::Named(trimmed.to_owned()),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, TypeSpec::Stream(_))
    }

    /// 该类型能否直接接收字符串值，查询串字面量策略据此决定是否保留原始文本。
    pub fn accepts_str(&self) -> bool {
        match self {
            TypeSpec::Primitive(Primitive::Str) | TypeSpec::Any => true,
            TypeSpec::UnionOf(members) => members.iter().any(TypeSpec::accepts_str),
            _ => false,
        }
    }
}

impl FromStr for TypeSpec {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TypeSpec::parse(s))
    }
}

impl From<&str> for TypeSpec {
    fn from(value: &str) -> Self {
        TypeSpec::parse(value)
    }
}

impl From<Primitive> for TypeSpec {
    fn from(value: Primitive) -> Self {
        TypeSpec::Primitive(value)
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpec::Primitive(p) => f.write_str(p.name()),
            TypeSpec::Container(c) => f.write_str(c.name()),
            TypeSpec::Exception => f.write_str("Exception"),
            TypeSpec::Request => f.write_str("Request"),
            TypeSpec::Any => f.write_str("Any"),
            TypeSpec::ListOf(item) => write!(f, "List[{item}]"),
            TypeSpec::MapOf(key, value) => write!(f, "Dict[{key}, {value}]"),
            TypeSpec::TupleOf(items) => write_generic(f, "Tuple", items),
            TypeSpec::UnionOf(items) => write_generic(f, "Union", items),
            TypeSpec::Stream(item) => write!(f, "Stream[{item}]"),
            TypeSpec::Named(name) => f.write_str(name),
        }
    }
}

fn write_generic(f: &mut fmt::Formatter<'_>, head: &str, items: &[TypeSpec]) -> fmt::Result {
    write!(f, "{head}[")?;
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str("]")
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.pos == self.input.len()
    }

    fn skip_ws(&mut self) {
        while self.input.get(self.pos).is_some_and(u8::is_ascii_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, byte: u8) -> bool {
        self.skip_ws();
        if self.input.get(self.pos) == Some(&byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Option<&str> {
        self.skip_ws();
        let start = self.pos;
        while self
            .input
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'.')
        {
            self.pos += 1;
        }
        std::str::from_utf8(&self.input[start..self.pos])
            .ok()
            .filter(|s| !s.is_empty())
    }

    fn args(&mut self) -> Option<Vec<TypeSpec>> {
        let mut args = Vec::new();
        if self.eat(b']') {
            return Some(args);
        }
        loop {
            args.push(self.parse_type()?);
            if self.eat(b',') {
                continue;
            }
            if self.eat(b']') {
                return Some(args);
            }
            return None;
        }
    }

    fn parse_type(&mut self) -> Option<TypeSpec> {
        let name = self.ident()?.to_owned();
        if !self.eat(b'[') {
            return Some(bare(&name));
        }
        let mut args = self.args()?;
        let spec = match (name.as_str(), args.len()) {
            ("List" | "list" | "Sequence", 1) => TypeSpec::ListOf(Box::new(args.remove(0))),
            ("Dict" | "dict" | "Mapping", 2) => {
                let value = args.remove(1);
                TypeSpec::MapOf(Box::new(args.remove(0)), Box::new(value))
            }
            ("Tuple" | "tuple", _) => TypeSpec::TupleOf(args),
            ("Union", _) => TypeSpec::UnionOf(args),
            ("Optional", 1) => TypeSpec::UnionOf(vec![args.remove(0), TypeSpec::NONE]),
            ("Stream" | "Generator" | "Iterator" | "Iterable", n) if n >= 1 => {
                TypeSpec::Stream(Box::new(args.remove(0)))
            }
            _ => return None,
        };
        Some(spec)
    }
}

fn bare(name: &str) -> TypeSpec {
    match name {
        "int" => TypeSpec::INT,
        "float" => TypeSpec::FLOAT,
        "str" => TypeSpec::STR,
        "bool" => TypeSpec::BOOL,
        "bytes" => TypeSpec::Primitive(Primitive::Bytes),
        "None" | "NoneType" => TypeSpec::NONE,
        "ndarray" | "numpy.ndarray" => TypeSpec::Primitive(Primitive::Array),
        "list" | "List" => TypeSpec::Container(ContainerKind::List),
        "tuple" | "Tuple" => TypeSpec::Container(ContainerKind::Tuple),
        "dict" | "Dict" => TypeSpec::Container(ContainerKind::Map),
        "Exception" => TypeSpec::Exception,
        "Request" => TypeSpec::Request,
        "Any" => TypeSpec::Any,
        "Stream" | "Generator" | "Iterator" | "Iterable" => {
            TypeSpec::Stream(Box::new(TypeSpec::Any))
        }
        other => TypeSpec::Named(other.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_generics() {
        let spec = TypeSpec::parse("Dict[str, List[Tuple[int, float]]]");
        assert_eq!(
            spec,
            TypeSpec::map_of(
                TypeSpec::STR,
                TypeSpec::list_of(TypeSpec::TupleOf(vec![TypeSpec::INT, TypeSpec::FLOAT]))
            )
        );
        assert_eq!(spec.to_string(), "Dict[str, List[Tuple[int, float]]]");
    }

    #[test]
    fn optional_becomes_union_with_none() {
        assert_eq!(
            TypeSpec::parse("Optional[int]"),
            TypeSpec::UnionOf(vec![TypeSpec::INT, TypeSpec::NONE])
        );
    }

    #[test]
    fn unknown_or_malformed_text_is_named() {
        assert_eq!(TypeSpec::parse("set"), TypeSpec::Named("set".into()));
        assert_eq!(
            TypeSpec::parse("List[int"),
            TypeSpec::Named("List[int".into())
        );
        assert_eq!(
            TypeSpec::parse("Dict[int]"),
            TypeSpec::Named("Dict[int]".into())
        );
    }

    #[test]
    fn string_acceptance_looks_through_unions() {
        assert!(TypeSpec::parse("Union[int, str]").accepts_str());
        assert!(TypeSpec::Any.accepts_str());
        assert!(!TypeSpec::parse("List[str]").accepts_str());
    }
}
