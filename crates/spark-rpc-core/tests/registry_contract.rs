//! 注册表契约测试
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：锁定注册表对外承诺的三条性质：(version, namespace, name) 冲突必报
//!   `DuplicateAPIFunction`；不冲突的注册可以共存；类型词汇的文本形式可被稳定解析。
//! - **设计手法 (How)**：冲突矩阵用确定性用例覆盖；类型文本用 Proptest 随机生成合法的嵌套泛型，
//!   断言 `parse(display(t)) == t` 且校验通过。

use proptest::prelude::*;
use spark_rpc_core::{
    ApiFragment, FunctionDef, Position, Primitive, Registry, RegistryError, TypeSpec, Value,
    validate_type,
};

fn def(name: &str) -> FunctionDef {
    FunctionDef::unary(name, |_| Ok(Value::Null))
        .param_default("x", "int", 0)
        .returns("None")
}

#[test]
fn identical_identity_collides() {
    let mut registry = Registry::new();
    registry
        .register(&ApiFragment::new().function(def("add")), "v1", Some("math"))
        .expect("first registration");

    let err = registry
        .register(&ApiFragment::new().function(def("add")), "v1", Some("math"))
        .expect_err("same identity");
    assert_eq!(err.code(), 50001);
    assert!(matches!(err, RegistryError::DuplicateApiFunction { .. }));
}

#[test]
fn collisions_inside_one_batch_are_caught() {
    let mut registry = Registry::new();
    let batch = ApiFragment::new().function(def("add")).function(def("add"));
    assert!(registry.register(&batch, "v1", None).is_err());
    assert!(registry.is_empty());
}

#[test]
fn distinct_identities_coexist() {
    let mut registry = Registry::new();
    let fragment = ApiFragment::new().function(def("add"));
    registry.register(&fragment, "v1", None).expect("v1 root");
    registry.register(&fragment, "v2", None).expect("v2 root");
    registry.register(&fragment, "v1", Some("math")).expect("v1 math");
    registry.register(&fragment, "v1", Some("math/int")).expect("v1 math/int");

    assert_eq!(registry.len(), 4);
    assert!(registry.has_function("v1", None, "add"));
    assert!(registry.has_function("v2", None, "add"));
    assert!(registry.has_function("v1", Some("math"), "add"));
    assert!(registry.has_function("v1", Some("/math/int/"), "add"));
    assert!(!registry.has_function("v3", None, "add"));
    assert_eq!(registry.versions(), vec!["v1", "v2"]);
}

#[test]
fn unsupported_parameter_types_are_rejected() {
    let mut registry = Registry::new();
    let bad = FunctionDef::unary("f", |_| Ok(Value::Null))
        .param("items", "Set[int]")
        .returns("None");
    let err = registry.register(&vec![bad], "v1", None).expect_err("Set is not in the vocabulary");
    assert_eq!(err.code(), 50006);
}

fn leaf() -> impl Strategy<Value = TypeSpec> {
    prop_oneof![
        Just(TypeSpec::INT),
        Just(TypeSpec::FLOAT),
        Just(TypeSpec::STR),
        Just(TypeSpec::BOOL),
        Just(TypeSpec::NONE),
        Just(TypeSpec::Primitive(Primitive::Bytes)),
        Just(TypeSpec::Primitive(Primitive::Array)),
        Just(TypeSpec::Any),
        Just(TypeSpec::Exception),
    ]
}

fn nested() -> impl Strategy<Value = TypeSpec> {
    leaf().prop_recursive(4, 24, 4, |inner| {
        prop_oneof![
            inner.clone().prop_map(TypeSpec::list_of),
            (inner.clone(), inner.clone()).prop_map(|(k, v)| TypeSpec::map_of(k, v)),
            prop::collection::vec(inner.clone(), 0..4).prop_map(TypeSpec::TupleOf),
            prop::collection::vec(inner, 1..4).prop_map(TypeSpec::UnionOf),
        ]
    })
}

proptest! {
    #[test]
    fn type_text_round_trips(spec in nested()) {
        let text = spec.to_string();
        prop_assert_eq!(TypeSpec::parse(&text), spec.clone());
        prop_assert!(validate_type("f", &Position::Return, &spec).is_ok());
    }
}
