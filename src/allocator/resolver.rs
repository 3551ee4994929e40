//! Operator resolution
//!
//! Maps opcode table entries to kernel registrations and builtin option
//! parsers. The coordinator only needs the lookup trait; interpreters
//! register the kernels they link. `BuiltinOpResolver` is the standard
//! implementation backed by hash maps.

use std::collections::HashMap;

use crate::error::ForgeResult;
use crate::model::format::BuiltinOperator;
use crate::model::options::{self, BuiltinData};

/// Parser turning an operator's serialized option blob into typed options.
pub type BuiltinParser = fn(&[u8]) -> ForgeResult<BuiltinData>;

/// A resolved kernel registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpRegistration {
    pub op: BuiltinOperator,
    /// Set for custom operators
    pub custom_name: Option<String>,
}

/// Lookup interface the coordinator uses during model allocation.
pub trait OpResolver {
    /// Registration for a builtin operator, if one was registered.
    fn find_op(&self, op: BuiltinOperator) -> Option<&OpRegistration>;

    /// Registration for a custom operator by name.
    fn find_custom_op(&self, name: &str) -> Option<&OpRegistration>;

    /// Option parser for a builtin operator.
    fn builtin_parser(&self, op: BuiltinOperator) -> Option<BuiltinParser>;
}

/// Hash-map backed resolver.
#[derive(Debug, Default)]
pub struct BuiltinOpResolver {
    ops: HashMap<BuiltinOperator, OpRegistration>,
    custom: HashMap<String, OpRegistration>,
    parsers: HashMap<BuiltinOperator, BuiltinParser>,
}

impl BuiltinOpResolver {
    /// Empty resolver; register operators explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver with every builtin operator this crate knows registered.
    pub fn with_all_builtins() -> Self {
        let mut resolver = Self::new();
        resolver.register_builtin(BuiltinOperator::Add, options::parse_add);
        resolver.register_builtin(BuiltinOperator::Conv2d, options::parse_conv2d);
        resolver.register_builtin(
            BuiltinOperator::FullyConnected,
            options::parse_fully_connected,
        );
        resolver.register_builtin(BuiltinOperator::Reshape, options::parse_reshape);
        resolver.register_builtin(BuiltinOperator::Softmax, options::parse_softmax);
        resolver
    }

    /// Register a builtin operator together with its option parser.
    pub fn register_builtin(&mut self, op: BuiltinOperator, parser: BuiltinParser) {
        self.ops.insert(
            op,
            OpRegistration {
                op,
                custom_name: None,
            },
        );
        self.parsers.insert(op, parser);
    }

    /// Register a custom operator by name.
    pub fn register_custom(&mut self, name: &str) {
        self.custom.insert(
            name.to_string(),
            OpRegistration {
                op: BuiltinOperator::Custom,
                custom_name: Some(name.to_string()),
            },
        );
    }
}

impl OpResolver for BuiltinOpResolver {
    fn find_op(&self, op: BuiltinOperator) -> Option<&OpRegistration> {
        self.ops.get(&op)
    }

    fn find_custom_op(&self, name: &str) -> Option<&OpRegistration> {
        self.custom.get(name)
    }

    fn builtin_parser(&self, op: BuiltinOperator) -> Option<BuiltinParser> {
        self.parsers.get(&op).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_resolver_finds_nothing() {
        let resolver = BuiltinOpResolver::new();
        assert!(resolver.find_op(BuiltinOperator::Add).is_none());
        assert!(resolver.find_custom_op("anything").is_none());
    }

    #[test]
    fn test_with_all_builtins() {
        let resolver = BuiltinOpResolver::with_all_builtins();
        for op in [
            BuiltinOperator::Add,
            BuiltinOperator::Conv2d,
            BuiltinOperator::FullyConnected,
            BuiltinOperator::Reshape,
            BuiltinOperator::Softmax,
        ] {
            assert!(resolver.find_op(op).is_some(), "{:?} not registered", op);
            assert!(resolver.builtin_parser(op).is_some());
        }
        assert!(resolver.find_op(BuiltinOperator::Custom).is_none());
    }

    #[test]
    fn test_custom_registration() {
        let mut resolver = BuiltinOpResolver::new();
        resolver.register_custom("my_dsp_op");

        let registration = resolver.find_custom_op("my_dsp_op").unwrap();
        assert_eq!(registration.op, BuiltinOperator::Custom);
        assert_eq!(registration.custom_name.as_deref(), Some("my_dsp_op"));
        assert!(resolver.find_custom_op("other").is_none());
    }

    #[test]
    fn test_parser_dispatch() {
        let resolver = BuiltinOpResolver::with_all_builtins();
        let parser = resolver.builtin_parser(BuiltinOperator::Softmax).unwrap();
        let parsed = parser(&[]).unwrap();
        assert!(matches!(parsed, BuiltinData::Softmax(_)));
    }
}
