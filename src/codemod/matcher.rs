//! Shape and position predicates over syntax nodes.
//!
//! Function-bodied and arrow-bodied forms are matched by one canonical
//! [`FunctionShape`] so every rewriter sees the same body, parameters and
//! async flag regardless of the surface syntax.

use std::collections::HashSet;

use tree_sitter::Node;

use crate::codemod::common::{
    binds_param, descendants, is_comment, is_function_scope, is_function_value, named_children,
    node_text, simple_param_name, statements,
};
use crate::codemod::config::MigrationOptions;

// ============ Function Shapes ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyForm {
    /// `{ ... }` statement block
    Block,
    /// Arrow with an expression body: `() => expr`
    Expression,
}

#[derive(Debug, Clone, Copy)]
pub struct FunctionShape<'a> {
    pub node: Node<'a>,
    pub is_async: bool,
    /// `formal_parameters` node, or the bare identifier of `x => ...`
    pub params: Option<Node<'a>>,
    pub body: Node<'a>,
    pub form: BodyForm,
}

impl<'a> FunctionShape<'a> {
    /// Match any function-like node (values, declarations, methods)
    pub fn of(node: Node<'a>) -> Option<Self> {
        if !is_function_scope(node) {
            return None;
        }
        let body = node.child_by_field_name("body")?;
        let params = node
            .child_by_field_name("parameters")
            .or_else(|| node.child_by_field_name("parameter"));
        let form = if body.kind() == "statement_block" {
            BodyForm::Block
        } else {
            BodyForm::Expression
        };
        let is_async = node.child(0).is_some_and(|c| c.kind() == "async");

        Some(Self {
            node,
            is_async,
            params,
            body,
            form,
        })
    }

    /// Match only function forms usable as a value: `function () {}` and arrows
    pub fn of_value(node: Node<'a>) -> Option<Self> {
        if is_function_value(node) {
            Self::of(node)
        } else {
            None
        }
    }

    /// Declared parameters, in order
    pub fn param_nodes(&self) -> Vec<Node<'a>> {
        match self.params {
            Some(params) if params.kind() == "formal_parameters" => named_children(params)
                .into_iter()
                .filter(|p| !is_comment(*p))
                .collect(),
            Some(single) => vec![single],
            None => Vec::new(),
        }
    }

    /// Parameter names, or `None` if any parameter is not a simple identifier
    pub fn simple_param_names(&self, source: &'a [u8]) -> Option<Vec<&'a str>> {
        self.param_nodes()
            .into_iter()
            .map(|p| simple_param_name(p, source))
            .collect()
    }

    /// Whether a parameter binds `name` (shadowing an outer binding)
    pub fn binds(&self, name: &str, source: &[u8]) -> bool {
        binds_param(self.node, name, source)
    }

    /// Top-level statements of the body; an expression body counts as one
    pub fn body_statements(&self) -> Vec<Node<'a>> {
        match self.form {
            BodyForm::Block => named_children(self.body),
            BodyForm::Expression => vec![self.body],
        }
    }
}

// ============ Position Predicates ============

/// True iff `node` is the only statement of its enclosing block, or is the
/// expression body of an arrow. Covers blocks of functions and arrows alike.
pub fn is_sole_statement(node: Node) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    match parent.kind() {
        "statement_block" => {
            let stmts = statements(parent);
            stmts.len() == 1 && stmts[0].id() == node.id()
        }
        "arrow_function" => parent
            .child_by_field_name("body")
            .is_some_and(|body| body.id() == node.id() && body.kind() != "statement_block"),
        _ => false,
    }
}

/// Whether `block` holds any comment among its direct children
pub fn has_comments(block: Node) -> bool {
    named_children(block).into_iter().any(is_comment)
}

// ============ Calls ============

/// Positional arguments of a call, comments excluded
pub fn call_arguments(call: Node) -> Vec<Node> {
    match call.child_by_field_name("arguments") {
        Some(args) if args.kind() == "arguments" => named_children(args)
            .into_iter()
            .filter(|a| !is_comment(*a))
            .collect(),
        _ => Vec::new(),
    }
}

/// Whether `callee` is `name` or `name.<accessor>`; returns whether the accessor form matched
pub fn match_callee(callee: Node, name: &str, accessor: &str, source: &[u8]) -> Option<bool> {
    match callee.kind() {
        "identifier" if node_text(callee, source) == name => Some(false),
        "member_expression" => {
            let object = callee.child_by_field_name("object")?;
            let property = callee.child_by_field_name("property")?;
            (object.kind() == "identifier"
                && node_text(object, source) == name
                && node_text(property, source) == accessor)
                .then_some(true)
        }
        _ => None,
    }
}

/// Registration call of the shape `<name>(label, fn)` or `<name>.<accessor>(label, fn)`
#[derive(Debug, Clone, Copy)]
pub struct RegistrationCall<'a> {
    pub call: Node<'a>,
    pub label: Node<'a>,
    pub body: FunctionShape<'a>,
    pub skipped: bool,
}

fn match_registration<'a>(
    call: Node<'a>,
    name: &str,
    accessor: &str,
    source: &[u8],
) -> Option<RegistrationCall<'a>> {
    if call.kind() != "call_expression" {
        return None;
    }
    let callee = call.child_by_field_name("function")?;
    let skipped = match_callee(callee, name, accessor, source)?;

    let args = call_arguments(call);
    if args.len() != 2 || is_function_value(args[0]) {
        return None;
    }
    let body = FunctionShape::of_value(args[1])?;

    Some(RegistrationCall {
        call,
        label: args[0],
        body,
        skipped,
    })
}

/// Match a suite call (`describe(label, fn)`, or its skip variant)
pub fn match_suite_call<'a>(
    call: Node<'a>,
    options: &MigrationOptions,
    source: &[u8],
) -> Option<RegistrationCall<'a>> {
    match_registration(call, &options.suite_func_name, &options.skip_accessor, source)
}

/// Match a test call (`it(label, fn)`, or `it.skip(label, fn)`) regardless of async-ness
pub fn match_test_call<'a>(
    call: Node<'a>,
    options: &MigrationOptions,
    source: &[u8],
) -> Option<RegistrationCall<'a>> {
    match_registration(call, &options.test_func_name, &options.skip_accessor, source)
}

/// Every test call nested anywhere inside a suite body, each reported once,
/// in document order
pub fn find_test_calls<'a>(
    root: Node<'a>,
    options: &MigrationOptions,
    source: &[u8],
) -> Vec<RegistrationCall<'a>> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    for node in descendants(root) {
        let Some(suite) = match_suite_call(node, options, source) else {
            continue;
        };
        for inner in descendants(suite.body.body) {
            let Some(test) = match_test_call(inner, options, source) else {
                continue;
            };
            if seen.insert(test.call.id()) {
                found.push(test);
            }
        }
    }

    found.sort_by_key(|t| t.call.start_byte());
    found
}
