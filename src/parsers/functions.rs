//! Function and method spans
//!
//! Only outermost definitions are reported; a closure or nested function is
//! part of the function that contains it.

use super::{node_text, Language, SourceFile};
use tree_sitter::Node;

/// A named function with its 1-based, inclusive line range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpan {
    /// Grammar node kind, e.g. `function_item`
    pub kind: &'static str,
    pub name: String,
    pub line_start: usize,
    pub line_end: usize,
}

impl FunctionSpan {
    pub fn contains(&self, line: usize) -> bool {
        self.line_start <= line && line <= self.line_end
    }
}

fn function_kinds(language: Language) -> &'static [&'static str] {
    match language {
        Language::Rust => &["function_item"],
        Language::Python => &["function_definition"],
        Language::Go => &["function_declaration", "method_declaration"],
        Language::JavaScript | Language::TypeScript | Language::Tsx => &[
            "function_declaration",
            "generator_function_declaration",
            "method_definition",
        ],
        Language::Java => &["method_declaration", "constructor_declaration"],
        Language::CSharp => &[
            "method_declaration",
            "constructor_declaration",
            "local_function_statement",
        ],
        Language::C | Language::Cpp => &["function_definition"],
    }
}

/// `const f = () => {}` and `const f = function () {}`
fn is_function_binding(language: Language, node: Node<'_>) -> bool {
    matches!(
        language,
        Language::JavaScript | Language::TypeScript | Language::Tsx
    ) && node.kind() == "variable_declarator"
        && node
            .child_by_field_name("value")
            .is_some_and(|value| matches!(value.kind(), "arrow_function" | "function_expression"))
}

/// Name of a definition; C declarators nest it under `declarator` fields
fn function_name(node: Node<'_>, source: &[u8]) -> Option<String> {
    let mut current = node;
    loop {
        if let Some(name) = current.child_by_field_name("name") {
            return node_text(name, source);
        }
        match current.child_by_field_name("declarator") {
            Some(next) => current = next,
            None => break,
        }
    }
    if current.id() == node.id() {
        return None;
    }
    node_text(current, source)
}

pub fn extract(file: &SourceFile<'_>) -> Vec<FunctionSpan> {
    let source = file.bytes();
    let kinds = function_kinds(file.language);
    let mut spans = Vec::new();
    let mut stack = vec![file.root()];
    while let Some(node) = stack.pop() {
        if kinds.contains(&node.kind()) || is_function_binding(file.language, node) {
            if let Some(name) = function_name(node, source) {
                spans.push(FunctionSpan {
                    kind: node.kind(),
                    name,
                    line_start: node.start_position().row + 1,
                    line_end: node.end_position().row + 1,
                });
                continue;
            }
        }
        let mut cursor = node.walk();
        stack.extend(node.named_children(&mut cursor));
    }
    spans.sort_by_key(|span| span.line_start);
    spans
}
