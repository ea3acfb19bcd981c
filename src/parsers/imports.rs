//! Import extraction
//!
//! Rust use trees are expanded into one path per leaf and Python statements
//! are walked; every other language goes through a tree-sitter query.

use super::{node_text, Language, SourceFile};
use anyhow::{Context, Result};
use tree_sitter::{Node, Query, QueryCursor, StreamingIterator};

const GO_QUERY: &str = r#"
    (import_declaration
        (import_spec
            path: (interpreted_string_literal) @source
        )
    )
    (import_declaration
        (import_spec_list
            (import_spec
                path: (interpreted_string_literal) @source
            )
        )
    )
"#;

const ECMASCRIPT_QUERY: &str = r#"
    (import_statement source: (string) @source)
    (export_statement source: (string) @source)
    (call_expression
        function: (identifier) @function
        arguments: (arguments . (string) @source)
        (#eq? @function "require"))
"#;

const JAVA_QUERY: &str = r#"
    (import_declaration (scoped_identifier) @source)
    (import_declaration (identifier) @source)
"#;

const CSHARP_QUERY: &str = r#"
    (using_directive (identifier) @source)
    (using_directive (qualified_name) @source)
"#;

const INCLUDE_QUERY: &str = r#"
    (preproc_include path: (_) @source)
"#;

/// Imported modules of `file`, in order of first appearance
pub fn extract(file: &SourceFile<'_>) -> Result<Vec<String>> {
    let source = file.bytes();
    let mut found: Vec<(usize, String)> = Vec::new();
    match file.language {
        Language::Rust => walk_rust(file.root(), source, &mut found),
        Language::Python => walk_python(file.root(), source, &mut found),
        Language::Go => query_imports(file, GO_QUERY, &mut found)?,
        Language::JavaScript | Language::TypeScript | Language::Tsx => {
            query_imports(file, ECMASCRIPT_QUERY, &mut found)?
        }
        Language::Java => query_imports(file, JAVA_QUERY, &mut found)?,
        Language::CSharp => query_imports(file, CSHARP_QUERY, &mut found)?,
        Language::C | Language::Cpp => query_imports(file, INCLUDE_QUERY, &mut found)?,
    }

    found.sort_by_key(|(position, _)| *position);
    let mut imports: Vec<String> = Vec::with_capacity(found.len());
    for (_, name) in found {
        if !imports.contains(&name) {
            imports.push(name);
        }
    }
    Ok(imports)
}

/// Collect the `@source` captures of `query`, unquoted
fn query_imports(
    file: &SourceFile<'_>,
    query: &str,
    found: &mut Vec<(usize, String)>,
) -> Result<()> {
    let source = file.bytes();
    let query = Query::new(&file.language.grammar(), query)
        .with_context(|| format!("Failed to create {} import query", file.language.as_str()))?;

    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&query, file.root(), source);
    while let Some(m) = matches.next() {
        for capture in m.captures.iter() {
            if query.capture_names()[capture.index as usize] != "source" {
                continue;
            }
            let Some(text) = node_text(capture.node, source) else {
                continue;
            };
            let import = text
                .trim_start_matches(['"', '\'', '<', '`'])
                .trim_end_matches(['"', '\'', '>', '`'])
                .to_string();
            if !import.is_empty() {
                found.push((capture.node.start_byte(), import));
            }
        }
    }
    Ok(())
}

fn walk_rust(root: Node<'_>, source: &[u8], found: &mut Vec<(usize, String)>) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "use_declaration" => {
                if let Some(argument) = node.child_by_field_name("argument") {
                    let mut paths = Vec::new();
                    expand_use_tree(argument, "", source, &mut paths);
                    found.extend(
                        paths
                            .into_iter()
                            .filter(|path| !is_local_path(path))
                            .map(|path| (node.start_byte(), path)),
                    );
                }
            }
            "extern_crate_declaration" => {
                if let Some(name) = node
                    .child_by_field_name("name")
                    .and_then(|name| node_text(name, source))
                {
                    found.push((node.start_byte(), name));
                }
            }
            _ => {
                let mut cursor = node.walk();
                stack.extend(node.named_children(&mut cursor));
            }
        }
    }
}

fn is_local_path(path: &str) -> bool {
    let root = path.split("::").next().unwrap_or(path);
    matches!(root, "crate" | "self" | "super")
}

/// `std::{io::{self, Write}, fmt}` becomes `std::io`, `std::io::Write`, `std::fmt`
fn expand_use_tree(node: Node<'_>, prefix: &str, source: &[u8], paths: &mut Vec<String>) {
    let join = |tail: &str| {
        if prefix.is_empty() {
            tail.to_string()
        } else {
            format!("{}::{}", prefix, tail)
        }
    };
    match node.kind() {
        "use_as_clause" => {
            if let Some(path) = node.child_by_field_name("path") {
                expand_use_tree(path, prefix, source, paths);
            }
        }
        "scoped_use_list" => {
            let scope = node
                .child_by_field_name("path")
                .and_then(|path| node_text(path, source))
                .map(|path| join(&path))
                .unwrap_or_else(|| prefix.to_string());
            if let Some(list) = node.child_by_field_name("list") {
                expand_use_tree(list, &scope, source, paths);
            }
        }
        "use_list" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                expand_use_tree(child, prefix, source, paths);
            }
        }
        "self" if !prefix.is_empty() => paths.push(prefix.to_string()),
        _ => {
            if let Some(text) = node_text(node, source) {
                paths.push(join(&text));
            }
        }
    }
}

fn walk_python(root: Node<'_>, source: &[u8], found: &mut Vec<(usize, String)>) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "import_statement" => {
                let mut cursor = node.walk();
                for name in node.children_by_field_name("name", &mut cursor) {
                    // import module as alias
                    let module = if name.kind() == "aliased_import" {
                        name.child_by_field_name("name")
                    } else {
                        Some(name)
                    };
                    if let Some(text) = module.and_then(|m| node_text(m, source)) {
                        found.push((name.start_byte(), text));
                    }
                }
            }
            "import_from_statement" => {
                if let Some(module) = node
                    .child_by_field_name("module_name")
                    .and_then(|m| node_text(m, source))
                {
                    found.push((node.start_byte(), module));
                }
            }
            "future_import_statement" => {
                found.push((node.start_byte(), "__future__".to_string()));
            }
            _ => {
                let mut cursor = node.walk();
                stack.extend(node.named_children(&mut cursor));
            }
        }
    }
}
