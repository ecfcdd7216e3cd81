//! Atlassian Document Format helpers.
//!
//! Descriptions and comment bodies arrive as ADF trees. The agent only needs
//! their text, so conversion is a depth-first walk that concatenates `text`
//! nodes and ends every block node with a newline.

use serde_json::{Value, json};

/// Node types that terminate with a newline.
const BLOCK_NODES: &[&str] = &[
    "paragraph",
    "heading",
    "blockquote",
    "codeBlock",
    "listItem",
    "rule",
    "panel",
    "tableRow",
    "mediaSingle",
    "taskItem",
    "decisionItem",
];

/// Render an ADF document (or a plain string) as plain text.
pub fn to_plain_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        node => {
            let mut out = String::new();
            push_node(node, &mut out);
            out.trim_end_matches('\n').to_string()
        }
    }
}

fn push_node(node: &Value, out: &mut String) {
    if let Value::Array(items) = node {
        for item in items {
            push_node(item, out);
        }
        return;
    }

    let node_type = node.get("type").and_then(Value::as_str).unwrap_or_default();

    match node_type {
        "hardBreak" => out.push('\n'),
        "mention" | "emoji" | "status" => {
            let label = node
                .pointer("/attrs/text")
                .and_then(Value::as_str)
                .unwrap_or_default();
            out.push_str(label);
        }
        _ => {}
    }

    if let Some(text) = node.get("text").and_then(Value::as_str) {
        out.push_str(text);
    }
    if let Some(content) = node.get("content") {
        push_node(content, out);
    }
    if BLOCK_NODES.contains(&node_type) {
        out.push('\n');
    }
}

/// Wrap plain text in a minimal ADF document, one paragraph per line.
pub fn text_document(text: &str) -> Value {
    let paragraphs: Vec<Value> = text
        .lines()
        .map(|line| {
            if line.is_empty() {
                json!({ "type": "paragraph", "content": [] })
            } else {
                json!({
                    "type": "paragraph",
                    "content": [{ "type": "text", "text": line }]
                })
            }
        })
        .collect();

    json!({ "type": "doc", "version": 1, "content": paragraphs })
}
