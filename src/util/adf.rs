use serde_json::Value;

/// Reduce a Jira rich-text field to plain text.
///
/// REST v2 returns wiki markup as a plain string; v3 returns Atlassian
/// Document Format. Block nodes (paragraphs, headings, list items, ...) are
/// separated by newlines, inline text is concatenated as-is, `hardBreak`
/// becomes a newline. Returns `None` for null and for documents with no text.
pub fn plain_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => {
            let mut blocks = Vec::new();
            collect_blocks(other, &mut blocks);
            blocks.join("\n")
        }
    };
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn collect_blocks(node: &Value, blocks: &mut Vec<String>) {
    match node {
        Value::Array(children) => {
            for child in children {
                collect_blocks(child, blocks);
            }
        }
        Value::Object(obj) => {
            let kind = obj.get("type").and_then(Value::as_str).unwrap_or_default();
            let content = obj.get("content");
            let has_block_children = content
                .and_then(Value::as_array)
                .is_some_and(|children| children.iter().any(is_block));
            if kind == "doc" || has_block_children {
                if let Some(content) = content {
                    collect_blocks(content, blocks);
                }
            } else {
                let mut line = String::new();
                collect_inline(node, &mut line);
                if !line.is_empty() {
                    blocks.push(line);
                }
            }
        }
        _ => {}
    }
}

fn is_block(node: &Value) -> bool {
    !matches!(
        node.get("type").and_then(Value::as_str),
        Some("text" | "hardBreak" | "mention" | "emoji" | "inlineCard") | None
    )
}

fn collect_inline(node: &Value, out: &mut String) {
    match node {
        Value::Array(children) => {
            for child in children {
                collect_inline(child, out);
            }
        }
        Value::Object(obj) => match obj.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = obj.get("text").and_then(Value::as_str) {
                    out.push_str(text);
                }
            }
            Some("hardBreak") => out.push('\n'),
            Some("mention" | "emoji") => {
                if let Some(text) = obj
                    .get("attrs")
                    .and_then(|attrs| attrs.get("text"))
                    .and_then(Value::as_str)
                {
                    out.push_str(text);
                }
            }
            _ => {
                if let Some(content) = obj.get("content") {
                    collect_inline(content, out);
                }
            }
        },
        _ => {}
    }
}
