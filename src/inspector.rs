//! Text rendering of SWANK inspector payloads.
//!
//! The inspector describes an object as a property list:
//!
//! ```text
//! (:title "#<CONS {1004}>" :id 0
//!  :content (("Car" ": " (:value "1" 0) "\n"
//!             "Cdr" ": " (:value "NIL" 1) "\n")
//!            4 0 500))
//! ```
//!
//! The first element of `:content` is a flat stream of labels, separators,
//! newlines and `(:value text index)` / `(:action text index)` parts. It is
//! rendered one row per part, prefixed with the index the user can select.

use crate::sexpr::{plist_get, unquote, Node};

/// Footer line; selecting it pops back to the previous object.
pub const POP_MARKER: &str = "[<<]";

/// One rendered line of the inspector view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Row {
    description: String,
    separator: String,
    value: String,
    index: String,
}

/// Render an inspector property list.
///
/// Missing `:title` or `:content` render as empty.
pub fn format_inspector(payload: &[Node]) -> String {
    let title = plist_get(payload, ":title")
        .and_then(Node::text)
        .unwrap_or_default();

    let mut buf = format!("\n \nInspecting {}\n--------------------", title);

    let parts = plist_get(payload, ":content")
        .and_then(Node::as_list)
        .and_then(<[Node]>::first)
        .and_then(Node::as_list)
        .unwrap_or_default();

    for row in collect_rows(parts) {
        buf.push('\n');
        if !row.index.is_empty() {
            buf.push('[');
            buf.push_str(&row.index);
            buf.push_str("]  ");
        }
        buf.push_str(&row.description);
        buf.push_str(&row.separator);
        buf.push_str(&row.value);
    }

    buf.push_str("\n \n");
    buf.push_str(POP_MARKER);
    buf
}

fn collect_rows(parts: &[Node]) -> Vec<Row> {
    let mut rows = Vec::new();
    let mut description = String::new();
    let mut separator = String::new();

    for part in parts {
        match part {
            Node::List(items) => {
                rows.push(Row {
                    description: std::mem::take(&mut description),
                    separator: std::mem::take(&mut separator),
                    value: items.get(1).map(literal).unwrap_or_default(),
                    index: items.get(2).map(literal).unwrap_or_default(),
                });
            }
            Node::Atom(raw) => {
                let text = unquote(raw);
                if text == "\n" {
                    if !description.is_empty() {
                        rows.push(Row {
                            description: std::mem::take(&mut description),
                            separator: std::mem::take(&mut separator),
                            ..Row::default()
                        });
                    }
                    description.clear();
                    separator.clear();
                } else if text == ": " || text == " " {
                    separator = text;
                } else {
                    description = text;
                }
            }
        }
    }

    rows
}

fn literal(node: &Node) -> String {
    match node {
        Node::Atom(raw) => unquote(raw),
        Node::List(_) => node.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sexpr::parse;
    use pretty_assertions::assert_eq;

    fn render(text: &str) -> String {
        let parsed = parse(text).unwrap();
        format_inspector(parsed.node.as_list().unwrap())
    }

    #[test]
    fn test_format_cons_cell() {
        let text = "(:title \"#<CONS {1004}>\" :id 0 :content ((\"Car\" \": \" (:value \"1\" 0) \"\n\" \"Cdr\" \": \" (:value \"NIL\" 1) \"\n\") 4 0 500))";
        assert_eq!(
            render(text),
            "\n \nInspecting #<CONS {1004}>\n--------------------\n[0]  Car: 1\n[1]  Cdr: NIL\n \n[<<]"
        );
    }

    #[test]
    fn test_label_without_value_flushes_on_newline() {
        let text = "(:title \"x\" :content ((\"Slots:\" \"\n\" \"a\" \" \" (:action \"[reset]\" 3)) 0 0 0))";
        assert_eq!(
            render(text),
            "\n \nInspecting x\n--------------------\nSlots:\n[3]  a [reset]\n \n[<<]"
        );
    }

    #[test]
    fn test_value_without_index_omits_brackets() {
        let text = "(:title \"y\" :content (((:value \"7\")) 1 0 1))";
        assert_eq!(
            render(text),
            "\n \nInspecting y\n--------------------\n7\n \n[<<]"
        );
    }

    #[test]
    fn test_empty_newline_rows_are_skipped() {
        let text = "(:title \"z\" :content ((\"\n\" \"\n\" \"k\" \": \" (:value \"v\" 2)) 0 0 0))";
        assert_eq!(
            render(text),
            "\n \nInspecting z\n--------------------\n[2]  k: v\n \n[<<]"
        );
    }

    #[test]
    fn test_missing_content_renders_header_and_footer() {
        assert_eq!(
            render("(:title \"nothing\")"),
            "\n \nInspecting nothing\n--------------------\n \n[<<]"
        );
    }
}
