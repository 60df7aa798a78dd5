//! YAML / JSON query documents.
//!
//! The pipe and SQL grammars are parsed elsewhere; this loader lets a query
//! be written directly as its surface AST, one tagged node per operator.
//!
//! Example:
//! ```yaml
//! ops:
//!   - kind: From
//!     trunks:
//!       - source: { kind: Pool, name: { kind: Text, name: logs } }
//!   - kind: Where
//!     expr:
//!       kind: Binary
//!       op: ">"
//!       lhs: { kind: Id, name: ts }
//!       rhs: { kind: Primitive, type: time, text: "2024-01-01T00:00:00Z" }
//!   - kind: OpExpr
//!     expr: { kind: Call, name: count }
//! ```
//!
//! A bare list of operators is accepted as well.

use serde::{Deserialize, Serialize};

use lakeq_core::ast;
use lakeq_core::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Document {
    Pipeline { ops: ast::Seq },
    Ops(ast::Seq),
}

impl Document {
    fn into_seq(self) -> Result<ast::Seq> {
        let ops = match self {
            Document::Pipeline { ops } | Document::Ops(ops) => ops,
        };
        if ops.is_empty() {
            return Err(Error::Document("empty pipeline".into()));
        }
        Ok(ops)
    }
}

/// Parse a YAML query document.
pub fn parse_ast_yaml(src: &str) -> Result<ast::Seq> {
    let doc: Document =
        serde_yaml::from_str(src).map_err(|e| Error::Document(e.to_string()))?;
    doc.into_seq()
}

/// Parse a JSON query document.
pub fn parse_ast_json(src: &str) -> Result<ast::Seq> {
    let doc: Document =
        serde_json::from_str(src).map_err(|e| Error::Document(e.to_string()))?;
    doc.into_seq()
}

/// Parse by file extension: `.json` is JSON, anything else YAML.
pub fn parse_ast_file(path: &std::path::Path) -> Result<ast::Seq> {
    let src = std::fs::read_to_string(path)
        .map_err(|e| Error::adaptor(path.display().to_string(), e))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_ast_json(&src),
        _ => parse_ast_yaml(&src),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_and_bare_list_forms() {
        let doc = r#"
ops:
  - kind: Where
    expr: { kind: Binary, op: ">", lhs: { kind: Id, name: a }, rhs: { kind: Primitive, type: int64, text: "1" } }
  - kind: Head
"#;
        let seq = parse_ast_yaml(doc).unwrap();
        assert_eq!(seq.len(), 2);
        assert!(matches!(seq[1], ast::Op::Head { count: None }));

        let seq = parse_ast_json(r#"[{"kind": "Pass"}]"#).unwrap();
        assert_eq!(seq, vec![ast::Op::Pass]);
    }

    #[test]
    fn empty_and_malformed_documents_fail() {
        assert!(matches!(parse_ast_yaml("ops: []"), Err(Error::Document(_))));
        assert!(matches!(
            parse_ast_yaml("- kind: NoSuchOp"),
            Err(Error::Document(_))
        ));
    }
}
