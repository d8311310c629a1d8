//! Statement extraction from plain-text documents.
//!
//! A deterministic preprocessor: the same content always yields the same
//! ordered statements with text, position, and source line. Paragraphs
//! (blank-line separated) become one statement each; list items (`- `,
//! `* `, `1. `, `1) `) become one statement per item.

/// A statement produced by extraction, before storage assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedStatement {
    pub text: String,
    /// Zero-based ordinal within the document.
    pub position: i64,
    /// One-based line where the statement starts.
    pub line: i64,
}

/// Decompose document content into ordered statements.
pub fn extract_statements(content: &str) -> Vec<ExtractedStatement> {
    let mut statements = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut paragraph_line = 0i64;

    let flush =
        |paragraph: &mut Vec<&str>, line: i64, statements: &mut Vec<ExtractedStatement>| {
            if paragraph.is_empty() {
                return;
            }
            let text = paragraph.join(" ");
            paragraph.clear();
            if !text.is_empty() {
                statements.push(ExtractedStatement {
                    text,
                    position: statements.len() as i64,
                    line,
                });
            }
        };

    for (i, raw_line) in content.lines().enumerate() {
        let line_no = i as i64 + 1;
        let trimmed = raw_line.trim();

        if trimmed.is_empty() {
            flush(&mut paragraph, paragraph_line, &mut statements);
            continue;
        }

        if let Some(item) = strip_list_marker(trimmed) {
            // A list item closes the running paragraph and stands alone.
            flush(&mut paragraph, paragraph_line, &mut statements);
            if !item.is_empty() {
                statements.push(ExtractedStatement {
                    text: item.to_string(),
                    position: statements.len() as i64,
                    line: line_no,
                });
            }
            continue;
        }

        if paragraph.is_empty() {
            paragraph_line = line_no;
        }
        paragraph.push(trimmed);
    }

    flush(&mut paragraph, paragraph_line, &mut statements);
    statements
}

/// If the line is a list item, return its content without the marker.
fn strip_list_marker(line: &str) -> Option<&str> {
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }

    // Numbered items: "1. text" or "1) text"
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(rest.trim());
        }
    }

    None
}
