//! Markdown chunking driven by ATX header structure.
//!
//! The document is scanned line by line while an explicit stack of open
//! `(level, title)` headers tracks the current section. Chunk boundaries are
//! purely structural: every chunk belongs to exactly one header path, and the
//! ordered output is deterministic for identical input.

/// Identifier reserved for content appearing before the first header.
const PREAMBLE_ID: &str = "intro";

/// A contiguous, header-attributed span of the source document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Stable identifier derived from the header path (ordinal-suffixed on
    /// duplicates, assigned in document order).
    pub id: String,
    /// Ancestor header titles, outermost first. Empty for preamble content.
    pub header_path: Vec<String>,
    /// Body text of the section. For a leaf header with no body this is the
    /// header line itself, so the section still yields a retrievable record.
    pub text: String,
}

impl Chunk {
    /// Header path rendered for display (`A > B > C`).
    pub fn breadcrumb(&self) -> String {
        self.header_path.join(" > ")
    }
}

/// Splits `document` into an ordered sequence of header-bounded chunks.
///
/// Properties guaranteed to callers:
/// - deterministic for identical input, empty input yields no chunks;
/// - no body line is lost or duplicated across the sequence;
/// - ids depend only on the header path (plus document-order ordinals for
///   repeated paths), so unchanged sections keep their id across runs.
pub fn chunk_markdown(document: &str) -> Vec<Chunk> {
    let mut raw: Vec<(Vec<String>, String)> = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    // Most recently opened header that has produced no body yet.
    let mut pending_header: Option<(usize, String)> = None;

    let current_path =
        |stack: &[(usize, String)]| stack.iter().map(|(_, title)| title.clone()).collect();

    for line in document.lines() {
        let Some((level, title)) = parse_atx_header(line) else {
            buffer.push(line);
            continue;
        };

        let body = trim_blank_edges(&buffer);
        if !body.is_empty() {
            raw.push((current_path(&stack), body.join("\n")));
        } else if let Some((pending_level, header_line)) = pending_header.take() {
            // A header immediately followed by a deeper header is structural;
            // a leaf header with no body still yields its own chunk.
            if level <= pending_level {
                raw.push((current_path(&stack), header_line));
            }
        }
        buffer.clear();

        while stack.last().is_some_and(|(open, _)| *open >= level) {
            stack.pop();
        }
        stack.push((level, title));
        pending_header = Some((level, line.to_string()));
    }

    let body = trim_blank_edges(&buffer);
    if !body.is_empty() {
        raw.push((current_path(&stack), body.join("\n")));
    } else if let Some((_, header_line)) = pending_header {
        raw.push((current_path(&stack), header_line));
    }

    assign_ids(raw)
}

/// Parses an ATX header line (`#` through `######` followed by whitespace).
fn parse_atx_header(line: &str) -> Option<(usize, String)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with([' ', '\t']) {
        return None;
    }
    // Strip an optional ATX closing sequence (`## Title ##`).
    let title = rest.trim().trim_end_matches('#').trim_end();
    Some((level, title.to_string()))
}

fn trim_blank_edges<'a>(lines: &[&'a str]) -> Vec<&'a str> {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let Some(start) = start else {
        return Vec::new();
    };
    let end = lines.iter().rposition(|l| !l.trim().is_empty()).unwrap_or(start);
    lines[start..=end].to_vec()
}

fn assign_ids(raw: Vec<(Vec<String>, String)>) -> Vec<Chunk> {
    use std::collections::HashMap;

    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.into_iter()
        .map(|(header_path, text)| {
            let base = path_slug(&header_path);
            let ordinal = seen.entry(base.clone()).or_insert(0);
            *ordinal += 1;
            let id = if *ordinal == 1 {
                base
            } else {
                format!("{base}-{ordinal}")
            };
            Chunk {
                id,
                header_path,
                text,
            }
        })
        .collect()
}

/// Normalized join of a header path: lowercased titles with non-alphanumeric
/// runs folded to `-`, joined with `/`. The empty path maps to the preamble id.
fn path_slug(header_path: &[String]) -> String {
    if header_path.is_empty() {
        return PREAMBLE_ID.to_string();
    }
    header_path
        .iter()
        .map(|title| title_slug(title))
        .collect::<Vec<_>>()
        .join("/")
}

fn title_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}
