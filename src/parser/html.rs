use std::sync::LazyLock;

use scraper::{ElementRef, Html, Node, Selector};

static TABLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());

const BLOCK_TAGS: &[&str] = &["p", "div", "li", "tr", "table"];
const SKIP_TAGS: &[&str] = &["script", "style"];

/// One physically present grid cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub text: String,
    pub span: u32,
}

impl Cell {
    pub fn new(text: impl Into<String>, span: u32) -> Self {
        Cell {
            text: text.into(),
            span: span.max(1),
        }
    }

    /// Starts a booking of its own, or carries the multi-line booking layout.
    pub fn is_substantial(&self) -> bool {
        self.span > 1 || (!self.text.is_empty() && self.text.matches('\n').count() >= 2)
    }
}

/// A top-level table flattened into text, rows and the optional features block.
#[derive(Debug, Clone, Default)]
pub struct TableNode {
    pub text: String,
    pub rows: Vec<Vec<Cell>>,
    pub features: Option<String>,
}

impl TableNode {
    pub fn row_texts(&self) -> impl Iterator<Item = String> + '_ {
        self.rows.iter().map(|cells| {
            cells
                .iter()
                .map(|c| c.text.as_str())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
    }
}

/// Parse a saved timetable page into its top-level tables, in document order.
pub fn parse_document(html: &str) -> Vec<TableNode> {
    let doc = Html::parse_document(html);
    doc.select(&TABLE_SEL)
        .filter(|t| !is_nested(*t))
        .map(table_node)
        .collect()
}

fn is_nested(table: ElementRef<'_>) -> bool {
    table
        .ancestors()
        .any(|a| matches!(a.value(), Node::Element(e) if e.name() == "table"))
}

fn table_node(table: ElementRef<'_>) -> TableNode {
    let rows = own_rows(table)
        .into_iter()
        .map(|row| own_cells(row).into_iter().map(cell).collect())
        .collect();

    // Features sit in the last cell of the first row of the first nested table.
    let features = table
        .select(&TABLE_SEL)
        .next()
        .and_then(|inner| own_rows(inner).into_iter().next())
        .and_then(|row| own_cells(row).into_iter().last())
        .map(element_text);

    TableNode {
        text: element_text(table),
        rows,
        features,
    }
}

fn own_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|e| e.value().name() == "tr"),
            ),
            _ => {}
        }
    }
    rows
}

fn own_cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|e| matches!(e.value().name(), "td" | "th"))
        .collect()
}

fn cell(td: ElementRef<'_>) -> Cell {
    let span = td
        .value()
        .attr("rowspan")
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(1);
    Cell::new(element_text(td), span)
}

/// Rendered text of an element: `<br>` and block boundaries become line breaks,
/// whitespace inside a line collapses, outer blank lines are dropped.
pub fn element_text(el: ElementRef<'_>) -> String {
    let mut raw = String::new();
    push_text(el, &mut raw);
    normalize_lines(&raw)
}

fn push_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(t) => out.extend(t.chars().map(|c| if c.is_whitespace() { ' ' } else { c })),
            Node::Element(e) => {
                let name = e.name();
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                if SKIP_TAGS.contains(&name) {
                    continue;
                }
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                let block = BLOCK_TAGS.contains(&name);
                if block {
                    break_line(out);
                } else if matches!(name, "td" | "th") {
                    out.push(' ');
                }
                push_text(child_el, out);
                if block {
                    break_line(out);
                }
            }
            _ => {}
        }
    }
}

fn break_line(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn normalize_lines(raw: &str) -> String {
    let lines: Vec<String> = raw
        .split('\n')
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    let first = lines.iter().position(|l| !l.is_empty());
    let last = lines.iter().rposition(|l| !l.is_empty());
    match (first, last) {
        (Some(a), Some(b)) => lines[a..=b].join("\n"),
        _ => String::new(),
    }
}
