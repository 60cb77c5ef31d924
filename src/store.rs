use anyhow::{bail, Context};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the results sheet inside a portal workspace directory.
pub const SHEET_FILE_NAME: &str = "school_results.csv";

/// Header written to a freshly initialized sheet, in display order.
pub const CANONICAL_COLUMNS: [&str; 11] = [
    "student id",
    "student name",
    "class",
    "maths",
    "english",
    "physics",
    "chemistry",
    "biology",
    "total",
    "average",
    "grade",
];

/// Legacy header spellings folded into their current names after trimming
/// and lowercasing.
const HEADER_RENAMES: [(&str, &str); 1] = [("student_id", "student id")];

/// The whole sheet held in memory: one header, column-homogeneous rows.
/// Every row has exactly `columns.len()` cells once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn empty_canonical() -> Table {
        Table {
            columns: CANONICAL_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn col_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

pub fn sheet_path(workspace: &Path) -> PathBuf {
    workspace.join(SHEET_FILE_NAME)
}

/// Reads the whole sheet into memory. A missing file is not an error: the
/// portal starts from an empty table with the canonical header. A present
/// but unreadable or unparseable file is.
pub fn load_table(path: &Path) -> anyhow::Result<Table> {
    if !path.exists() {
        return Ok(Table::empty_canonical());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read sheet {}", path.to_string_lossy()))?;
    parse_sheet(&text).with_context(|| format!("failed to parse sheet {}", path.to_string_lossy()))
}

/// Rewrites the whole sheet. The new content goes to a sibling temp file
/// first and is renamed over the old sheet only once fully written, so a
/// failed save never leaves a half-written sheet behind.
pub fn save_table(path: &Path, table: &Table) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
    }

    let tmp = saving_path(path);
    let mut out = File::create(&tmp)
        .with_context(|| format!("failed to create temp sheet {}", tmp.to_string_lossy()))?;
    out.write_all(render_sheet(table).as_bytes())
        .with_context(|| format!("failed to write temp sheet {}", tmp.to_string_lossy()))?;
    out.flush()
        .with_context(|| format!("failed to flush temp sheet {}", tmp.to_string_lossy()))?;
    drop(out);

    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move sheet into place at {}", path.to_string_lossy()))?;
    Ok(())
}

fn saving_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(SHEET_FILE_NAME);
    path.with_file_name(format!("{}.saving", name))
}

/// One header cell: interior non-breaking spaces become regular spaces,
/// then trim, lowercase, and the fixed rename table.
fn normalize_header(cell: &str) -> String {
    let cleaned = cell.replace('\u{a0}', " ");
    let name = cleaned.trim().to_ascii_lowercase();
    for (from, to) in HEADER_RENAMES {
        if name == from {
            return to.to_string();
        }
    }
    name
}

fn parse_sheet(text: &str) -> anyhow::Result<Table> {
    let mut records = split_records(text)?;
    if records.is_empty() {
        bail!("sheet has no header row");
    }
    let header = records.remove(0);
    let columns: Vec<String> = header.iter().map(|cell| normalize_header(cell)).collect();
    let width = columns.len();

    let mut rows: Vec<Vec<String>> = Vec::with_capacity(records.len());
    for (idx, mut record) in records.into_iter().enumerate() {
        if record.len() > width {
            // idx is 0-based over data records; the header is sheet row 1.
            bail!(
                "sheet row {} has {} fields but the header has {} columns",
                idx + 2,
                record.len(),
                width
            );
        }
        record.resize(width, String::new());
        rows.push(record);
    }
    Ok(Table { columns, rows })
}

/// Splits raw sheet text into records, honoring quoted fields across commas
/// and line breaks. Blank lines between records are skipped.
fn split_records(text: &str) -> anyhow::Result<Vec<Vec<String>>> {
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            fields.push(std::mem::take(&mut buf));
            i += 1;
            continue;
        }
        if (ch == '\n' || ch == '\r') && !in_quotes {
            if ch == '\r' && i + 1 < chars.len() && chars[i + 1] == '\n' {
                i += 1;
            }
            i += 1;
            if buf.is_empty() && fields.is_empty() {
                continue;
            }
            fields.push(std::mem::take(&mut buf));
            records.push(std::mem::take(&mut fields));
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    if in_quotes {
        bail!("unterminated quoted field at end of sheet");
    }
    if !buf.is_empty() || !fields.is_empty() {
        fields.push(buf);
        records.push(fields);
    }
    Ok(records)
}

fn render_sheet(table: &Table) -> String {
    let mut out = String::new();
    out.push_str(&csv_line(&table.columns));
    out.push('\n');
    for row in &table.rows {
        out.push_str(&csv_line(row));
        out.push('\n');
    }
    out
}

fn csv_line(cells: &[String]) -> String {
    cells
        .iter()
        .map(|c| csv_quote(c))
        .collect::<Vec<String>>()
        .join(",")
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
