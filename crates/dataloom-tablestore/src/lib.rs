//! Parses tabular input into an in-memory columnar [`Dataset`], with
//! multi-sheet support and a merged-view projection for downstream
//! sandboxed analysis.

mod cell;
mod error;
mod table;

pub use cell::Cell;
pub use error::TableError;
pub use table::{parse_single_table, Table};

use indexmap::IndexMap;

const SHEET_HEADER_PREFIXES: [&str; 2] = ["Sheet: ", "表: "];

/// The name of the synthetic column added to a merged view identifying
/// which sheet a row originated from.
pub const SOURCE_SHEET_COLUMN: &str = "_source_sheet";

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub sheets: IndexMap<String, Table>,
    pub sheet_errors: IndexMap<String, TableError>,
}

impl Dataset {
    /// Parses `text` per the detection rules: multi-sheet headers first,
    /// then a single delimited table.
    pub fn parse(text: &str) -> Result<Dataset, TableError> {
        if text.trim().is_empty() {
            return Err(TableError::Empty);
        }

        if let Some(blocks) = split_sheet_blocks(text) {
            let mut sheets = IndexMap::new();
            let mut sheet_errors = IndexMap::new();
            for (name, block) in blocks {
                match parse_single_table(&block) {
                    Ok(table) => {
                        sheets.insert(name, table);
                    }
                    Err(e) => {
                        tracing::warn!(sheet = %name, error = %e, "sheet parse failed");
                        sheet_errors.insert(name, e);
                    }
                }
            }
            if sheets.is_empty() {
                return Err(TableError::Empty);
            }
            return Ok(Dataset { sheets, sheet_errors });
        }

        let table = parse_single_table(text)?;
        let mut sheets = IndexMap::new();
        sheets.insert("default".to_string(), table);
        Ok(Dataset { sheets, sheet_errors: IndexMap::new() })
    }

    /// Projects the dataset into a single [`Table`]. With one sheet this is
    /// that sheet verbatim; with multiple sheets, columns are prefixed
    /// `"<sheet>_<col>"` and a `_source_sheet` column is appended.
    pub fn merged_view(&self) -> Table {
        if self.sheets.len() <= 1 {
            return self
                .sheets
                .values()
                .next()
                .cloned()
                .unwrap_or_default();
        }

        let mut columns = Vec::new();
        for (sheet_name, table) in &self.sheets {
            for col in &table.columns {
                columns.push(format!("{sheet_name}_{col}"));
            }
        }
        columns.push(SOURCE_SHEET_COLUMN.to_string());

        let mut rows = Vec::new();
        for (sheet_name, table) in &self.sheets {
            let offset = self
                .sheets
                .keys()
                .take_while(|k| *k != sheet_name)
                .map(|k| self.sheets[k].columns.len())
                .sum::<usize>();
            for row in &table.rows {
                // Place this sheet's cells at its own column block, leave
                // other sheets' columns empty for this row.
                let mut full_row = vec![Cell::Empty; columns.len()];
                for (i, cell) in row.iter().enumerate() {
                    full_row[offset + i] = cell.clone();
                }
                full_row[columns.len() - 1] = Cell::Text(sheet_name.clone());
                rows.push(full_row);
            }
        }

        Table { columns, rows }
    }

    pub fn total_row_count(&self) -> usize {
        self.sheets.values().map(Table::row_count).sum()
    }
}

fn split_sheet_blocks(text: &str) -> Option<Vec<(String, String)>> {
    let has_header = text
        .lines()
        .any(|l| SHEET_HEADER_PREFIXES.iter().any(|p| l.trim_start().starts_with(p)));
    if !has_header {
        return None;
    }

    let mut blocks: Vec<(String, String)> = Vec::new();
    let mut current_name: Option<String> = None;
    let mut current_body = String::new();

    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(prefix) = SHEET_HEADER_PREFIXES.iter().find(|p| trimmed.starts_with(**p)) {
            if let Some(name) = current_name.take() {
                blocks.push((name, std::mem::take(&mut current_body)));
            }
            current_name = Some(trimmed[prefix.len()..].trim().to_string());
        } else if current_name.is_some() {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }
    if let Some(name) = current_name.take() {
        blocks.push((name, current_body));
    }
    Some(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sheet_merged_view_is_passthrough() {
        let ds = Dataset::parse("a|b\n1|2").unwrap();
        let merged = ds.merged_view();
        assert_eq!(merged.columns, vec!["a", "b"]);
    }

    #[test]
    fn disjoint_multi_sheet_row_count_sums() {
        let text = "Sheet: north\nregion|sales\nN|10\nSheet: south\nregion|sales\nS|20\n";
        let ds = Dataset::parse(text).unwrap();
        assert_eq!(ds.sheets.len(), 2);
        let merged = ds.merged_view();
        assert_eq!(merged.row_count(), ds.total_row_count());
        assert!(merged.columns.contains(&"north_region".to_string()));
        assert!(merged.columns.contains(&"south_region".to_string()));
        assert!(merged.columns.contains(&SOURCE_SHEET_COLUMN.to_string()));
    }

    #[test]
    fn overlapping_column_names_get_both_prefixes() {
        let text = "Sheet: a\nx\n1\nSheet: b\nx\n2\n";
        let ds = Dataset::parse(text).unwrap();
        let merged = ds.merged_view();
        assert!(merged.columns.contains(&"a_x".to_string()));
        assert!(merged.columns.contains(&"b_x".to_string()));
    }

    #[test]
    fn bad_sheet_does_not_abort_the_rest() {
        let text = "Sheet: ok\na|b\n1|2\nSheet: broken\njustoneword\n";
        let ds = Dataset::parse(text).unwrap();
        assert!(ds.sheets.contains_key("ok"));
        assert!(ds.sheet_errors.contains_key("broken"));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert_eq!(Dataset::parse("").unwrap_err(), TableError::Empty);
    }
}
