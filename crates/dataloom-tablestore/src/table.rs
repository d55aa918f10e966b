use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::error::TableError;

/// A single parsed sheet: a list of trimmed column names plus rows of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column_values(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }
}

const DELIMITERS: [char; 3] = ['|', '\t', ','];

/// Tries pipe, then tab, then comma; picks the first that yields at least
/// two columns on the first non-empty line.
pub fn parse_single_table(text: &str) -> Result<Table, TableError> {
    let first_line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or(TableError::Empty)?;

    let delimiter = DELIMITERS
        .iter()
        .copied()
        .find(|d| first_line.split(*d).count() >= 2)
        .ok_or(TableError::NoDelimiterDetected)?;

    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let header = lines.next().ok_or(TableError::Empty)?;
    let columns: Vec<String> = header.split(delimiter).map(|c| c.trim().to_string()).collect();

    let mut rows = Vec::new();
    for line in lines {
        let cells: Vec<Cell> = line.split(delimiter).map(Cell::parse).collect();
        let mut cells = cells;
        cells.resize(columns.len(), Cell::Empty);
        rows.push(cells);
    }

    Ok(Table { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_pipe_over_comma() {
        let t = parse_single_table("date|sales\n2023-01|100\n2023-02|200").unwrap();
        assert_eq!(t.columns, vec!["date", "sales"]);
        assert_eq!(t.row_count(), 2);
        assert_eq!(t.column_values("sales").unwrap()[0].as_f64(), Some(100.0));
    }

    #[test]
    fn falls_back_to_comma() {
        let t = parse_single_table("a,b\n1,2").unwrap();
        assert_eq!(t.columns, vec!["a", "b"]);
    }

    #[test]
    fn rejects_single_column_input() {
        let err = parse_single_table("justoneword\nanother").unwrap_err();
        assert_eq!(err, TableError::NoDelimiterDetected);
    }

    #[test]
    fn trims_column_names() {
        let t = parse_single_table(" a | b \n 1 | 2 ").unwrap();
        assert_eq!(t.columns, vec!["a", "b"]);
    }
}
