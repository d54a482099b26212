//! Plain text output in the style of the cf CLI

use std::io::{self, Write};

/// Column-aligned table with a header row
#[derive(Debug)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    column_widths: Vec<usize>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
        let column_widths = headers.iter().map(|h| h.chars().count()).collect();

        Self {
            headers,
            rows: Vec::new(),
            column_widths,
        }
    }

    /// Adds a row; cells past the last header are ignored
    pub fn add_row<S: AsRef<str>>(&mut self, row: &[S]) {
        let row: Vec<String> = row
            .iter()
            .take(self.headers.len())
            .map(|cell| cell.as_ref().to_string())
            .collect();

        for (i, cell) in row.iter().enumerate() {
            self.column_widths[i] = self.column_widths[i].max(cell.chars().count());
        }

        self.rows.push(row);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Renders header and rows, one line each, columns separated by three spaces
    pub fn render(&self) -> String {
        let mut output = self.render_row(&self.headers);
        output.push('\n');
        for row in &self.rows {
            output.push_str(&self.render_row(row));
            output.push('\n');
        }
        output
    }

    fn render_row(&self, row: &[String]) -> String {
        let last = self.column_widths.len().saturating_sub(1);
        let mut line = String::new();
        for (i, width) in self.column_widths.iter().enumerate() {
            let cell = row.get(i).map(String::as_str).unwrap_or("");
            if i == last {
                line.push_str(cell);
            } else {
                line.push_str(&format!("{:width$}   ", cell, width = width));
            }
        }
        line.trim_end().to_string()
    }
}

/// Progress and result reporting for commands
pub struct Reporter<W: Write> {
    out: W,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn say(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "{}", message)
    }

    pub fn ok(&mut self) -> io::Result<()> {
        writeln!(self.out, "OK")
    }

    pub fn table(&mut self, table: &Table) -> io::Result<()> {
        if table.is_empty() {
            return writeln!(self.out, "No data found");
        }
        write!(self.out, "{}", table.render())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
