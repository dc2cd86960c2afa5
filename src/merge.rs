// file: merge.rs
//
// Merges the per-service response files into one table. All files share the
// prompt columns and differ by the response column(s) each service added.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use log::{info, warn};
use crate::error::MergeError;

/// Columns every prompt file is expected to carry.
pub const COMMON_COLUMNS: [&str; 6] = [
    "base_question_id",
    "category",
    "base_question",
    "assigned_persona",
    "prompt_type",
    "generated_prompt",
];

pub const MERGE_KEY: &str = "base_question_id";
pub const DEFAULT_OUTPUT_FILE: &str = "merged_csv_output.csv";
pub const DONE_SENTINEL: &str = "done";

/// A CSV file held in memory. Missing values are empty strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn read_csv(path: &Path) -> Result<Table, MergeError> {
        let read_error = |source: csv::Error| MergeError::Read {
            path: path.to_path_buf(),
            source,
        };
        let reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(read_error)?;
        Self::from_csv_reader(reader).map_err(read_error)
    }

    pub fn from_reader<R: io::Read>(reader: R) -> Result<Table, csv::Error> {
        Self::from_csv_reader(csv::ReaderBuilder::new().flexible(true).from_reader(reader))
    }

    fn from_csv_reader<R: io::Read>(mut reader: csv::Reader<R>) -> Result<Table, csv::Error> {
        let columns: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        if columns.iter().all(|c| c.trim().is_empty()) {
            return Err(csv::Error::from(io::Error::new(
                io::ErrorKind::InvalidData,
                "no columns to parse from file",
            )));
        }
        let mut rows = Vec::new();
        for record in reader.records() {
            let mut row: Vec<String> = record?.iter().map(String::from).collect();
            row.resize(columns.len(), String::new());
            rows.push(row);
        }
        Ok(Table { columns, rows })
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), MergeError> {
        let write_error = |source: csv::Error| MergeError::Write {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = csv::Writer::from_path(path).map_err(write_error)?;
        writer.write_record(&self.columns).map_err(write_error)?;
        for row in &self.rows {
            writer.write_record(row).map_err(write_error)?;
        }
        writer.flush().map_err(|e| write_error(csv::Error::from(e)))?;
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(|row| row[index].as_str()).collect())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// How a file's columns split against `COMMON_COLUMNS`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSplit {
    /// Expected common columns that are present, in `COMMON_COLUMNS` order.
    pub common_present: Vec<String>,
    /// Every other column, in file order.
    pub unique: Vec<String>,
}

pub fn analyze(table: &Table) -> ColumnSplit {
    let common_present = COMMON_COLUMNS
        .iter()
        .filter(|c| table.has_column(c))
        .map(|c| c.to_string())
        .collect();
    let unique = table
        .columns
        .iter()
        .filter(|c| !COMMON_COLUMNS.contains(&c.as_str()))
        .cloned()
        .collect();
    ColumnSplit { common_present, unique }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub table: Table,
    pub warnings: Vec<String>,
}

/// Merges labelled tables into the first one.
///
/// When both the merged table and the current file have `MERGE_KEY`, the file's
/// unique columns are left joined on it: unmatched rows get empty values and a
/// key repeated in the file repeats the matching rows. Otherwise the unique
/// columns are copied by position, and only when both tables have the same
/// number of rows; a copied column replaces one of the same name.
pub fn merge_tables(tables: Vec<(String, Table)>) -> MergeOutcome {
    let mut warnings = Vec::new();
    let mut note = |message: String| {
        warn!("{}", message);
        warnings.push(message);
    };

    let mut files = tables.into_iter();
    let mut base = match files.next() {
        Some((_, table)) => table,
        None => {
            return MergeOutcome {
                table: Table::default(),
                warnings: Vec::new(),
            }
        }
    };
    let join_on_key = base.has_column(MERGE_KEY);
    if !join_on_key {
        note(format!("'{}' not found. Using row index for merging.", MERGE_KEY));
    }

    for (offset, (label, current)) in files.enumerate() {
        let file_number = offset + 2;
        info!("Merging file {}: {}", file_number, label);

        let unique_cols = analyze(&current).unique;
        if unique_cols.is_empty() {
            note(format!("No unique columns found in {}", label));
            continue;
        }

        if join_on_key && current.has_column(MERGE_KEY) {
            base = left_join(&base, &current, &unique_cols, file_number);
        } else if current.row_count() == base.row_count() {
            for col in &unique_cols {
                let values = current.column(col).unwrap_or_default();
                match base.column_index(col) {
                    // same name: the later file's values replace the column
                    Some(index) => {
                        for (row, value) in base.rows.iter_mut().zip(values) {
                            row[index] = value.to_string();
                        }
                    }
                    None => {
                        base.columns.push(col.clone());
                        for (row, value) in base.rows.iter_mut().zip(values) {
                            row.push(value.to_string());
                        }
                    }
                }
            }
        } else {
            note(format!(
                "Row count mismatch for {} ({} rows, expected {}), skipping columns {:?}",
                label,
                current.row_count(),
                base.row_count(),
                unique_cols
            ));
        }
    }

    MergeOutcome { table: base, warnings }
}

fn left_join(base: &Table, current: &Table, unique_cols: &[String], file_number: usize) -> Table {
    let base_key = base.column_index(MERGE_KEY).unwrap_or_default();
    let current_key = current.column_index(MERGE_KEY).unwrap_or_default();
    let picked: Vec<usize> = unique_cols
        .iter()
        .filter_map(|col| current.column_index(col))
        .collect();

    let mut matches: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, row) in current.rows.iter().enumerate() {
        matches.entry(row[current_key].as_str()).or_default().push(index);
    }

    let mut columns = base.columns.clone();
    for col in unique_cols {
        let name = free_column_name(&columns, col, file_number);
        columns.push(name);
    }

    let mut rows = Vec::with_capacity(base.rows.len());
    for row in &base.rows {
        match matches.get(row[base_key].as_str()) {
            Some(found) => {
                for &index in found {
                    let mut joined = row.clone();
                    joined.extend(picked.iter().map(|&col| current.rows[index][col].clone()));
                    rows.push(joined);
                }
            }
            None => {
                let mut joined = row.clone();
                joined.resize(row.len() + picked.len(), String::new());
                rows.push(joined);
            }
        }
    }
    Table { columns, rows }
}

/// `name` if it is not taken yet, otherwise `name_<file_number>`.
fn free_column_name(columns: &[String], name: &str, file_number: usize) -> String {
    let taken = |candidate: &str| columns.iter().any(|c| c == candidate);
    if !taken(name) {
        return name.to_string();
    }
    let mut candidate = format!("{}_{}", name, file_number);
    let mut attempt = 2;
    while taken(&candidate) {
        candidate = format!("{}_{}_{}", name, file_number, attempt);
        attempt += 1;
    }
    candidate
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub files_merged: usize,
    pub rows: usize,
    pub columns: Vec<String>,
    pub warnings: Vec<String>,
    pub output: PathBuf,
}

/// Reads, merges and writes the given CSV files.
///
/// Files that cannot be read are skipped with a warning; at least one must be
/// readable.
pub fn merge_csv_files(csv_files: &[PathBuf], output_path: &Path) -> Result<MergeReport, MergeError> {
    if csv_files.len() < 2 {
        return Err(MergeError::NotEnoughFiles(csv_files.len()));
    }
    info!("Analyzing {} CSV files...", csv_files.len());

    let mut tables = Vec::new();
    let mut all_common: Vec<String> = Vec::new();
    let mut all_unique: Vec<String> = Vec::new();
    for (i, path) in csv_files.iter().enumerate() {
        let label = file_label(path);
        info!("Analyzing file {}: {}", i + 1, label);
        let table = match Table::read_csv(path) {
            Ok(table) => table,
            Err(e) => {
                warn!("Skipping {} due to errors: {}", path.display(), e);
                continue;
            }
        };
        let split = analyze(&table);
        info!("  - Rows: {}", table.row_count());
        info!("  - Common columns found: {}", split.common_present.len());
        info!("  - Unique columns: {:?}", split.unique);
        for col in split.common_present {
            if !all_common.contains(&col) {
                all_common.push(col);
            }
        }
        all_unique.extend(split.unique);
        tables.push((label, table));
    }

    if tables.is_empty() {
        return Err(MergeError::NoValidFiles);
    }
    all_common.sort();
    info!("Merging strategy:");
    info!("  - Total common columns across all files: {}", all_common.len());
    info!("  - Total unique columns: {}", all_unique.len());
    info!("  - Common columns: {:?}", all_common);
    info!("  - Unique columns: {:?}", all_unique);

    let files_merged = tables.len();
    let outcome = merge_tables(tables);
    outcome.table.write_csv(output_path)?;
    info!(
        "Final dataset shape: {} rows x {} columns",
        outcome.table.row_count(),
        outcome.table.columns.len()
    );

    Ok(MergeReport {
        files_merged,
        rows: outcome.table.row_count(),
        columns: outcome.table.columns,
        warnings: outcome.warnings,
        output: output_path.to_path_buf(),
    })
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Checks an input path: the file must exist and end in `.csv`.
pub fn validate_csv_path(file_path: &str) -> Result<PathBuf, MergeError> {
    let path = PathBuf::from(file_path);
    if !path.exists() {
        return Err(MergeError::FileNotFound(path));
    }
    if !file_path.to_lowercase().ends_with(".csv") {
        return Err(MergeError::NotCsv(path));
    }
    Ok(path)
}

/// Blank input selects the default file; `.csv` is appended when missing.
pub fn normalize_output_path(answer: &str) -> PathBuf {
    let answer = answer.trim();
    if answer.is_empty() {
        return PathBuf::from(DEFAULT_OUTPUT_FILE);
    }
    if answer.to_lowercase().ends_with(".csv") {
        PathBuf::from(answer)
    } else {
        PathBuf::from(format!("{}.csv", answer))
    }
}

fn read_answer<R: BufRead>(input: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Asks for input files until the user types `done`.
///
/// Returns None if the input ends before the list is complete.
pub fn collect_csv_paths<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> io::Result<Option<Vec<PathBuf>>> {
    let mut csv_files: Vec<PathBuf> = Vec::new();
    writeln!(out, "CSV File Merger Tool")?;
    writeln!(out, "{}", "=".repeat(50))?;
    writeln!(out, "Please enter the paths to your CSV files.")?;
    writeln!(out, "Press Enter after each file path.")?;
    writeln!(out, "Type '{}' when you've entered all files.\n", DONE_SENTINEL)?;

    loop {
        write!(out, "Enter CSV file path #{} (or '{}' to finish): ", csv_files.len() + 1, DONE_SENTINEL)?;
        out.flush()?;
        let answer = match read_answer(input)? {
            Some(answer) => answer,
            None => return Ok(None),
        };

        if answer.eq_ignore_ascii_case(DONE_SENTINEL) {
            if csv_files.len() < 2 {
                writeln!(out, "Error: {}. Please add more files.", MergeError::NotEnoughFiles(csv_files.len()))?;
                continue;
            }
            return Ok(Some(csv_files));
        }
        if answer.is_empty() {
            continue;
        }

        match validate_csv_path(&answer) {
            Ok(path) => {
                writeln!(out, "✓ Added: {}", path.display())?;
                csv_files.push(path);
            }
            Err(e) => writeln!(out, "Error: {}. Please check the path and try again.", e)?,
        }
    }
}

/// Asks for the output file, offering `DEFAULT_OUTPUT_FILE`.
pub fn prompt_output_path<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> io::Result<Option<PathBuf>> {
    write!(out, "\nEnter output file path (default: {}): ", DEFAULT_OUTPUT_FILE)?;
    out.flush()?;
    Ok(read_answer(input)?.map(|answer| normalize_output_path(&answer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn table(csv_text: &str) -> Table {
        Table::from_reader(csv_text.as_bytes()).unwrap()
    }

    fn labelled(tables: Vec<Table>) -> Vec<(String, Table)> {
        tables
            .into_iter()
            .enumerate()
            .map(|(i, t)| (format!("file{}.csv", i + 1), t))
            .collect()
    }

    #[test]
    fn unique_columns_exclude_the_common_set() {
        let split = analyze(&table("base_question_id,generated_prompt,claude_response,notes\n1,p,r,n\n"));
        assert_eq!(split.common_present, vec!["base_question_id", "generated_prompt"]);
        assert_eq!(split.unique, vec!["claude_response", "notes"]);
    }

    #[test]
    fn files_are_joined_on_the_question_id() {
        let a = table("base_question_id,base_question,u1\n1,x,a\n2,y,c\n");
        let b = table("base_question_id,u2\n2,d\n1,b\n");
        let outcome = merge_tables(labelled(vec![a, b]));

        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.table.columns, vec!["base_question_id", "base_question", "u1", "u2"]);
        assert_eq!(outcome.table.rows, vec![vec!["1", "x", "a", "b"], vec!["2", "y", "c", "d"]]);
    }

    #[test]
    fn unmatched_rows_keep_empty_values() {
        let a = table("base_question_id,u1\n1,a\n2,c\n");
        let b = table("base_question_id,u2\n1,b\n");
        let merged = merge_tables(labelled(vec![a, b])).table;
        assert_eq!(merged.rows[1], vec!["2", "c", ""]);
    }

    #[test]
    fn duplicate_keys_fan_out_base_rows() {
        let a = table("base_question_id,u1\n1,a\n2,c\n");
        let b = table("base_question_id,u2\n1,b1\n1,b2\n2,d\n");
        let merged = merge_tables(labelled(vec![a, b])).table;
        assert_eq!(
            merged.rows,
            vec![
                vec!["1", "a", "b1"],
                vec!["1", "a", "b2"],
                vec!["2", "c", "d"],
            ]
        );
    }

    #[test]
    fn files_without_key_are_appended_by_position() {
        let a = table("base_question_id,u1\n1,a\n2,c\n");
        let b = table("generated_prompt,u2\np,b\nq,d\n");
        let merged = merge_tables(labelled(vec![a, b])).table;
        assert_eq!(merged.columns, vec!["base_question_id", "u1", "u2"]);
        assert_eq!(merged.rows[1], vec!["2", "c", "d"]);
    }

    #[test]
    fn row_count_mismatch_skips_the_file_with_a_warning() {
        let a = table("base_question_id,u1\n1,a\n2,c\n");
        let b = table("generated_prompt,u2\np,b\n");
        let outcome = merge_tables(labelled(vec![a.clone(), b]));
        assert_eq!(outcome.table, a);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("Row count mismatch for file2.csv"));
    }

    #[test]
    fn base_without_key_merges_everything_by_position() {
        let a = table("generated_prompt,u1\np,a\n");
        let b = table("base_question_id,u2\n9,b\n");
        let outcome = merge_tables(labelled(vec![a, b]));
        assert_eq!(outcome.table.columns, vec!["generated_prompt", "u1", "u2"]);
        assert_eq!(outcome.table.rows, vec![vec!["p", "a", "b"]]);
        assert!(outcome.warnings[0].contains("Using row index"));
    }

    #[test]
    fn repeated_column_names_get_the_file_number() {
        let a = table("base_question_id,claude_response\n1,a\n");
        let b = table("base_question_id,claude_response\n1,b\n");
        let c = table("base_question_id,claude_response\n1,c\n");
        let merged = merge_tables(labelled(vec![a, b, c])).table;
        assert_eq!(
            merged.columns,
            vec!["base_question_id", "claude_response", "claude_response_2", "claude_response_3"]
        );
        assert_eq!(merged.rows, vec![vec!["1", "a", "b", "c"]]);
    }

    #[test]
    fn positional_copy_replaces_a_column_of_the_same_name() {
        let a = table("generated_prompt,claude_response\np,old\nq,older\n");
        let b = table("generated_prompt,claude_response,notes\np,new,n1\nq,newer,n2\n");
        let merged = merge_tables(labelled(vec![a, b])).table;
        assert_eq!(merged.columns, vec!["generated_prompt", "claude_response", "notes"]);
        assert_eq!(merged.rows, vec![vec!["p", "new", "n1"], vec!["q", "newer", "n2"]]);
    }

    #[test]
    fn file_without_columns_is_rejected() {
        assert!(Table::from_reader("".as_bytes()).is_err());
        assert!(Table::from_reader("\n\n".as_bytes()).is_err());
    }

    #[test]
    fn empty_file_is_skipped_and_the_rest_are_merged() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty.csv");
        let gemini = dir.path().join("gemini.csv");
        let openai = dir.path().join("openai.csv");
        let output = dir.path().join("merged.csv");
        std::fs::write(&empty, "").unwrap();
        std::fs::write(&gemini, "base_question_id,gemini_response\n1,g1\n2,g2\n").unwrap();
        std::fs::write(&openai, "base_question_id,openai_response\n2,o2\n1,o1\n").unwrap();

        let report = merge_csv_files(&[empty, gemini, openai], &output).unwrap();
        assert_eq!(report.files_merged, 2);
        assert_eq!(report.rows, 2);
        assert_eq!(report.columns, vec!["base_question_id", "gemini_response", "openai_response"]);
        assert!(report.warnings.is_empty());

        let written = Table::read_csv(&output).unwrap();
        assert_eq!(written.rows, vec![vec!["1", "g1", "o1"], vec!["2", "g2", "o2"]]);
    }

    #[test]
    fn file_without_unique_columns_is_skipped() {
        let a = table("base_question_id,u1\n1,a\n");
        let b = table("base_question_id,category\n1,x\n");
        let outcome = merge_tables(labelled(vec![a.clone(), b]));
        assert_eq!(outcome.table, a);
        assert!(outcome.warnings[0].contains("No unique columns"));
    }

    #[test]
    fn merge_writes_the_output_file() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("claude.csv");
        let second = dir.path().join("gemini.csv");
        let output = dir.path().join("merged.csv");
        std::fs::write(&first, "base_question_id,generated_prompt,claude_response\n1,\"x, y\",a\n").unwrap();
        std::fs::write(&second, "base_question_id,generated_prompt,gemini_response\n1,\"x, y\",b\n").unwrap();

        let report = merge_csv_files(&[first, second], &output).unwrap();
        assert_eq!(report.files_merged, 2);
        assert_eq!(report.rows, 1);
        assert_eq!(report.columns, vec!["base_question_id", "generated_prompt", "claude_response", "gemini_response"]);

        let written = Table::read_csv(&output).unwrap();
        assert_eq!(written.rows, vec![vec!["1", "x, y", "a", "b"]]);
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.csv");
        std::fs::write(&good, "base_question_id,u1\n1,a\n").unwrap();
        let output = dir.path().join("merged.csv");

        let report = merge_csv_files(&[good, dir.path().join("gone.csv")], &output).unwrap();
        assert_eq!(report.files_merged, 1);

        let result = merge_csv_files(&[dir.path().join("a.csv"), dir.path().join("b.csv")], &output);
        assert!(matches!(result, Err(MergeError::NoValidFiles)));
        assert!(matches!(merge_csv_files(&[output.clone()], &output), Err(MergeError::NotEnoughFiles(1))));
    }

    #[test]
    fn paths_must_exist_and_be_csv() {
        let dir = TempDir::new().unwrap();
        let text = dir.path().join("notes.txt");
        let upper = dir.path().join("DATA.CSV");
        std::fs::write(&text, "x").unwrap();
        std::fs::write(&upper, "x").unwrap();

        assert!(matches!(validate_csv_path(text.to_str().unwrap()), Err(MergeError::NotCsv(_))));
        assert!(matches!(
            validate_csv_path(dir.path().join("nope.csv").to_str().unwrap()),
            Err(MergeError::FileNotFound(_))
        ));
        assert_eq!(validate_csv_path(upper.to_str().unwrap()).unwrap(), upper);
    }

    #[test]
    fn output_path_defaults_and_gains_extension() {
        assert_eq!(normalize_output_path("  "), PathBuf::from(DEFAULT_OUTPUT_FILE));
        assert_eq!(normalize_output_path("merged"), PathBuf::from("merged.csv"));
        assert_eq!(normalize_output_path("out.CSV"), PathBuf::from("out.CSV"));
    }

    #[test]
    fn interactive_session_requires_two_files() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("a.csv");
        let second = dir.path().join("b.csv");
        std::fs::write(&first, "x\n").unwrap();
        std::fs::write(&second, "x\n").unwrap();

        let script = format!(
            "{}\nDONE\n\n{}\nmissing.csv\ndone\n",
            first.display(),
            second.display()
        );
        let mut input = Cursor::new(script.into_bytes());
        let mut out = Vec::new();
        let files = collect_csv_paths(&mut input, &mut out).unwrap().unwrap();
        assert_eq!(files, vec![first, second]);

        let transcript = String::from_utf8(out).unwrap();
        assert!(transcript.contains("at least 2 CSV files"));
        assert!(transcript.contains("does not exist"));
    }

    #[test]
    fn end_of_input_cancels_the_session() {
        let mut input = Cursor::new(b"".to_vec());
        let mut out = Vec::new();
        assert_eq!(collect_csv_paths(&mut input, &mut out).unwrap(), None);
        assert_eq!(prompt_output_path(&mut input, &mut out).unwrap(), None);

        let mut input = Cursor::new(b"\n".to_vec());
        assert_eq!(
            prompt_output_path(&mut input, &mut out).unwrap(),
            Some(PathBuf::from(DEFAULT_OUTPUT_FILE))
        );
    }
}
