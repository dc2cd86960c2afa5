//! Interactive tool that merges CSV files sharing the prompt columns into one file.

use std::io::{self, Write};
use std::path::Path;
use batchprompt::merge::{collect_csv_paths, merge_csv_files, prompt_output_path};

fn main() {
    batchprompt::init_logging();
    match run() {
        Ok(true) => {}
        Ok(false) => println!("\n\nOperation cancelled by user."),
        Err(e) => {
            eprintln!("\nUnexpected error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns false when the user ended the input before the merge could start.
fn run() -> anyhow::Result<bool> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = io::stdout();

    let csv_files = match collect_csv_paths(&mut input, &mut out)? {
        Some(files) => files,
        None => return Ok(false),
    };

    writeln!(out, "\nYou've selected {} CSV files to merge:", csv_files.len())?;
    for (i, path) in csv_files.iter().enumerate() {
        let name = path.file_name().map(Path::new).unwrap_or(path.as_path());
        writeln!(out, "  {}. {}", i + 1, name.display())?;
    }

    let output_path = match prompt_output_path(&mut input, &mut out)? {
        Some(path) => path,
        None => return Ok(false),
    };

    match merge_csv_files(&csv_files, &output_path) {
        Ok(report) => {
            writeln!(out, "\n✓ Successfully merged {} files!", report.files_merged)?;
            writeln!(out, "✓ Output saved to: {}", report.output.display())?;
            writeln!(out, "✓ Final dataset shape: {} rows × {} columns", report.rows, report.columns.len())?;
            writeln!(out, "✓ Final columns: {:?}", report.columns)?;
            for warning in &report.warnings {
                writeln!(out, "  Warning: {}", warning)?;
            }
            writeln!(out, "\nMerge completed successfully!")?;
            writeln!(out, "Merged file location: {}", report.output.display())?;
        }
        Err(e) => {
            writeln!(out, "\nError: {}", e)?;
            writeln!(out, "\n❌ Merge failed. Please check the error messages above.")?;
        }
    }
    Ok(true)
}
