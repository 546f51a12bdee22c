//! `fmp-dump`: a thin demonstration front-end over `fmp-core`'s public
//! operations. It exists to exercise the event-sink contract -- `tables`,
//! `columns`, `dump` -- not to reproduce a SQL writer or a metadata cache.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use fmp_core::File;
use tracing_subscriber::EnvFilter;

/// Inspects and dumps FileMaker Pro (v3-v12) database files.
#[derive(Parser, Debug)]
#[command(name = "fmp-dump", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every table discovered in the file.
    Tables {
        /// Path to the .fmp/.fp3/.fp5/.fp7 file.
        path: PathBuf,
    },
    /// List the columns of one table.
    Columns {
        path: PathBuf,
        /// Table index, as reported by `tables`.
        table_index: u32,
    },
    /// Dump every row of every non-skipped table as newline-delimited JSON.
    Dump {
        path: PathBuf,
        /// Restrict the dump to a single table index.
        #[arg(long)]
        table: Option<u32>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("fmp-dump: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> fmp_base::Result<()> {
    match args.command {
        Command::Tables { path } => {
            let mut file = File::open(path)?;
            let tables = file.list_tables()?;
            for table in &tables {
                println!("{}\t{}", table.index, table.name);
            }
        }
        Command::Columns { path, table_index } => {
            let mut file = File::open(path)?;
            let columns = file.list_columns(table_index)?;
            for column in &columns {
                println!(
                    "{}\t{}\t{:?}\tcollation={}",
                    column.index, column.name, column.col_type, column.collation
                );
            }
        }
        Command::Dump { path, table } => {
            use std::io::Write;
            let mut file = File::open(path)?;
            let metadata = file.discover_all_metadata()?;
            let mut stdout = std::io::stdout().lock();
            match table {
                Some(table_index) => file.read_values(&metadata, table_index, |row, column, value| {
                    let line = serde_json::json!({
                        "table": table_index,
                        "row": row,
                        "column": column,
                        "value": value,
                    });
                    let _ = writeln!(stdout, "{line}");
                    fmp_core::ValueControl::Ok
                })?,
                None => file.read_all_values(&metadata, |t, row, column, value| {
                    let line = serde_json::json!({
                        "table": t,
                        "row": row,
                        "column": column,
                        "value": value,
                    });
                    let _ = writeln!(stdout, "{line}");
                    fmp_core::ValueControl::Ok
                })?,
            }
        }
    }
    Ok(())
}
