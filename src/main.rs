//! graphload CLI - CSV utilities around the migration engine
//!
//! ```bash
//! graphload csvjoin source.csv --to target.csv --as merged.csv
//! graphload parse input.csv              # coerced rows as JSON
//! ```
//!
//! Migrations themselves are driven from code (the engine needs a
//! metamodel and shims); the CLI covers the standalone CSV tooling.

use clap::{Parser, Subcommand};
use graphload::{CsvJoiner, CsvSource};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "graphload")]
#[command(about = "CSV to object-graph migration toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sort-merge outer join of two CSV files on their common columns
    Csvjoin {
        /// Source CSV file
        source: PathBuf,

        /// Target CSV file (default: stdin)
        #[arg(long)]
        to: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(long = "as")]
        output: Option<PathBuf>,

        /// Comma-separated source columns to keep (default: all)
        #[arg(long)]
        fields: Option<String>,
    },

    /// Parse a CSV file and print the coerced rows as JSON
    Parse {
        /// Input CSV file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Csvjoin {
            source,
            to,
            output,
            fields,
        } => cmd_csvjoin(&source, to.as_deref(), output.as_deref(), fields.as_deref()),

        Commands::Parse { input, output } => cmd_parse(&input, output.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_csvjoin(
    source: &Path,
    to: Option<&Path>,
    output: Option<&Path>,
    fields: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let source_csv = CsvSource::open(source)?;
    let target_csv = match to {
        Some(path) => CsvSource::open(path)?,
        None => CsvSource::from_reader(BufReader::new(io::stdin()))?,
    };

    let mut joiner = CsvJoiner::new(source_csv, target_csv);
    if let Some(fields) = fields {
        let columns: Vec<String> = fields
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        joiner = joiner.source_columns(columns);
    }

    let out: Box<dyn io::Write> = match output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout()),
    };
    let written = joiner.run(out)?;
    eprintln!("Joined {written} records");
    Ok(())
}

fn cmd_parse(input: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Parsing: {}", input.display());

    let source = CsvSource::open(input)?;
    let mut rows = Vec::new();
    for row in source {
        let row = row?;
        rows.push(serde_json::to_value(&row.fields)?);
    }
    eprintln!("Parsed {} records", rows.len());

    let json = serde_json::to_string_pretty(&rows)?;
    match output {
        Some(path) => {
            fs::write(path, &json)?;
            eprintln!("Output written to: {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
