use crate::engine::Engine;
use crate::index::{delim_to_index_form, IndexEntry, TableIndex, DEFAULT_INDEX_MAX_SIZE};
use crate::record::{Encoding, Policy};
use crate::warnings::WarningBus;
use anyhow::{bail, Context};
use clap::{Parser, ValueHint};
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

const AFTER_HELP: &str = "\x1b[1mExamples:\x1b[0m
  Filter a TSV file:
    tabql --query 'select a1, a3 where int(a2) > 100' --input table.tsv --output out.tsv

  Query a CSV file from stdin, emit TSV:
    cat table.csv | tabql --delim , --query 'select distinct a2' --out-format tsv

  Join against another table:
    tabql --query 'select NR, * inner join /data/rhs.tsv on a2 == b1' --input lhs.tsv

  In-place style column rewrite:
    tabql --query 'update a2 = a2.upper() where a1 != \"\"' --input table.tsv

\x1b[1mMore info:\x1b[0m
  Column references are 1-based: a1..aN for the input table, b1..bN for the
  joined table. NR is the record number, NF the field count, NU the output
  record number.";

// Help heading constants for consistency
const INPUT_OUTPUT: &str = "Input/Output";
const FORMAT: &str = "Format";
const BEHAVIOR: &str = "Behavior";

#[derive(Parser)]
#[command(name = "tabql")]
#[command(version)]
#[command(about = "Run SQL-like queries over delimited text tables (CSV/TSV)")]
#[command(after_help = AFTER_HELP)]
#[command(max_term_width = 100)]
pub struct Cli {
    /// Query to execute, e.g. 'select a1, a2 where int(a1) > 5'
    #[arg(short, long)]
    pub query: String,

    /// Input table (stdin when omitted); .gz files are decompressed
    #[arg(short, long, value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
    pub input: Option<PathBuf>,

    /// Output file (stdout when omitted)
    #[arg(short, long, value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
    pub output: Option<PathBuf>,

    /// Input field delimiter; use TAB for tab
    #[arg(long, default_value = "TAB", help_heading = FORMAT)]
    pub delim: String,

    /// Input policy: simple, quoted, whitespace, monocolumn
    /// (default: quoted for "," and ";", simple otherwise)
    #[arg(long, help_heading = FORMAT)]
    pub policy: Option<String>,

    /// Table encoding: utf-8 or latin-1
    #[arg(long, default_value = "utf-8", help_heading = FORMAT)]
    pub encoding: String,

    /// Output field delimiter (default: same as --delim)
    #[arg(long, help_heading = FORMAT)]
    pub out_delim: Option<String>,

    /// Output policy (default: same as --policy)
    #[arg(long, help_heading = FORMAT)]
    pub out_policy: Option<String>,

    /// Output format preset: csv (`,` quoted), tsv (TAB simple) or input
    #[arg(long, conflicts_with_all = ["out_delim", "out_policy"], help_heading = FORMAT)]
    pub out_format: Option<String>,

    /// Error report format: text or json (json prints a machine-readable
    /// document on stderr)
    #[arg(long, default_value = "text", help_heading = BEHAVIOR)]
    pub error_format: String,

    /// File with user function definitions, one `name(arg) = expr` per line
    #[arg(long, value_hint = ValueHint::FilePath, help_heading = BEHAVIOR)]
    pub init_source_file: Option<PathBuf>,

    /// Recent-tables index file (default: ~/.tabql_index)
    #[arg(long, value_hint = ValueHint::FilePath, help_heading = BEHAVIOR)]
    pub index_file: Option<PathBuf>,
}

#[derive(Serialize)]
struct ErrorReport {
    error: String,
}

#[derive(Serialize)]
struct WarningReport<'a> {
    warnings: Vec<&'a str>,
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let json_errors = match cli.error_format.as_str() {
        "json" => true,
        "text" => false,
        other => bail!("Unknown error format: {}. Valid options: text, json", other),
    };

    match execute(&cli) {
        Ok(bus) => {
            if bus.has_warnings() {
                if json_errors {
                    let report = WarningReport {
                        warnings: bus.kinds(),
                    };
                    eprintln!("{}", serde_json::to_string(&report)?);
                } else {
                    for warning in bus.entries() {
                        eprintln!("Warning: {}", warning.kind);
                    }
                }
            }
            remember_input_table(&cli);
            Ok(())
        }
        Err(e) => {
            if json_errors {
                let report = ErrorReport {
                    error: format!("{:#}", e),
                };
                eprintln!("{}", serde_json::to_string(&report)?);
                std::process::exit(1);
            }
            Err(e)
        }
    }
}

fn execute(cli: &Cli) -> anyhow::Result<WarningBus> {
    let delim = parse_delim(&cli.delim)?;
    let policy = match &cli.policy {
        Some(p) => p.parse::<Policy>().map_err(anyhow::Error::msg)?,
        None => default_policy(delim),
    };
    let encoding = cli
        .encoding
        .parse::<Encoding>()
        .map_err(anyhow::Error::msg)?;
    let (out_delim, out_policy) = resolve_output_format(cli, delim, policy)?;

    let mut engine = Engine::new(delim, policy)
        .with_output_format(out_delim, out_policy)
        .with_encoding(encoding);

    if let Some(init_path) = &cli.init_source_file {
        let source = std::fs::read_to_string(init_path)
            .with_context(|| format!("Unable to read init source {}", init_path.display()))?;
        engine = engine.with_init_source(source);
    }
    if let Some(index_path) = index_path(cli) {
        engine = engine.with_index_file(index_path);
    }

    let mut input = open_input(cli)?;
    let mut output = open_output(cli)?;
    engine.run(&cli.query, &mut input, &mut output)
}

fn parse_delim(raw: &str) -> anyhow::Result<char> {
    if raw == "TAB" {
        return Ok('\t');
    }
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => bail!("Delimiter must be a single character (or TAB): {:?}", raw),
    }
}

/// Comma and semicolon tables are quoted by convention, everything else is
/// split verbatim.
fn default_policy(delim: char) -> Policy {
    if delim == ',' || delim == ';' {
        Policy::Quoted
    } else {
        Policy::Simple
    }
}

fn resolve_output_format(
    cli: &Cli,
    input_delim: char,
    input_policy: Policy,
) -> anyhow::Result<(char, Policy)> {
    if let Some(format) = &cli.out_format {
        return match format.as_str() {
            "csv" => Ok((',', Policy::Quoted)),
            "tsv" => Ok(('\t', Policy::Simple)),
            "input" => Ok((input_delim, input_policy)),
            other => bail!(
                "Unknown output format: {}. Valid options: csv, tsv, input",
                other
            ),
        };
    }
    let out_delim = match &cli.out_delim {
        Some(raw) => parse_delim(raw)?,
        None => input_delim,
    };
    let out_policy = match &cli.out_policy {
        Some(p) => p.parse::<Policy>().map_err(anyhow::Error::msg)?,
        None => input_policy,
    };
    Ok((out_delim, out_policy))
}

fn index_path(cli: &Cli) -> Option<PathBuf> {
    cli.index_file.clone().or_else(TableIndex::default_path)
}

fn open_input(cli: &Cli) -> anyhow::Result<Box<dyn Read>> {
    match &cli.input {
        None => Ok(Box::new(std::io::stdin())),
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Unable to open input file {}", path.display()))?;
            if path.extension().and_then(|e| e.to_str()) == Some("gz") {
                Ok(Box::new(flate2::read::GzDecoder::new(file)))
            } else {
                Ok(Box::new(file))
            }
        }
    }
}

fn open_output(cli: &Cli) -> anyhow::Result<Box<dyn Write>> {
    match &cli.output {
        None => Ok(Box::new(std::io::stdout())),
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Unable to create output file {}", path.display()))?;
            Ok(Box::new(file))
        }
    }
}

/// Push the queried table onto the recent-tables index. Failures are not
/// worth failing the run over.
fn remember_input_table(cli: &Cli) {
    let path = match &cli.input {
        Some(path) => path,
        None => return,
    };
    let index_path = match index_path(cli) {
        Some(index_path) => index_path,
        None => return,
    };
    let delim = match parse_delim(&cli.delim) {
        Ok(delim) => delim,
        Err(_) => return,
    };
    let policy = cli
        .policy
        .clone()
        .unwrap_or_else(|| default_policy(delim).to_string());
    let entry = IndexEntry {
        table_path: path.display().to_string(),
        delim: delim_to_index_form(delim),
        policy,
        encoding: cli.encoding.clone(),
    };
    let _ = TableIndex::new(index_path).update(entry, DEFAULT_INDEX_MAX_SIZE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_delim_parsing() {
        assert_eq!(parse_delim("TAB").unwrap(), '\t');
        assert_eq!(parse_delim(",").unwrap(), ',');
        assert!(parse_delim("ab").is_err());
        assert!(parse_delim("").is_err());
    }

    #[test]
    fn test_default_policies() {
        assert_eq!(default_policy(','), Policy::Quoted);
        assert_eq!(default_policy(';'), Policy::Quoted);
        assert_eq!(default_policy('\t'), Policy::Simple);
    }
}
