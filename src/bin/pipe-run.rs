//! CLI tool to run pipeline (.pipe) files against input data.
//!
//! Usage:
//!   pipe-run <pipeline.pipe> [input.data] [-o output.data] [--debug]
//!
//! Input is read from stdin when no input file is given. Output goes to
//! stdout unless `-o` names a file.

use anyhow::{Context, Result};
use clap::Parser;
use seqpipe::{DebugInfo, execute_pipeline_debug};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Run a pipeline file against line-oriented input data.
#[derive(Parser, Debug)]
#[command(name = "pipe-run")]
struct Cli {
    /// Pipeline definition file (.pipe)
    pipeline: PathBuf,

    /// Input data file, one record per line (default: stdin)
    input: Option<PathBuf>,

    /// Write output to file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print per-stage record counts on stderr
    #[arg(long)]
    debug: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
}

/// Result of one run, reported on stderr by `main`.
#[derive(Debug)]
struct RunSummary {
    input_count: usize,
    output_count: usize,
    stages: Vec<DebugInfo>,
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(&cli) {
        Ok(summary) => {
            if cli.debug {
                for stage in &summary.stages {
                    eprintln!(
                        "  {:<10} {:>6} -> {:<6}",
                        stage.stage_name, stage.input_count, stage.output_count
                    );
                }
            }
            match &cli.output {
                Some(out_path) => eprintln!(
                    "Processed {} -> {} records, output: {}",
                    summary.input_count,
                    summary.output_count,
                    out_path.display()
                ),
                None => eprintln!(
                    "Processed {} -> {} records",
                    summary.input_count, summary.output_count
                ),
            }
        }
        Err(e) => {
            eprintln!("Pipeline error: {e:#}");
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<RunSummary> {
    let pipeline_text = fs::read_to_string(&cli.pipeline)
        .with_context(|| format!("Error reading pipeline file '{}'", cli.pipeline.display()))?;
    let input_text = read_input(cli.input.as_deref())?;

    info!(pipeline = %cli.pipeline.display(), "running pipeline");
    let (output, input_count, output_count, stages) =
        execute_pipeline_debug(&input_text, &pipeline_text)?;

    match &cli.output {
        Some(out_path) => write_output_file(out_path, &output)?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(output.as_bytes())
                .context("Error writing output")?;
            if !output.is_empty() && !output.ends_with('\n') {
                writeln!(stdout).context("Error writing output")?;
            }
        }
    }

    Ok(RunSummary {
        input_count,
        output_count,
        stages,
    })
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Error reading input file '{}'", path.display())),
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("Error reading stdin")?;
            Ok(text)
        }
    }
}

fn write_output_file(out_path: &Path, output: &str) -> Result<()> {
    if let Some(parent) = out_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "Error creating output directory for '{}'",
                out_path.display()
            )
        })?;
    }
    let mut contents = output.to_string();
    if !contents.is_empty() {
        contents.push('\n');
    }
    fs::write(out_path, contents)
        .with_context(|| format!("Error writing output file '{}'", out_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli(dir: &TempDir, pipeline: &str, input: &str) -> Cli {
        let pipe_path = dir.path().join("test.pipe");
        let input_path = dir.path().join("test.data");
        fs::write(&pipe_path, pipeline).unwrap();
        fs::write(&input_path, input).unwrap();
        Cli {
            pipeline: pipe_path,
            input: Some(input_path),
            output: Some(dir.path().join("out").join("result.data")),
            debug: false,
            log_level: "warn".to_string(),
        }
    }

    #[test]
    fn test_run_writes_output_file() {
        let dir = TempDir::new().unwrap();
        let pipeline = "PIPE CONSOLE\n| UPPER\n| CONSOLE\n?\n";
        let cli = cli(&dir, pipeline, "raj\npriya\n");

        let summary = run(&cli).unwrap();
        assert_eq!(summary.input_count, 2);
        assert_eq!(summary.output_count, 2);
        assert_eq!(summary.stages.len(), 3);

        let out_path = dir.path().join("out/result.data");
        let written = fs::read_to_string(out_path).unwrap();
        assert_eq!(written, "RAJ\nPRIYA\n");
    }

    #[test]
    fn test_run_reports_pipeline_error() {
        let dir = TempDir::new().unwrap();
        let cli = cli(&dir, "PIPE CONSOLE\n| NUMBER\n?\n", "1\ntwo\n");

        let err = run(&cli).unwrap_err();
        assert!(format!("{err:#}").contains("element 1 failed"));
        assert!(!dir.path().join("out/result.data").exists());
    }

    #[test]
    fn test_missing_pipeline_file() {
        let dir = TempDir::new().unwrap();
        let mut cli = cli(&dir, "PIPE CONSOLE\n| CONSOLE\n?\n", "a\n");
        cli.pipeline = dir.path().join("missing.pipe");

        let err = run(&cli).unwrap_err();
        assert!(err.to_string().starts_with("Error reading pipeline file"));
    }

    #[test]
    fn test_cli_parses_arguments() {
        let cli = Cli::try_parse_from([
            "pipe-run",
            "words.pipe",
            "words.data",
            "-o",
            "out.data",
            "--debug",
        ])
        .unwrap();
        assert_eq!(cli.pipeline, PathBuf::from("words.pipe"));
        assert_eq!(cli.input, Some(PathBuf::from("words.data")));
        assert_eq!(cli.output, Some(PathBuf::from("out.data")));
        assert!(cli.debug);
        assert_eq!(cli.log_level, "warn");
    }
}
