//! DSL parser and executor for line-oriented pipelines.
//!
//! Pipeline format (CMS Pipelines style):
//! ```text
//! PIPE CONSOLE
//! | SPLIT /,/
//! | NUMBER
//! | SORT DESC NUMBER
//! | CONSOLE
//! ?
//! ```
//!
//! - `PIPE CONSOLE` starts the pipeline, reading input lines as records
//! - `| <stage>` continues to the next stage
//! - `?` on its own line marks the end of the pipeline
//! - Lines starting with `#` are comments
//!
//! Delimited arguments use the first non-blank character as delimiter:
//! `/,/`, `"Hello, "` and `.x.` are all valid.
//!
//! Supported stages:
//! - `CONSOLE` - Read input (first), pass through (elsewhere)
//! - `LITERAL text` - Emit one record (first), or prepend it (elsewhere)
//! - `HOLE` - Produce or keep nothing
//! - `SPLIT [/d/]` - Split each record on `d`, or on whitespace
//! - `DUPLICATE n` - Repeat each record n times
//! - `FIELD /d/ n` - Keep the n-th (0-based) `d`-separated field
//! - `TRIM`, `UPPER`, `LOWER`, `REVERSE` - Text transforms
//! - `CHANGE /old/ /new/` - Replace occurrences of old with new
//! - `PREFIX /text/` - Prepend text to every record
//! - `LENGTH` - Replace each record by its character count
//! - `NUMBER` - Normalise each record as a number
//! - `SCALE x`, `DIVIDE x`, `SQUARE` - Arithmetic on numeric records
//! - `LOCATE /p/`, `NLOCATE /p/` - Keep records (not) containing p
//! - `LONGER n` - Keep records longer than n characters
//! - `ABOVE x` - Keep numeric records greater than x
//! - `TAKE n`, `SKIP n` - Keep or drop the first n records
//! - `DISTINCT` - Drop repeated records
//! - `SORT [ASC|DESC] [TEXT|LENGTH|NUMBER]` - Stable sort
//! - `COUNT` - Emit `COUNT=n`
//! - `REDUCE LONGEST|SHORTEST|SUM|MAX|MIN|AVERAGE` - Emit one summary record
//! - `REDUCE JOIN /sep/` - Join all records into one
//! - `GROUP /d/ k v` - Emit `key: v1,v2` per key of field k, values from field v

use anyhow::{Context, anyhow, bail};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{Pipeline, from_lines};
use crate::stage::{Order, Source};

/// Record counts for a single pipeline stage execution.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugInfo {
    pub stage_name: String,
    pub input_count: usize,
    pub output_count: usize,
}

impl DebugInfo {
    pub fn new(stage_name: String, input_count: usize, output_count: usize) -> Self {
        Self {
            stage_name,
            input_count,
            output_count,
        }
    }
}

/// Sort key for `SORT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Text,
    Length,
    Number,
}

/// Summary operation for `REDUCE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReduceOp {
    Longest,
    Shortest,
    Sum,
    Max,
    Min,
    Average,
    Join { separator: String },
}

/// Parsed pipeline command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// CONSOLE - read input or pass through
    Console,
    /// LITERAL text
    Literal { text: String },
    /// HOLE - empty stream
    Hole,
    /// SPLIT [/delimiter/]; whitespace when absent
    Split { delimiter: Option<String> },
    /// DUPLICATE n
    Duplicate { n: usize },
    /// FIELD /delimiter/ index
    Field { delimiter: String, index: usize },
    Trim,
    Upper,
    Lower,
    Reverse,
    /// CHANGE /old/ /new/
    Change { old: String, new: String },
    /// PREFIX /text/
    Prefix { text: String },
    Length,
    Number,
    /// SCALE factor
    Scale { factor: f64 },
    /// DIVIDE divisor; never zero
    Divide { divisor: f64 },
    Square,
    /// LOCATE /pattern/
    Locate { pattern: String },
    /// NLOCATE /pattern/
    Nlocate { pattern: String },
    /// LONGER n
    Longer { n: usize },
    /// ABOVE threshold
    Above { threshold: f64 },
    /// TAKE n
    Take { n: usize },
    /// SKIP n
    Skip { n: usize },
    Distinct,
    /// SORT [ASC|DESC] [TEXT|LENGTH|NUMBER]
    Sort { order: Order, key: SortKey },
    Count,
    /// REDUCE op
    Reduce { op: ReduceOp },
    /// GROUP /delimiter/ key value
    Group {
        delimiter: String,
        key: usize,
        value: usize,
    },
}

impl Command {
    /// Can this stage be the first stage in a pipeline (source)?
    pub fn can_be_first(&self) -> bool {
        matches!(
            self,
            Command::Console | Command::Literal { .. } | Command::Hole
        )
    }

    /// Get the stage name for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Console => "CONSOLE",
            Command::Literal { .. } => "LITERAL",
            Command::Hole => "HOLE",
            Command::Split { .. } => "SPLIT",
            Command::Duplicate { .. } => "DUPLICATE",
            Command::Field { .. } => "FIELD",
            Command::Trim => "TRIM",
            Command::Upper => "UPPER",
            Command::Lower => "LOWER",
            Command::Reverse => "REVERSE",
            Command::Change { .. } => "CHANGE",
            Command::Prefix { .. } => "PREFIX",
            Command::Length => "LENGTH",
            Command::Number => "NUMBER",
            Command::Scale { .. } => "SCALE",
            Command::Divide { .. } => "DIVIDE",
            Command::Square => "SQUARE",
            Command::Locate { .. } => "LOCATE",
            Command::Nlocate { .. } => "NLOCATE",
            Command::Longer { .. } => "LONGER",
            Command::Above { .. } => "ABOVE",
            Command::Take { .. } => "TAKE",
            Command::Skip { .. } => "SKIP",
            Command::Distinct => "DISTINCT",
            Command::Sort { .. } => "SORT",
            Command::Count => "COUNT",
            Command::Reduce { .. } => "REDUCE",
            Command::Group { .. } => "GROUP",
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse DSL text into commands.
pub fn parse_commands(text: &str) -> PipelineResult<Vec<Command>> {
    let mut commands = Vec::new();

    for (line_num, line) in text.lines().enumerate() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // "PIPE COMMAND" - the command follows PIPE
        let line = match line.split_once(char::is_whitespace) {
            Some((word, rest)) if word.eq_ignore_ascii_case("PIPE") => rest.trim(),
            _ if line.eq_ignore_ascii_case("PIPE") => continue,
            _ => line,
        };

        // Continuation lines: "| COMMAND ..."
        let line = line.strip_prefix('|').map_or(line, str::trim);

        // Explicit end of pipeline
        let line = line.trim_end_matches('?').trim();

        if line.is_empty() {
            continue;
        }

        let cmd = parse_command(line).map_err(|e| PipelineError::AtLine {
            line: line_num + 1,
            source: Box::new(e),
        })?;
        commands.push(cmd);
    }

    Ok(commands)
}

/// Parse a single command line.
fn parse_command(line: &str) -> PipelineResult<Command> {
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let keyword = word.to_ascii_uppercase();

    match keyword.as_str() {
        "CONSOLE" => Ok(Command::Console),
        "LITERAL" => parse_literal(rest),
        "HOLE" => Ok(Command::Hole),
        "SPLIT" => parse_split(rest),
        "DUPLICATE" => {
            let n = parse_count("DUPLICATE", rest)?;
            if n == 0 {
                return Err(PipelineError::invalid(
                    "DUPLICATE",
                    "count must be at least 1",
                ));
            }
            Ok(Command::Duplicate { n })
        }
        "FIELD" => {
            let (delimiter, after) = parse_delimited_string("FIELD", rest)?;
            let index = parse_count("FIELD", after)?;
            Ok(Command::Field { delimiter, index })
        }
        "TRIM" => Ok(Command::Trim),
        "UPPER" => Ok(Command::Upper),
        "LOWER" => Ok(Command::Lower),
        "REVERSE" => Ok(Command::Reverse),
        "CHANGE" => parse_change(rest),
        "PREFIX" => {
            let (text, _) = parse_delimited_string("PREFIX", rest)?;
            Ok(Command::Prefix { text })
        }
        "LENGTH" => Ok(Command::Length),
        "NUMBER" => Ok(Command::Number),
        "SCALE" => Ok(Command::Scale {
            factor: parse_number_arg("SCALE", rest)?,
        }),
        "DIVIDE" => {
            let divisor = parse_number_arg("DIVIDE", rest)?;
            if divisor == 0.0 {
                return Err(PipelineError::invalid("DIVIDE", "divisor must not be zero"));
            }
            Ok(Command::Divide { divisor })
        }
        "SQUARE" => Ok(Command::Square),
        "LOCATE" => {
            let (pattern, _) = parse_delimited_string("LOCATE", rest)?;
            Ok(Command::Locate { pattern })
        }
        "NLOCATE" => {
            let (pattern, _) = parse_delimited_string("NLOCATE", rest)?;
            Ok(Command::Nlocate { pattern })
        }
        "LONGER" => Ok(Command::Longer {
            n: parse_count("LONGER", rest)?,
        }),
        "ABOVE" => Ok(Command::Above {
            threshold: parse_number_arg("ABOVE", rest)?,
        }),
        "TAKE" => Ok(Command::Take {
            n: parse_count("TAKE", rest)?,
        }),
        "SKIP" => Ok(Command::Skip {
            n: parse_count("SKIP", rest)?,
        }),
        "DISTINCT" => Ok(Command::Distinct),
        "SORT" => parse_sort(rest),
        "COUNT" => Ok(Command::Count),
        "REDUCE" => parse_reduce(rest),
        "GROUP" => parse_group(rest),
        _ => Err(PipelineError::UnknownCommand(word.to_string())),
    }
}

/// Parse a delimited string using CMS Pipelines convention.
/// The first non-blank character is the delimiter, and the string
/// continues until the next occurrence of that delimiter.
/// Returns (extracted_string, rest_of_input).
fn parse_delimited_string<'s>(stage: &str, s: &'s str) -> PipelineResult<(String, &'s str)> {
    let s = s.trim_start();
    let Some(delim) = s.chars().next() else {
        return Err(PipelineError::invalid(stage, "expected a delimited string"));
    };
    let after_delim = &s[delim.len_utf8()..];

    match after_delim.find(delim) {
        Some(end) => Ok((
            after_delim[..end].to_string(),
            &after_delim[end + delim.len_utf8()..],
        )),
        None => Err(PipelineError::invalid(
            stage,
            format!("unclosed delimiter '{delim}'"),
        )),
    }
}

fn parse_count(stage: &str, s: &str) -> PipelineResult<usize> {
    s.trim()
        .parse()
        .map_err(|_| PipelineError::invalid(stage, "requires a whole number"))
}

fn parse_number_arg(stage: &str, s: &str) -> PipelineResult<f64> {
    let value: f64 = s
        .trim()
        .parse()
        .map_err(|_| PipelineError::invalid(stage, "requires a number"))?;
    if !value.is_finite() {
        return Err(PipelineError::invalid(stage, "number must be finite"));
    }
    Ok(value)
}

/// LITERAL does not use delimiters: everything after the keyword is the text.
fn parse_literal(rest: &str) -> PipelineResult<Command> {
    if rest.is_empty() {
        return Err(PipelineError::invalid("LITERAL", "requires text"));
    }
    Ok(Command::Literal {
        text: rest.to_string(),
    })
}

fn parse_split(rest: &str) -> PipelineResult<Command> {
    if rest.is_empty() {
        return Ok(Command::Split { delimiter: None });
    }
    let (delimiter, _) = parse_delimited_string("SPLIT", rest)?;
    if delimiter.is_empty() {
        return Err(PipelineError::invalid(
            "SPLIT",
            "delimiter must not be empty",
        ));
    }
    Ok(Command::Split {
        delimiter: Some(delimiter),
    })
}

/// Both strings must use the same delimiter: CHANGE /old/ /new/
fn parse_change(rest: &str) -> PipelineResult<Command> {
    let (old, after_first) = parse_delimited_string("CHANGE", rest)?;
    if old.is_empty() {
        return Err(PipelineError::invalid(
            "CHANGE",
            "search string must not be empty",
        ));
    }
    let (new, _) = parse_delimited_string("CHANGE", after_first)?;
    Ok(Command::Change { old, new })
}

fn parse_sort(rest: &str) -> PipelineResult<Command> {
    let mut order = Order::Ascending;
    let mut key = SortKey::Text;
    for word in rest.split_whitespace() {
        match word.to_ascii_uppercase().as_str() {
            "ASC" => order = Order::Ascending,
            "DESC" => order = Order::Descending,
            "TEXT" => key = SortKey::Text,
            "LENGTH" => key = SortKey::Length,
            "NUMBER" => key = SortKey::Number,
            other => {
                return Err(PipelineError::invalid(
                    "SORT",
                    format!("unknown option '{other}'"),
                ));
            }
        }
    }
    Ok(Command::Sort { order, key })
}

fn parse_reduce(rest: &str) -> PipelineResult<Command> {
    let (word, after) = match rest.split_once(char::is_whitespace) {
        Some((word, after)) => (word, after),
        None => (rest, ""),
    };
    let op = match word.to_ascii_uppercase().as_str() {
        "" => return Err(PipelineError::invalid("REDUCE", "requires an operation")),
        "LONGEST" => ReduceOp::Longest,
        "SHORTEST" => ReduceOp::Shortest,
        "SUM" => ReduceOp::Sum,
        "MAX" => ReduceOp::Max,
        "MIN" => ReduceOp::Min,
        "AVERAGE" => ReduceOp::Average,
        "JOIN" => {
            let separator = if after.trim().is_empty() {
                String::new()
            } else {
                parse_delimited_string("REDUCE", after)?.0
            };
            ReduceOp::Join { separator }
        }
        other => {
            return Err(PipelineError::invalid(
                "REDUCE",
                format!("unknown operation '{other}'"),
            ));
        }
    };
    Ok(Command::Reduce { op })
}

/// GROUP /delimiter/ key value
fn parse_group(rest: &str) -> PipelineResult<Command> {
    let (delimiter, after) = parse_delimited_string("GROUP", rest)?;
    let fields: Vec<&str> = after.split_whitespace().collect();
    if fields.len() != 2 {
        return Err(PipelineError::invalid(
            "GROUP",
            "requires key and value field numbers",
        ));
    }
    Ok(Command::Group {
        delimiter,
        key: parse_count("GROUP", fields[0])?,
        value: parse_count("GROUP", fields[1])?,
    })
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Execute a pipeline defined by DSL text on input lines.
///
/// Returns (output_text, input_count, output_count) on success.
pub fn execute_pipeline(
    input_text: &str,
    pipeline_text: &str,
) -> PipelineResult<(String, usize, usize)> {
    let (output, input_count, output_count, _) =
        execute_pipeline_debug(input_text, pipeline_text)?;
    Ok((output, input_count, output_count))
}

/// Execute a pipeline and report record counts for every stage.
///
/// Returns (output_text, input_count, output_count, debug_info) on success.
pub fn execute_pipeline_debug(
    input_text: &str,
    pipeline_text: &str,
) -> PipelineResult<(String, usize, usize, Vec<DebugInfo>)> {
    let commands = parse_commands(pipeline_text)?;
    validate(&commands)?;

    let first = &commands[0];
    let mut current = source_records(first, input_text)?;
    let input_count = current.len();
    let mut debug_info = vec![DebugInfo::new(first.name().to_string(), 0, input_count)];

    for cmd in &commands[1..] {
        let stage_input = current.len();
        current = apply_command(&current, cmd).map_err(|e| PipelineError::InStage {
            stage: cmd.name(),
            source: Box::new(e),
        })?;
        debug!(
            stage = cmd.name(),
            input = stage_input,
            output = current.len(),
            "stage complete"
        );
        debug_info.push(DebugInfo::new(
            cmd.name().to_string(),
            stage_input,
            current.len(),
        ));
    }

    let output_count = current.len();
    Ok((current.join("\n"), input_count, output_count, debug_info))
}

fn validate(commands: &[Command]) -> PipelineResult<()> {
    let Some(first) = commands.first() else {
        return Err(PipelineError::Structure("Pipeline is empty".to_string()));
    };
    if commands.len() < 2 {
        return Err(PipelineError::Structure(
            "Pipeline must have at least 2 stages".to_string(),
        ));
    }
    if !first.can_be_first() {
        return Err(PipelineError::Structure(format!(
            "{} cannot be the first stage (try CONSOLE, LITERAL, or HOLE)",
            first.name()
        )));
    }
    Ok(())
}

fn source_records(first: &Command, input_text: &str) -> PipelineResult<Vec<String>> {
    match first {
        Command::Console => from_lines(input_text)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Command::Literal { text } => Ok(vec![text.clone()]),
        Command::Hole => Ok(Vec::new()),
        other => Err(PipelineError::Structure(format!(
            "Unhandled source stage: {}",
            other.name()
        ))),
    }
}

/// Records must hold finite numbers; `NaN` and `inf` parse but are rejected.
fn parse_number(record: &str) -> anyhow::Result<f64> {
    let value = record
        .trim()
        .parse::<f64>()
        .with_context(|| format!("'{record}' is not a number"))?;
    if !value.is_finite() {
        bail!("'{record}' is not a number");
    }
    Ok(value)
}

fn format_number(value: f64) -> String {
    value.to_string()
}

fn field<'r>(record: &'r str, delimiter: &str, index: usize) -> anyhow::Result<&'r str> {
    record
        .split(delimiter)
        .nth(index)
        .ok_or_else(|| anyhow!("'{record}' has no field {index}"))
}

/// Apply a single command to records.
fn apply_command(records: &[String], cmd: &Command) -> PipelineResult<Vec<String>> {
    let source = Pipeline::new(records);

    match cmd {
        Command::Console => source.map(|r| r.clone()).collect(),
        Command::Literal { text } => {
            // Outside the source position LITERAL prefixes the stream
            let mut result = vec![text.clone()];
            result.extend(source.map(|r| r.clone()).collect()?);
            Ok(result)
        }
        Command::Hole => Ok(Vec::new()),
        Command::Split { delimiter: None } => source
            .flat_map(|r| r.split_whitespace())
            .map(str::to_string)
            .collect(),
        Command::Split {
            delimiter: Some(delimiter),
        } => source
            .flat_map(|r| r.split(delimiter.as_str()))
            .filter(|piece| !piece.is_empty())
            .map(str::to_string)
            .collect(),
        Command::Duplicate { n } => source
            .flat_map(|r| std::iter::repeat_n(r.clone(), *n))
            .collect(),
        Command::Field { delimiter, index } => source
            .try_map(|r| field(r, delimiter, *index).map(str::to_string))
            .collect(),
        Command::Trim => source.map(|r| r.trim().to_string()).collect(),
        Command::Upper => source.map(|r| r.to_uppercase()).collect(),
        Command::Lower => source.map(|r| r.to_lowercase()).collect(),
        Command::Reverse => source.map(|r| r.chars().rev().collect()).collect(),
        Command::Change { old, new } => source.map(|r| r.replace(old, new)).collect(),
        Command::Prefix { text } => source.map(|r| format!("{text}{r}")).collect(),
        Command::Length => source.map(|r| r.chars().count().to_string()).collect(),
        Command::Number => source
            .try_map(|r| parse_number(r).map(format_number))
            .collect(),
        Command::Scale { factor } => source
            .try_map(|r| parse_number(r).map(|v| format_number(v * factor)))
            .collect(),
        Command::Divide { divisor } => source
            .try_map(|r| parse_number(r).map(|v| format_number(v / divisor)))
            .collect(),
        Command::Square => source
            .try_map(|r| parse_number(r).map(|v| format_number(v * v)))
            .collect(),
        Command::Locate { pattern } => source
            .filter(|r| r.contains(pattern.as_str()))
            .map(|r| r.clone())
            .collect(),
        Command::Nlocate { pattern } => source
            .filter(|r| !r.contains(pattern.as_str()))
            .map(|r| r.clone())
            .collect(),
        Command::Longer { n } => source
            .filter(|r| r.chars().count() > *n)
            .map(|r| r.clone())
            .collect(),
        Command::Above { threshold } => source
            .try_map(|r| parse_number(r).map(|v| (v, r)))
            .filter(|(v, _)| v > threshold)
            .map(|(_, r)| r.clone())
            .collect(),
        Command::Take { n } => source.take(*n).map(|r| r.clone()).collect(),
        Command::Skip { n } => source.skip(*n).map(|r| r.clone()).collect(),
        Command::Distinct => source.distinct().map(|r| r.clone()).collect(),
        Command::Sort { order, key } => sort_records(source, *order, *key),
        Command::Count => Ok(vec![format!("COUNT={}", source.count()?)]),
        Command::Reduce { op } => reduce_records(source, op),
        Command::Group {
            delimiter,
            key,
            value,
        } => {
            let groups = source
                .try_map(|r| {
                    let k = field(r, delimiter, *key)?;
                    anyhow::Ok((k, field(r, delimiter, *value)?))
                })
                .group_by(|pair| pair.0, |pair| pair.1)?;
            Ok(groups
                .into_iter()
                .map(|(k, values)| format!("{k}: {}", values.join(",")))
                .collect())
        }
    }
}

fn sort_records(
    source: Pipeline<Source<'_, String>>,
    order: Order,
    key: SortKey,
) -> PipelineResult<Vec<String>> {
    match key {
        SortKey::Text => source
            .sorted_by(|a, b| order.apply(a.cmp(b)))
            .map(|r| r.clone())
            .collect(),
        SortKey::Length => source
            .sort_by_key(|r| r.chars().count(), order)
            .map(|r| r.clone())
            .collect(),
        SortKey::Number => source
            .try_map(|r| parse_number(r).map(|v| (v, r)))
            .sorted_by(|a, b| order.apply(a.0.total_cmp(&b.0)))
            .map(|(_, r)| r.clone())
            .collect(),
    }
}

/// Summary records never appear for empty input, except `SUM` which yields 0.
fn reduce_records(
    source: Pipeline<Source<'_, String>>,
    op: &ReduceOp,
) -> PipelineResult<Vec<String>> {
    let numbers = || source.clone().try_map(|r| parse_number(r));

    let summary = match op {
        ReduceOp::Longest => source.max_by_key(|r| r.chars().count())?.cloned(),
        ReduceOp::Shortest => source.min_by_key(|r| r.chars().count())?.cloned(),
        ReduceOp::Sum => Some(format_number(numbers().reduce(0.0, |acc, v| acc + v)?)),
        ReduceOp::Max => numbers().reduce_optional(f64::max)?.map(format_number),
        ReduceOp::Min => numbers().reduce_optional(f64::min)?.map(format_number),
        ReduceOp::Average => numbers().average()?.map(format_number),
        ReduceOp::Join { separator } => {
            if source.count()? == 0 {
                None
            } else {
                Some(source.join(separator)?)
            }
        }
    };
    Ok(summary.into_iter().collect())
}
