//! Result Aggregator - projects an execution trace for the caller
//!
//! Pure: same `ExecutionResult` and format in, same output out. The format
//! is resolved before any rendering, so an unknown format name never yields
//! half-formatted output.

use crate::display_format::{format_duration_ms, pad_right, value_cell, value_inline};
use crate::error::AggregationError;
use crate::executor::{ExecutionResult, StepResult, StepStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Write};
use std::str::FromStr;
use uuid::Uuid;

/// Widest output cell in table format
const TABLE_OUTPUT_WIDTH: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Table,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::Table => "table",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "table" => Ok(OutputFormat::Table),
            _ => Err(AggregationError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Caller-facing view of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub index: usize,
    pub action: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub iterations: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub failed_items: usize,
}

impl From<&StepResult> for StepSummary {
    fn from(step: &StepResult) -> Self {
        Self {
            index: step.index,
            action: step.action.clone(),
            status: step.status,
            duration_ms: step.duration_ms,
            iterations: step.iterations,
            output: step.output.clone(),
            error: step.error.clone(),
            failed_items: step.item_errors.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub trace_id: Uuid,
    pub steps: Vec<StepSummary>,
    pub success: bool,
    pub duration_ms: u64,
    pub format: OutputFormat,
    pub formatted_output: String,
}

/// Project a trace into the requested format
pub fn aggregate(result: &ExecutionResult, format: OutputFormat) -> Result<AggregatedResult, AggregationError> {
    let formatted_output = match format {
        OutputFormat::Text => render_text(result),
        OutputFormat::Json => render_json(result)?,
        OutputFormat::Table => render_table(result),
    };

    Ok(AggregatedResult {
        trace_id: result.trace_id,
        steps: result.steps.iter().map(StepSummary::from).collect(),
        success: result.success,
        duration_ms: result.duration_ms,
        format,
        formatted_output,
    })
}

/// `aggregate` with the format given by name
pub fn aggregate_as(result: &ExecutionResult, format: &str) -> Result<AggregatedResult, AggregationError> {
    aggregate(result, format.parse()?)
}

fn outcome_label(result: &ExecutionResult) -> String {
    if result.cancelled {
        "cancelled".to_string()
    } else if let Some(index) = result.aborted_at {
        format!("aborted at step {}", index)
    } else if result.success {
        "success".to_string()
    } else {
        "completed with failures".to_string()
    }
}

fn render_text(result: &ExecutionResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "trace {}  {}  {}",
        result.trace_id,
        outcome_label(result),
        format_duration_ms(result.duration_ms)
    );

    for step in &result.steps {
        let _ = write!(
            out,
            "  [{}] {}  {}",
            step.index,
            step.action,
            step.status.as_str()
        );
        if step.iterations != 1 {
            let _ = write!(out, "  x{}", step.iterations);
        }
        let _ = writeln!(out, "  {}", format_duration_ms(step.duration_ms));

        if let Some(output) = &step.output {
            let _ = writeln!(out, "      {}", value_inline(output));
        }
        if let Some(error) = &step.error {
            let _ = writeln!(out, "      error: {}", error);
        }
        for item in &step.item_errors {
            let _ = writeln!(out, "      item {}: {}", item.index, item.message);
        }
    }
    out
}

fn render_json(result: &ExecutionResult) -> Result<String, AggregationError> {
    let summary = serde_json::json!({
        "trace_id": result.trace_id,
        "started_at": result.started_at,
        "success": result.success,
        "duration_ms": result.duration_ms,
        "aborted_at": result.aborted_at,
        "cancelled": result.cancelled,
        "steps": result.steps,
    });
    serde_json::to_string_pretty(&summary).map_err(|e| AggregationError::Serialization(e.to_string()))
}

fn render_table(result: &ExecutionResult) -> String {
    let headers = ["STEP", "ACTION", "STATUS", "ITER", "TIME", "OUTPUT"];
    let rows: Vec<[String; 6]> = result
        .steps
        .iter()
        .map(|step| {
            let detail = match (&step.error, &step.output) {
                (Some(error), _) => error.clone(),
                (None, Some(output)) => value_cell(output, TABLE_OUTPUT_WIDTH),
                (None, None) => "-".to_string(),
            };
            [
                step.index.to_string(),
                step.action.clone(),
                step.status.as_str().to_string(),
                step.iterations.to_string(),
                format_duration_ms(step.duration_ms),
                detail,
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| -> String {
        let last = cells.len() - 1;
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| if i == last { cell.clone() } else { pad_right(cell, widths[i]) })
            .collect::<Vec<_>>()
            .join("  ")
    };

    let mut out = String::new();
    let _ = writeln!(out, "{}", line(&headers.map(String::from)[..]));
    for row in &rows {
        let _ = writeln!(out, "{}", line(&row[..]));
    }
    let _ = writeln!(out, "{}", outcome_label(result));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ItemError;
    use chrono::Utc;
    use serde_json::json;

    fn step(index: usize, action: &str, status: StepStatus, output: Option<Value>) -> StepResult {
        StepResult {
            index,
            action: action.to_string(),
            status,
            duration_ms: 3,
            output,
            error: None,
            item_errors: Vec::new(),
            iterations: 1,
            store_as: None,
        }
    }

    fn sample() -> ExecutionResult {
        let mut counts = step(1, "shell.count_matches", StepStatus::Failed, Some(json!([15, null])));
        counts.iterations = 2;
        counts.error = Some("1 of 2 items failed".to_string());
        counts.item_errors.push(ItemError {
            index: 1,
            message: "permission denied".to_string(),
        });

        ExecutionResult {
            trace_id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration_ms: 12,
            steps: vec![
                step(0, "shell.find_files", StepStatus::Success, Some(json!(["a.log", "b.log"]))),
                counts,
            ],
            success: false,
            aborted_at: Some(1),
            cancelled: false,
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("TABLE".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert_eq!(
            "yaml".parse::<OutputFormat>().unwrap_err(),
            AggregationError::UnsupportedFormat("yaml".to_string())
        );
    }

    #[test]
    fn test_unsupported_format_rejected() {
        assert!(matches!(
            aggregate_as(&sample(), "xml"),
            Err(AggregationError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_text_output() {
        let aggregated = aggregate(&sample(), OutputFormat::Text).unwrap();
        let text = &aggregated.formatted_output;

        assert!(text.contains("aborted at step 1"));
        assert!(text.contains("[0] shell.find_files  success"));
        assert!(text.contains("[\"a.log\",\"b.log\"]"));
        assert!(text.contains("item 1: permission denied"));
        assert!(!aggregated.success);
        assert_eq!(aggregated.steps.len(), 2);
        assert_eq!(aggregated.steps[1].failed_items, 1);
    }

    #[test]
    fn test_json_output_parses() {
        let result = sample();
        let aggregated = aggregate(&result, OutputFormat::Json).unwrap();
        let parsed: Value = serde_json::from_str(&aggregated.formatted_output).unwrap();

        assert_eq!(parsed["trace_id"], json!(result.trace_id.to_string()));
        assert_eq!(parsed["steps"][1]["output"], json!([15, null]));
        assert_eq!(parsed["aborted_at"], json!(1));
    }

    #[test]
    fn test_table_output() {
        let aggregated = aggregate(&sample(), OutputFormat::Table).unwrap();
        let lines: Vec<&str> = aggregated.formatted_output.lines().collect();

        assert!(lines[0].starts_with("STEP  ACTION"));
        assert!(lines[1].contains("shell.find_files"));
        assert!(lines[2].contains("1 of 2 items failed"));
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_aggregate_is_pure() {
        let result = sample();
        let first = aggregate(&result, OutputFormat::Table).unwrap();
        let second = aggregate(&result, OutputFormat::Table).unwrap();
        assert_eq!(first, second);
    }
}
