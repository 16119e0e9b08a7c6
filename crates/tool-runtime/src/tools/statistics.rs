//! Descriptive statistics over a numeric series.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::tool::{
    required_numbers, ParamType, ParameterSpec, Tool, ToolDefinition, ToolError, ToolResult,
};

/// Operations computed when the caller does not pick any.
pub const DEFAULT_OPERATIONS: &[&str] = &["mean", "median", "std", "min", "max"];

const ALL_OPERATIONS: &[&str] = &[
    "mean", "median", "mode", "std", "variance", "min", "max", "sum", "count", "range",
];

/// Computes mean, median, mode, population standard deviation and friends.
pub struct StatisticalAnalysisTool;

impl StatisticalAnalysisTool {
    fn mean(data: &[f64]) -> f64 {
        data.iter().sum::<f64>() / data.len() as f64
    }

    fn median(data: &[f64]) -> f64 {
        let mut sorted = data.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }

    /// Most frequent value; ties resolve to the value seen first.
    fn mode(data: &[f64]) -> f64 {
        let mut best = data[0];
        let mut best_count = 0;
        for candidate in data {
            let count = data.iter().filter(|v| *v == candidate).count();
            if count > best_count {
                best = *candidate;
                best_count = count;
            }
        }
        best
    }

    fn variance(data: &[f64]) -> f64 {
        let mean = Self::mean(data);
        data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / data.len() as f64
    }

    fn compute(operation: &str, data: &[f64]) -> Result<f64, ToolError> {
        let min = || data.iter().copied().fold(f64::INFINITY, f64::min);
        let max = || data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(match operation {
            "mean" => Self::mean(data),
            "median" => Self::median(data),
            "mode" => Self::mode(data),
            "std" => Self::variance(data).sqrt(),
            "variance" => Self::variance(data),
            "min" => min(),
            "max" => max(),
            "sum" => data.iter().sum(),
            "count" => data.len() as f64,
            "range" => max() - min(),
            other => {
                return Err(ToolError::InvalidInput(format!(
                    "unsupported operation '{other}'"
                )))
            }
        })
    }
}

#[async_trait]
impl Tool for StatisticalAnalysisTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "statistical_analysis",
            "Compute descriptive statistics (mean, median, mode, standard deviation, ...) for a list of numbers.",
        )
        .param(
            "data",
            ParameterSpec::new(ParamType::Array, "Numeric values to analyze")
                .required()
                .with_items(ParamType::Number),
        )
        .param(
            "operations",
            ParameterSpec::new(ParamType::Array, "Statistics to compute")
                .with_enum(ALL_OPERATIONS.iter().copied())
                .with_default(json!(DEFAULT_OPERATIONS)),
        )
    }

    async fn execute(&self, params: Value) -> Result<ToolResult, ToolError> {
        let data = required_numbers(&params, "data")?;
        if data.is_empty() {
            return Ok(ToolResult::failure("'data' must contain at least one number"));
        }

        let operations: Vec<String> = match params.get("operations").and_then(|v| v.as_array()) {
            Some(ops) if !ops.is_empty() => ops
                .iter()
                .filter_map(|op| op.as_str().map(str::to_string))
                .collect(),
            _ => DEFAULT_OPERATIONS.iter().map(|s| s.to_string()).collect(),
        };

        let mut results = Map::new();
        for op in &operations {
            results.insert(op.clone(), json!(Self::compute(op, &data)?));
        }

        debug!(count = data.len(), operations = operations.len(), "computed statistics");
        Ok(ToolResult::success(Value::Object(results)).with_metadata("count", json!(data.len())))
    }
}
