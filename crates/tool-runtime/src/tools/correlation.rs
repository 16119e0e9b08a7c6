//! Pearson correlation between two equally sized series.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{
    required_numbers, ParamType, ParameterSpec, Tool, ToolDefinition, ToolError, ToolResult,
};

pub struct CorrelationTool;

fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    (denom > 0.0).then(|| cov / denom)
}

fn strength(r: f64) -> &'static str {
    match r.abs() {
        v if v >= 0.8 => "very strong",
        v if v >= 0.6 => "strong",
        v if v >= 0.4 => "moderate",
        v if v >= 0.2 => "weak",
        _ => "negligible",
    }
}

#[async_trait]
impl Tool for CorrelationTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "correlation",
            "Compute the Pearson correlation coefficient between two numeric series of equal length.",
        )
        .param(
            "x",
            ParameterSpec::new(ParamType::Array, "First series")
                .required()
                .with_items(ParamType::Number),
        )
        .param(
            "y",
            ParameterSpec::new(ParamType::Array, "Second series")
                .required()
                .with_items(ParamType::Number),
        )
    }

    async fn execute(&self, params: Value) -> Result<ToolResult, ToolError> {
        let x = required_numbers(&params, "x")?;
        let y = required_numbers(&params, "y")?;

        if x.len() != y.len() {
            return Ok(ToolResult::failure(format!(
                "series lengths differ: x has {}, y has {}",
                x.len(),
                y.len()
            )));
        }
        if x.len() < 2 {
            return Ok(ToolResult::failure("at least two paired values are required"));
        }

        match pearson(&x, &y) {
            Some(r) => Ok(ToolResult::success(json!({
                "coefficient": r,
                "strength": strength(r),
                "direction": if r >= 0.0 { "positive" } else { "negative" },
                "n": x.len(),
            }))),
            None => Ok(ToolResult::failure(
                "correlation is undefined for a constant series",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_perfect_negative() {
        let result = CorrelationTool
            .execute(json!({"x": [1, 2, 3, 4], "y": [8, 6, 4, 2]}))
            .await
            .unwrap();
        let data = result.data().unwrap();
        assert!((data["coefficient"].as_f64().unwrap() + 1.0).abs() < 1e-9);
        assert_eq!(data["direction"], "negative");
        assert_eq!(data["strength"], "very strong");
    }

    #[tokio::test]
    async fn test_length_mismatch() {
        let result = CorrelationTool
            .execute(json!({"x": [1, 2, 3], "y": [1, 2]}))
            .await
            .unwrap();
        assert!(result.error().unwrap().contains("lengths differ"));
    }

    #[tokio::test]
    async fn test_constant_series() {
        let result = CorrelationTool
            .execute(json!({"x": [1, 1, 1], "y": [1, 2, 3]}))
            .await
            .unwrap();
        assert!(!result.is_success());
    }
}
