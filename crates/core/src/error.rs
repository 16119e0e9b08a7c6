use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{key} must be at least 1, got {value}")]
    ZeroLimit { key: &'static str, value: u64 },

    #[error("LLM_TEMPERATURE must be within 0.0..=2.0, got {0}")]
    TemperatureOutOfRange(f32),
}
