pub mod config;
pub mod error;

pub use config::{load_dotenv, AgentLimits, Config, LlmConfig};
pub use error::*;

#[cfg(test)]
mod tests {
    #[test]
    fn test_load_dotenv_is_reexported_and_tolerates_missing_file() {
        crate::load_dotenv();
        crate::load_dotenv();
        assert!(crate::Config::for_profile("").validate().is_ok());
    }
}
