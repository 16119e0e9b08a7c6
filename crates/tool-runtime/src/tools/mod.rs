//! Built-in tools used by the domain orchestrators.
//!
//! - **Analytics**: `statistical_analysis`, `correlation`
//! - **Research**: `web_fetch`, `extract_keywords`
//! - **Content**: `text_metrics`, `render_template`

pub mod correlation;
pub mod keywords;
pub mod statistics;
pub mod template;
pub mod text_metrics;
pub mod web_fetch;

pub use correlation::CorrelationTool;
pub use keywords::ExtractKeywordsTool;
pub use statistics::StatisticalAnalysisTool;
pub use template::RenderTemplateTool;
pub use text_metrics::TextMetricsTool;
pub use web_fetch::WebFetchTool;
