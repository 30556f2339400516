// 公开导出的模块，供外部使用
pub mod models;
pub mod errors;
pub mod config;
pub mod codec;
pub mod corporate_action;
pub mod planner;
pub mod providers;
pub mod services;
pub mod util;

// 重新导出常用类型，方便使用
pub use config::UpdateConfig;
pub use errors::{Result, RowError, UpdateError};
pub use models::quote::{FileVariant, RawRow, Row};
pub use providers::base::QuoteFetcher;
pub use providers::tiingo::TiingoFetcher;
pub use services::update_service::{update_file, UpdatePhase, UpdateService, UpdateSummary};
