//! 服务层
//!
//! 短链解析引擎与访问统计聚合，由 HTTP 处理器和后台 worker 共用

mod analytics_service;
mod link_service;

pub use analytics_service::*;
pub use link_service::*;
