pub mod bundle;
pub mod catalog;
pub mod config;
pub mod encode;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod resolver;
pub mod storage;
pub mod warehouse;
