pub mod api;
pub mod code_alloc;
pub mod config;
pub mod http;
pub mod memory_repo;
pub mod orm;
pub mod request_ctx;
pub mod short_code;
pub mod url_repo;
pub mod url_service;
