pub mod orchestrator;
pub mod pacer;
pub mod rewriter;
pub mod update_service;
