// Library interface for corpscope modules
// This allows tests and other binaries to import modules

pub mod error;
pub mod kv;
pub mod llm;
pub mod lock;
pub mod news;
pub mod pipeline;
pub mod prompts;
pub mod scoring;
pub mod scraping;
pub mod server;
pub mod setup;
pub mod subject;
