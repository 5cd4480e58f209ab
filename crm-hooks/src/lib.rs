pub mod config;
pub mod curate;
pub mod enrich;
pub mod error;
pub mod handlers;
pub mod pipeline;
pub mod publish;
pub mod signature;
pub mod time;
pub mod translate;
pub mod worker;
