pub mod bots;
pub mod cache;
pub mod client;
pub mod config;
pub mod query;
pub mod report;
pub mod reports;
pub mod resolve;
pub mod runtime;
pub mod tasks;
pub mod title;

#[cfg(test)]
pub(crate) mod testing;
