pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod metric;
pub mod period;
pub mod query;
pub mod routes;
pub mod services;
pub mod state;
pub mod time;
pub mod units;
pub mod window;

#[cfg(test)]
pub mod test_support;
