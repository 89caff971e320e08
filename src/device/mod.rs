pub mod auth;
pub mod btle;
pub mod central;
pub mod coalescer;
pub mod codec;
pub mod connection;
pub mod constants;
pub mod resolver;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;
