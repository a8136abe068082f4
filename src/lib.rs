pub mod config;
pub mod db;
pub mod driver;
pub mod error;
pub mod export;
pub mod host;
pub mod provider;

#[cfg(test)]
mod testing;
