pub mod aggregate;
pub mod config;
pub mod error;
pub mod fetch;
pub mod geo;
pub mod identity;
pub mod impute;
pub mod metro;
pub mod output;
pub mod pipeline;
pub mod population;
pub mod process;
pub mod schema;
