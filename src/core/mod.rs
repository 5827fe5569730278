//! Message domain types: payloads, addresses, dates and hydrated records

pub mod address;
pub mod dates;
pub mod degraded;
pub mod message;
pub mod paths;
pub mod payload;
pub mod schema;
