//! MCP server for mailvault
//!
//! Read-only tools over the store and hybrid search, served on stdio.

mod server;

pub use server::run_mcp_server;
