//! OpenConv shared library — types, IDs, and API contracts shared between server and client.

pub mod api;
pub mod constants;
pub mod error;
pub mod ids;
