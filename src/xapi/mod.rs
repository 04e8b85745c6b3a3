// X v2 API integration: wire types, rate limiting, and the client.

pub mod client;
pub mod limits;
pub mod traits;
pub mod types;
