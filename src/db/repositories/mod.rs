pub mod api_key;
pub mod server;
pub mod user;
