pub mod auth_context;
pub mod body;
pub mod client_meta;
