pub mod api_key;
pub mod signature;
pub mod token;
