pub mod api_key;
pub mod outcome;
pub mod paging;
pub mod session;
pub mod user;
