pub mod chat;
pub mod health;
pub mod response;

pub use response::ApiResponse;
