pub mod handlers;
pub mod replica;
