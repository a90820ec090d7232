pub mod consumer;
pub mod handlers;
pub mod parser;
pub mod projection;
