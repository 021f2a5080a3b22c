pub mod common;
pub mod mutex;
pub mod network;
pub mod operator;
pub mod sim;
