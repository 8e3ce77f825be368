pub mod chat;
pub mod clear;
pub mod history;
pub mod serve;
