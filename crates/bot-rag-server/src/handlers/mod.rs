pub mod chat;
pub mod commands;
pub mod conversations;
pub mod feedback;
pub mod health;
pub mod knowledge;
