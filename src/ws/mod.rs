pub mod broadcast;
pub mod messages;
pub mod replay;
pub mod session;
