pub mod fanout;
pub mod health;
pub mod routes;
