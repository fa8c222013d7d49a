pub mod interface;
pub mod sqlite;
