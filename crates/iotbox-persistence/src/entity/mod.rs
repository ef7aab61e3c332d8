//! `SeaORM` entities

pub mod port_connection;
pub mod reading;
