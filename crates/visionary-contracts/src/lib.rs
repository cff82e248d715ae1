pub mod artifact;
pub mod journal;
pub mod models;
pub mod studio;
pub mod vault;
