pub mod health;
pub mod route;
pub mod sessions;
pub mod stats;
pub mod use_cases;
