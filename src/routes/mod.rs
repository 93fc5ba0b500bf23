pub mod activities;
pub mod attendance;
pub mod auth;
pub mod extract;
pub mod health;
pub mod users;
