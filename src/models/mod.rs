pub mod activity;
pub mod approval;
pub mod attendance;
pub mod response;
pub mod user;
