//! Domain operations. Each mutating operation runs in one transaction
//! together with its audit entry.

pub mod activity;
pub mod approval;
pub mod attendance;
pub mod users;
