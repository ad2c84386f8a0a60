pub mod files;
pub mod liveness;
pub mod readiness;
pub mod search;
