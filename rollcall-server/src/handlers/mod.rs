pub mod attendance;
pub mod health;
pub mod live;

pub use attendance::submit_attendance_handler;
pub use health::health_handler;
pub use live::live_attendance_handler;
