//! Runs the upload queue inside an OS-granted background window.
//!
//! [`run_window`] resumes the queue, keeps it inside the time and byte
//! budget of the window, suspends it before the window lapses, and asks
//! the [`BackgroundScheduler`] for another window when work remains.

pub mod config;
pub mod scheduler;
pub mod window;

pub use config::BackgroundConfig;
pub use scheduler::{BackgroundScheduler, ScheduleError, ScheduleRequest};
pub use window::{WindowBudget, WindowEnd, WindowReport, run_window};
