pub mod poller;
pub mod refresh_scheduler;
pub mod search_window;
