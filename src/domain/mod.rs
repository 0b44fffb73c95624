pub mod booking;
pub mod clock;
pub mod countdown;
pub mod journal;
pub mod refresh;
pub mod settings;
pub mod simulator;
pub mod utils;
