pub mod api;
pub mod config;
pub mod history;
pub mod housekeeping;
pub mod presence;
pub mod simulate;
pub mod typing;
