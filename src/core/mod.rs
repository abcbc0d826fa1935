pub mod command;
pub mod history;

pub use command::{parse_timestamp, Command, CommandTime};
pub use history::History;
