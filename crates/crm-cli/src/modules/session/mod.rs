mod actions;
pub(crate) mod args;
mod format;

pub(crate) use actions::{handle_session_command, handle_watch};
pub(crate) use format::{print_session, print_session_table};
