mod config;
mod prompt;

pub(crate) use config::build_store;
pub(crate) use prompt::{prompt_line, prompt_password};
