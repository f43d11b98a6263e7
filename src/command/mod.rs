pub mod args;
pub mod env;
pub mod id;
pub mod run;
