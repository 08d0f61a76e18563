pub mod archive;
pub mod command;
pub mod function_url;
pub mod identity;
pub mod output_store;
