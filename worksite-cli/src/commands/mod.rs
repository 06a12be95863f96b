pub mod create;
pub mod destroy;
pub mod infra;
pub mod list;
pub mod project;
pub mod run;
pub mod switch;
