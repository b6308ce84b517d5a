pub mod check;
pub mod init;
pub mod list;
pub mod progress;
pub mod run;
pub mod validate;
