pub mod call;
pub mod ping;
pub mod port;
pub mod run;
