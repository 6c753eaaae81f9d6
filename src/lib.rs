pub mod app;
pub mod cli;
pub mod prober;
pub mod rpc;
