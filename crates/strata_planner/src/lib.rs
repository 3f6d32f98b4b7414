pub mod analysis;
pub mod config;
pub mod datatype;
pub mod explain;
pub mod expr;
pub mod fragment;
pub mod ids;
pub mod plan;
pub mod planner;
pub mod request;
pub mod storage;

#[cfg(test)]
mod testutil;
