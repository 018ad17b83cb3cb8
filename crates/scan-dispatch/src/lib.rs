#![deny(clippy::await_holding_refcell_ref)]

pub mod common;
pub mod config;
pub mod dispatch;
pub mod scan;
pub mod storage;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::DispatchError;
pub type Result<T> = std::result::Result<T, Error>;
