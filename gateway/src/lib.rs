pub mod alert;
pub mod chat;
pub mod codec;
pub mod config;
pub mod errors;
pub mod handler;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod notify;
pub mod rest;
pub mod series;
pub mod storage;
pub mod telegram;
pub mod watchdog;
