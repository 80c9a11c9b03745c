pub mod app;
pub mod catalog;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod http;
pub mod ledger;
pub mod lock;
pub mod mover;
pub mod output;
pub mod planner;
pub mod publisher;
pub mod resolver;
pub mod sheets;
pub mod spaces;
pub mod tui;
