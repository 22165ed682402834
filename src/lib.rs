pub mod config;
pub mod coords;
pub mod crawler;
pub mod extract;
pub mod fetch;
pub mod ids;
pub mod model;
pub mod modes;
pub mod repair;
pub mod store;
pub mod times;
pub mod writer;
