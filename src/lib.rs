pub mod config;
pub mod content;
pub mod hotnews;
pub mod image;
pub mod model;
pub mod publisher;
pub mod runner;
pub mod weixin;
