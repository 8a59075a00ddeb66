#![deny(dead_code)]
#![deny(unused_imports)]

pub mod boost;
pub mod config;
pub mod data;
pub mod features;
pub mod glm;
pub mod importance;
pub mod metrics;
pub mod mlp;
pub mod models;
pub mod recipe;
pub mod report;
pub mod resample;
pub mod split;
pub mod tuning;
pub mod types;
pub mod workflow;
