pub mod audit;
pub mod broker;
pub mod jobs;
pub mod storage;
