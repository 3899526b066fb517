pub mod hosts;
pub mod jobs;
pub mod load;
pub mod services;
