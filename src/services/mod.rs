pub mod credentials;
pub mod orchestrator;
pub mod post_policy;
pub mod progress;
pub mod submission;
pub mod upload;
