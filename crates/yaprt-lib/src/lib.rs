pub mod error;
pub use error::Result;
pub use error::Error;

pub mod retry;
pub use retry::RetryPolicy;

pub mod process;
pub mod vcs;

pub mod git_link;
pub use git_link::GitLink;

pub mod requirement;
pub use requirement::RequirementSpec;
pub mod scanner;

pub mod report;
pub use report::Report;

pub mod reconciler;
pub use reconciler::Reconciler;
pub mod partition;
pub use partition::BuildSet;

pub mod walker;
pub use walker::Walker;
pub mod remote;
pub mod store;

pub mod builder;
pub use builder::WheelBuilder;
pub mod html_index;

pub mod config;
pub use config::Config;

pub mod pipeline;
