pub mod ai_client;
pub mod cache;
pub mod clustering;
pub mod error;
pub mod hierarchy;
pub mod keywords;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod settings;
pub mod source;
pub mod summary;
pub mod utils;

pub use cache::{CacheStatus, ClusterReport, ResultCache};
pub use error::PipelineError;
pub use models::{Cluster, ClusterBody, Item};
pub use pipeline::{Pipeline, TopicService};
pub use source::{Credentials, ItemSource};
