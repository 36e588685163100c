//! Credential providers for remote caches

pub mod aws;
pub mod github;

pub use aws::AwsCredentials;
pub use github::GithubCredentials;
