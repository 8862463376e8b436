//! Git integration via the `git` CLI.

mod auth;
mod repository;
mod url;

pub use auth::{build_auth_env, AuthEnv, GitCredentials};
pub use repository::GitRepository;
pub use url::{is_remote_reference, parse_git_url, GitUrl};
