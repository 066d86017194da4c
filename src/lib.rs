pub mod accounts;
pub mod config;
pub mod error;
pub mod oauth;
pub mod server;
pub mod stream;
pub mod tokens;
pub mod translate;
pub mod upstream;
pub mod utils;

pub use error::{OauthError, ProxyError};
pub use server::router::{ProxyState, proxy_router};
