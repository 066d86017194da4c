mod oauth;
mod proxy;

pub use oauth::OauthError;
pub use proxy::ProxyError;

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}
