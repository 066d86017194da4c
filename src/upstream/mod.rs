mod client;
mod quota;

pub use client::{AntigravityClient, CallContext, retry_after_from_parts};
pub use quota::{EndpointHealth, EndpointPool, EndpointStatusView, PickedEndpoint};
