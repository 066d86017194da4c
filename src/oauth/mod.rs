mod discovery;
mod endpoints;
mod login;

pub use discovery::discover_project_id;
pub use endpoints::{GoogleOauthEndpoints, OauthTokenResponse, oauth_http_client};
pub use login::login;
