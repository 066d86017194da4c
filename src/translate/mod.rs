mod args;
mod request;
mod response;
mod schema;

pub use args::{UserContext, parse_function_args, repair_args};
pub use request::{build_upstream_request, session_id_for_client};
pub use response::{fresh_message_id, fresh_tool_use_id, map_stop_reason, message_from_response};
pub use schema::{CoercedTool, coerce_tools};
