pub mod cart_session;
pub mod request_id;

pub use cart_session::cart_session_middleware;
pub use request_id::{request_id_middleware, REQUEST_ID_HEADER};
