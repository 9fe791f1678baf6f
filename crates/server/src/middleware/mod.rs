pub mod identity;
pub mod request_id;

pub use identity::{Identity, TENANT_HEADER, USER_HEADER, USER_ROLE_HEADER, require_identity};
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
