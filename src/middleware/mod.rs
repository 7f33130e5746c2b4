pub mod active_measure;
pub mod request_id;

pub use active_measure::active_measure_middleware;
pub use request_id::{make_span_with_request_id, request_id_middleware, RequestId};
