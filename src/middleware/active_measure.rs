use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::server::ActiveMeasure;

struct InFlight<'a>(&'a ActiveMeasure);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Counts the request as active until its response is produced or the call is dropped
pub async fn active_measure_middleware(
    State(measure): State<ActiveMeasure>,
    request: Request,
    next: Next,
) -> Response {
    measure.inc();
    let _in_flight = InFlight(&measure);
    next.run(request).await
}
