//! OpenAPI documentation for the HTTP surface.

use crawlq_core::ErrorResponse;
use crawlq_jobs::{
    DeadLetterRecord, EnqueueReceipt, EnqueueRequest, HealthReport, Job, JobStatus,
    MetricsSnapshot, QueueMode,
};
use utoipa::OpenApi;

/// OpenAPI documentation for the crawlq API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "crawlq API",
        version = "0.1.0",
        description = "Resilient job queue with a durable Redis mode and an in-memory fallback",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    paths(
        crate::controllers::queue_controller::enqueue,
        crate::controllers::queue_controller::metrics,
        crate::controllers::queue_controller::dead_letters,
        crate::controllers::health_controller::health_check,
        crate::controllers::health_controller::liveness_check,
    ),
    components(
        schemas(
            ErrorResponse,
            EnqueueRequest,
            EnqueueReceipt,
            MetricsSnapshot,
            HealthReport,
            QueueMode,
            Job,
            JobStatus,
            DeadLetterRecord,
        )
    ),
    tags(
        (name = "queue", description = "Enqueue, metrics and dead-letter endpoints"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;
