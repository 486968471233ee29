//! HTTP controller: maps the scheduler's operations onto routes.
//!
//! | Route | Success | Failures |
//! |---|---|---|
//! | `POST /enqueue` | `202` `{"status":"accepted","id":..}` | `400` bad JSON or fields, `409` duplicate, `503` pool refused |
//! | `GET /status?id=` | `200` `{"id":..,"status":..,"retries":..}` | `400` no id, `404` unknown |
//! | `GET /healthz` | `200` `OK` | |

use std::sync::Arc;

use serde::Serialize;

use crate::context::Context;
use crate::http::{Response, StatusCode};
use crate::router::Router;
use crate::scheduler::{Scheduler, SchedulerError};
use crate::task::{NewTask, TaskStatus};

#[derive(Debug, Serialize)]
struct Accepted<'a> {
    status: &'static str,
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct StatusBody<'a> {
    id: &'a str,
    status: TaskStatus,
    retries: u32,
}

/// Builds the router for the task API backed by `scheduler`.
pub fn routes(scheduler: Arc<Scheduler>) -> Router {
    let mut router = Router::new();

    let enqueue_scheduler = Arc::clone(&scheduler);
    router.post("/enqueue", move |ctx: Context| {
        let scheduler = Arc::clone(&enqueue_scheduler);
        async move { enqueue(&scheduler, &ctx) }
    });

    router.get("/status", move |ctx: Context| {
        let scheduler = Arc::clone(&scheduler);
        async move { status(&scheduler, &ctx) }
    });

    router.get("/healthz", |_ctx: Context| async {
        Response::text(StatusCode::Ok, "OK")
    });

    router
}

fn enqueue(scheduler: &Scheduler, ctx: &Context) -> Response {
    let new = match ctx.json::<NewTask>() {
        Ok(new) => new,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting undecodable enqueue body");
            return Response::text(StatusCode::BadRequest, "Invalid JSON");
        }
    };

    match scheduler.enqueue(new) {
        Ok(task) => Response::json(
            StatusCode::Accepted,
            &Accepted {
                status: "accepted",
                id: task.id(),
            },
        ),
        Err(SchedulerError::Invalid(_)) => {
            Response::text(StatusCode::BadRequest, "Missing required fields")
        }
        Err(e @ SchedulerError::Duplicate { .. }) => {
            Response::text(StatusCode::Conflict, e.to_string())
        }
        Err(e @ SchedulerError::Submit { .. }) => {
            Response::text(StatusCode::ServiceUnavailable, e.to_string())
        }
        Err(e @ SchedulerError::Store(_)) => {
            Response::text(StatusCode::InternalServerError, e.to_string())
        }
    }
}

fn status(scheduler: &Scheduler, ctx: &Context) -> Response {
    let Some(id) = ctx.query("id").filter(|id| !id.is_empty()) else {
        return Response::text(StatusCode::BadRequest, "Missing id parameter");
    };

    match scheduler.task(id) {
        Some(task) => {
            let (status, retries) = task.snapshot();
            Response::json(
                StatusCode::Ok,
                &StatusBody {
                    id: task.id(),
                    status,
                    retries,
                },
            )
        }
        None => Response::text(StatusCode::NotFound, "Task not found"),
    }
}
