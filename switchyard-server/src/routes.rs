use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    AppState,
    handlers::{hosts, jobs, load, services},
};

/// Every route lives under `/services`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/services", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Hosts
        .route(
            "/hosts",
            get(hosts::list_hosts)
                .post(hosts::register_host)
                .delete(hosts::unregister_host),
        )
        .route("/hosts/enable", post(hosts::enable_host))
        .route("/hosts/disable", post(hosts::disable_host))
        .route("/hosts/maintenance", post(hosts::set_maintenance))
        // Services
        .route(
            "/services",
            get(services::list_services)
                .post(services::register_service)
                .delete(services::unregister_service),
        )
        .route("/services/sanitize", post(services::sanitize_service))
        .route("/health", get(services::health))
        // Jobs
        .route("/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route("/jobs/active", get(jobs::active_jobs))
        .route("/jobs/count", get(jobs::count_jobs))
        .route("/jobs/count/hosts", get(jobs::count_by_host))
        .route("/jobs/count/operations", get(jobs::count_by_operation))
        .route("/jobs/priority", get(jobs::priority_list))
        .route("/jobs/remove-parentless", post(jobs::remove_parentless))
        .route(
            "/jobs/{id}",
            get(jobs::get_job)
                .put(jobs::update_job)
                .delete(jobs::delete_job),
        )
        .route("/jobs/{id}/cancel", post(jobs::cancel_job))
        .route("/jobs/{id}/children", get(jobs::child_jobs))
        // Load
        .route("/load/current", get(load::current_load))
        .route("/load/max", get(load::max_loads))
        .route("/load/own", get(load::own_load))
}
