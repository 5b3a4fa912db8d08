use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{Responder, web};
use tracing::{error, warn};

use crate::api::response::{error_from_octolink, error_response, success_response};
use crate::services::{GenerateRequest, LinkService};

pub struct GenerateService;

impl GenerateService {
    pub async fn generate(
        body: Result<web::Json<GenerateRequest>, actix_web::Error>,
        links: web::Data<Arc<LinkService>>,
    ) -> impl Responder {
        let req = match body {
            Ok(body) => body.into_inner(),
            Err(e) => {
                warn!("Rejected generate request body: {}", e);
                return error_response(StatusCode::BAD_REQUEST, format!("Invalid request: {}", e));
            }
        };

        match links.generate(req).await {
            Ok(link) => success_response(links.render(&link)),
            Err(e) => {
                if e.is_client_error() {
                    warn!("Generate rejected: {}", e);
                } else {
                    error!("Generate failed: {}", e);
                }
                error_from_octolink(&e)
            }
        }
    }
}
