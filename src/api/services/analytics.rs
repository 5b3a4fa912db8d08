use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{Responder, web};
use tracing::{error, trace};

use crate::api::response::{error_from_octolink, error_response, success_response};
use crate::encoder;
use crate::errors::OctolinkError;
use crate::services::{AnalyticsService, LinkService};

pub struct AnalyticsApi;

impl AnalyticsApi {
    pub async fn get_analytics(
        path: web::Path<String>,
        links: web::Data<Arc<LinkService>>,
        analytics: web::Data<Arc<AnalyticsService>>,
    ) -> impl Responder {
        // 解码不区分大小写，存储中的码统一为大写
        let code = path.into_inner().to_ascii_uppercase();
        if !encoder::is_valid(&code) {
            trace!("Analytics for invalid code rejected: {}", code);
            return error_response(StatusCode::NOT_FOUND, "Short link not found");
        }

        match links.resolve(&code).await {
            Ok(_) => {}
            Err(OctolinkError::NotFound(_) | OctolinkError::Expired(_)) => {
                return error_response(StatusCode::NOT_FOUND, "Short link not found");
            }
            Err(e) => {
                error!("Resolving {} for analytics failed: {}", code, e);
                return error_from_octolink(&e);
            }
        }

        success_response(analytics.get_analytics(&code).await)
    }
}
