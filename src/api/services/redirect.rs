use std::collections::BTreeMap;
use std::sync::Arc;

use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use tracing::{error, trace};

use crate::analytics::VisitDispatcher;
use crate::api::response::{error_from_octolink, error_response};
use crate::encoder;
use crate::errors::OctolinkError;
use crate::services::LinkService;
use crate::storage::AccessEvent;
use crate::utils::ip::client_ip;

pub struct RedirectService;

impl RedirectService {
    pub async fn handle_redirect(
        req: HttpRequest,
        path: web::Path<String>,
        links: web::Data<Arc<LinkService>>,
        dispatcher: web::Data<Arc<VisitDispatcher>>,
    ) -> impl Responder {
        // 解码不区分大小写，存储中的码统一为大写
        let code = path.into_inner().to_ascii_uppercase();

        // 非法短码直接 404，不访问任何后端
        if !encoder::is_valid(&code) {
            trace!("Invalid short code rejected: {}", code);
            return error_response(actix_web::http::StatusCode::NOT_FOUND, "Short link not found");
        }

        let query = first_query_values(req.query_string());
        let target = match links.expand_url(&code, &query).await {
            Ok(target) => target,
            Err(e) => {
                if !matches!(e, OctolinkError::NotFound(_) | OctolinkError::Expired(_)) {
                    error!("Redirect for {} failed: {}", code, e);
                }
                return error_from_octolink(&e);
            }
        };

        dispatcher.submit(AccessEvent::new(
            code.as_str(),
            client_ip(&req),
            header_str(&req, header::USER_AGENT),
            header_str(&req, header::REFERER),
        ));

        HttpResponse::Found()
            .insert_header((header::LOCATION, target))
            .finish()
    }
}

/// 每个键只取第一个值
fn first_query_values(query: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }
    params
}

fn header_str(req: &HttpRequest, name: header::HeaderName) -> String {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn redirect_routes() -> actix_web::Scope {
    web::scope("")
        .route("/{code}", web::get().to(RedirectService::handle_redirect))
        .route("/{code}", web::head().to(RedirectService::handle_redirect))
}
