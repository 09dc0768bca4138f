use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{self, HeaderName, HeaderValue};
use actix_web::Error;
use futures_util::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;

/// Generated initials avatars are hot-linked from this host.
pub const AVATAR_HOST: &str = "https://ui-avatars.com";

const HSTS: &str = "max-age=63072000; includeSubDomains";

/// Adds browser hardening headers to every response that does not set them itself.
#[derive(Clone)]
pub struct SecurityHeaders {
    pub enable_hsts: bool,
    csp: HeaderValue,
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self { enable_hsts: false, csp: HeaderValue::from_static("default-src 'none'") }.with_storage_origin(None)
    }
}

impl SecurityHeaders {
    pub fn from_env() -> Self {
        let enable_hsts = std::env::var("ENABLE_HSTS").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let storage = std::env::var("STORAGE_PUBLIC_URL").ok();
        Self { enable_hsts, ..Self::default() }.with_storage_origin(storage.as_deref())
    }

    pub fn with_hsts(mut self, enable: bool) -> Self {
        self.enable_hsts = enable;
        self
    }

    /// Allows images from the object store when it is served from another origin.
    pub fn with_storage_origin(mut self, public_url: Option<&str>) -> Self {
        let extra = public_url.filter(|u| u.starts_with("http")).map(|u| format!(" {}", u.trim_end_matches('/'))).unwrap_or_default();
        let policy = format!(
            "default-src 'self'; img-src 'self' data: {AVATAR_HOST}{extra}; media-src 'self'{extra}; \
             object-src 'none'; base-uri 'none'; frame-ancestors 'none'; form-action 'self'"
        );
        if let Ok(v) = HeaderValue::from_str(&policy) {
            self.csp = v;
        }
        self
    }

    fn fixed(&self) -> [(HeaderName, HeaderValue); 4] {
        [
            (header::REFERRER_POLICY, HeaderValue::from_static("no-referrer")),
            (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
            (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
            (header::X_XSS_PROTECTION, HeaderValue::from_static("0")),
        ]
    }
}

impl<S, B> Transform<S, ServiceRequest> for SecurityHeaders
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = SecurityHeadersMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SecurityHeadersMiddleware { service: Rc::new(service), cfg: self.clone() }))
    }
}

pub struct SecurityHeadersMiddleware<S> {
    service: Rc<S>,
    cfg: SecurityHeaders,
}

impl<S, B> Service<ServiceRequest> for SecurityHeadersMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // swagger ui ships inline scripts
        let is_docs = req.path().starts_with("/docs");
        let svc = self.service.clone();
        let cfg = self.cfg.clone();
        Box::pin(async move {
            let mut res = svc.call(req).await?;
            let headers = res.response_mut().headers_mut();
            if !is_docs && !headers.contains_key(header::CONTENT_SECURITY_POLICY) {
                headers.insert(header::CONTENT_SECURITY_POLICY, cfg.csp.clone());
            }
            for (name, value) in cfg.fixed() {
                if !headers.contains_key(&name) {
                    headers.insert(name, value);
                }
            }
            if cfg.enable_hsts && !headers.contains_key(header::STRICT_TRANSPORT_SECURITY) {
                headers.insert(header::STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS));
            }
            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csp_allows_avatar_host_and_remote_storage() {
        let h = SecurityHeaders::default().with_storage_origin(Some("https://cdn.example.edu/"));
        let csp = h.csp.to_str().unwrap();
        assert!(csp.contains(AVATAR_HOST));
        assert!(csp.contains("https://cdn.example.edu;") || csp.contains("https://cdn.example.edu "));
        assert!(csp.contains("frame-ancestors 'none'"));
    }

    #[test]
    fn relative_storage_url_adds_nothing() {
        let csp = SecurityHeaders::default().with_storage_origin(Some("/storage")).csp;
        assert!(!csp.to_str().unwrap().contains("/storage"));
    }
}
