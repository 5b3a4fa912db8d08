pub mod analytics;
pub mod generate;
pub mod health;
pub mod redirect;

pub use analytics::AnalyticsApi;
pub use generate::GenerateService;
pub use health::{AppStartTime, HealthService};
pub use redirect::{RedirectService, redirect_routes};
