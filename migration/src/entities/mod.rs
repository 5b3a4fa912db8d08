pub mod access_log;
pub mod short_link;

pub use access_log::Entity as AccessLogEntity;
pub use short_link::Entity as ShortLinkEntity;
