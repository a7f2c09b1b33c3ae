//! Finding post URLs on a site: sitemaps, paginated listings, content APIs,
//! and archived mirrors.

pub mod api;
pub mod discovery;
pub mod pagination;
pub mod sitemap;
