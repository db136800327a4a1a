pub mod guard;
pub mod http;
pub mod objects;

pub use guard::{ensure_named_host, literal_ip_host};
pub use http::HttpFetcher;
pub use objects::{ClientFactory, ObjectStoreFetcher, S3Settings};
