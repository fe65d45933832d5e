mod http;

pub use http::HttpClient;
