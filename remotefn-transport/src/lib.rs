pub mod transport;
#[cfg(feature = "reqwest-fetch")]
pub mod http;

pub use transport::{
    Fetch, FetchResponse, RequestInit, TransportError, PATHNAME_HEADER, SEARCH_HEADER,
};
#[cfg(feature = "reqwest-fetch")]
pub use http::ReqwestFetch;
