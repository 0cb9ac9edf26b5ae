pub mod browser;
pub mod extractor;
pub mod fetcher;
pub mod http;
pub mod pagination;
pub mod site;
pub mod traits;
pub mod types;

pub use browser::{BrowserTransport, BrowserTransportFactory};
pub use extractor::CardExtractor;
pub use fetcher::{PageFetcher, RetryPolicy};
pub use http::{HttpTransport, HttpTransportFactory};
pub use site::Site;
pub use traits::{Transport, TransportFactory};
pub use types::{ListingFilter, PropertyCategory, SellerType};
