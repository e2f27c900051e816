//! Michinoeki - roadside station directory builder.
//!
//! This library provides functionality for:
//! - Scraping the nationwide michi-no-eki listing, prefecture by prefecture
//! - Geocoding station addresses with a fallback query chain
//! - Reconciling results against the previous registry and reporting drift
//! - Exporting the registry as GeoJSON

pub mod config;
pub mod console;
pub mod error;
pub mod export;
pub mod geocoder;
pub mod normalize;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod scrapers;
pub mod station;

// Re-export commonly used types
pub use config::Config;
pub use console::Console;
pub use error::{ConfigError, ExportError, GeocodeError, PipelineError, RegistryError, ScraperError};
pub use geocoder::{Geocoder, create_geocoder};
pub use pipeline::{Pipeline, PipelineConfig, RunReport, RunWarning};
pub use registry::StationRegistry;
pub use resolver::{ResolveWarning, Resolver};
pub use scrapers::{HttpPageSource, PageSource};
pub use station::{Coordinates, Prefecture, Station, StationKey};
