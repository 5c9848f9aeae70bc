/*!
 * Configuration
 * Global settings, endpoint parameters, and server parameters
 */

mod settings;

pub use settings::{AddressFamily, EndpointParams, GlobalSettings, ServerParams, TransportType};
