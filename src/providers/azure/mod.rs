mod client;
mod normalize;
mod provider;
mod types;

pub use provider::AzureConnector;
