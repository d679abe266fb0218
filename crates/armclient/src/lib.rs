//! # Armclient
//!
//! Blocking [`converge::Provider`] implementation for an ARM-style REST API.
//!
//! ```no_run
//! use armclient::{ArmConfig, ArmProvider};
//! use converge::Provider;
//!
//! let config = ArmConfig::new("https://management.example.com", "2024-07-01")
//!     .with_token_from_env("VMCONVERGE_TOKEN")?;
//! let provider = ArmProvider::new(config)?;
//! let state = provider.fetch_state(&"/subscriptions/s1/resourceGroups/rg/providers/Compute/virtualMachines/web-0".into())?;
//! println!("{}", state.configuration.name);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod client;
pub mod wire;

pub use client::{ArmConfig, ArmProvider, ConfigError, resource_url};
