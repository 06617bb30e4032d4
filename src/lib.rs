pub mod clock;
pub mod config;
pub mod logging;
pub mod messages;
pub mod punishment;
pub mod roster;
pub mod surfaces;

pub const APP_NAME: &str = "solace_warden";
pub const ENGINE_TARGET: &str = "solace_warden::engine";
pub const GATE_TARGET: &str = "solace_warden::gate";
pub const AUDIT_TARGET: &str = "solace_warden::audit";
pub const DEGRADED_TARGET: &str = "solace_warden::degraded";
pub const BRIDGE_TARGET: &str = "solace_warden::bridge";
pub const SOCKET_TARGET: &str = "solace_warden::socket";
pub const ERROR_TARGET: &str = "solace_warden::error";
pub const CONSOLE_TARGET: &str = "solace_warden";

pub use punishment::{EnforcementGates, PunishmentEngine};
pub use surfaces::bridge::BridgeData;
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, BridgeData, Error>;
