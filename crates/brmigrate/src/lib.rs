//! brmigrate - move a live interface's Layer-3 state onto a bridge
//!
//! Turns a physical NIC into a bridge port without losing its addresses or
//! routes: the bridge takes over the NIC's MAC, MTU, addresses, default and
//! on-link routes, then the NIC is enslaved. Every run is idempotent and can
//! be traced without touching the host (`--dry-run`).

mod address;
mod bridge;
mod config;
mod enslave;
mod gate;
mod host;
mod inspect;
mod migrator;
mod plan;
mod route;
mod tuning;

pub use bridge::*;
pub use config::*;
pub use gate::*;
pub use host::IprouteBackend;
pub use inspect::*;
pub use migrator::{build_plan, MigrationReport, Migrator};
pub use plan::*;
pub use tuning::plan_tuning;

pub use address::plan_addresses;
pub use enslave::plan_enslavement;
pub use route::plan_routes;
