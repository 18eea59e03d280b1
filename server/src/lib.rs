//! # Territory Capture Server Library
//!
//! Authoritative coordination engine for a live, team-based territory capture
//! game. Teams claim map territories by reporting their location and completing
//! tasks that an administrator verifies. Owning a territory accrues score over
//! time.
//!
//! ## Core Responsibilities
//!
//! ### Request Lifecycle
//! Each team may hold one capture request at a time. A request moves from
//! `pending` (location reported) to `task_assigned` (location approved) to
//! `review_pending` (evidence submitted) and is deleted on any final verdict,
//! on cancellation, or when a rival team captures the same territory.
//!
//! ### Territory Locks and Scoring
//! A captured territory is locked for 30 minutes. Locks expire lazily: they
//! are checked when the next request or capture arrives, never by a timer.
//! When ownership changes, the previous owner is credited with the seconds it
//! held the territory.
//!
//! ### Rooms
//! Every connection joins either a team room or the admin room. Game logic
//! addresses events to a connection, a team, the admins or everyone, and the
//! client manager resolves those addresses.
//!
//! ## Architecture Design
//!
//! ### Single-Consumer Event Loop
//! All inbound events are funneled through one channel into the loop that
//! owns the game state. Check-then-act sequences such as "is the territory
//! locked, then lock it" can never interleave, so two teams cannot both
//! capture the same territory and one team cannot open two requests.
//!
//! ### WebSocket Transport
//! Each frame is a JSON object `{"event": <name>, "data": <payload>}`. The
//! `shared` crate defines every event.
//!
//! ## Module Organization
//!
//! - `store`: territories, requests, scores and team sessions
//! - `territory`: capture locks, ownership transfer and score credit
//! - `game`: request state machine and conflict resolution
//! - `client_manager`: connection registry and room routing
//! - `auth`: shared-secret credential table
//! - `network`: WebSocket connections and the event loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::auth::Credentials;
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credentials = Credentials::from_json(r#"{"red": "secret", "admin": "root"}"#)?;
//!     let server = Server::bind(&ServerConfig::default(), credentials).await?;
//!
//!     // Runs until the handle from `server.handle()` requests shutdown
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
pub mod network;
pub mod store;
pub mod territory;
pub mod utils;
