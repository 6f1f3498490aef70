//! Intercepting proxies for the login and game servers.
//!
//! A client logs in through [`LoginProxy`], which relays everything to the
//! real login server except the final redirect: that one is rewritten to
//! send the client to [`GameProxy`] instead, and the ticket it carries is
//! remembered in a [`TicketCache`] along with the real game server's address.
//! When the client shows up at the game proxy with that ticket, the proxy
//! connects it to the right server and relays the rest of the session.
//!
//! Both proxies run on the same scaffolding, [`server::Listener`], which owns
//! the listening socket and every session spawned from it.
pub mod cache;
pub mod capture;
mod error;
pub mod game;
pub mod login;
pub mod relay;
pub mod server;

pub use cache::{sweep_loop, MemoryCache, TicketCache};
pub use error::{Direction, ServeError, SessionError};
pub use game::GameProxy;
pub use login::LoginProxy;
pub use server::{listen_and_serve, Handler, Listener};
