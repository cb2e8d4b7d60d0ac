//! Sessions of the parties the relay talks to.

mod app;
mod player;
mod players;
mod server;

pub use app::App;
pub use player::{Player, PlayerInfo};
pub use players::Players;
pub use server::Server;
