//! Wire protocol shared by the controller and agents.
//!
//! Every message is a single compact JSON object followed by `\n`:
//!
//! ```json
//! {"action":"ping"}
//! {"action":"open_app","app":"firefox"}
//! {"action":"message","content":"Lab closing in 5 minutes"}
//! ```
//!
//! - `command`: the [`Command`](command::Command) envelope and its
//!   [`Action`](command::Action) tag.
//! - `codec`: line framing with a per-line size cap.

pub mod codec;
pub mod command;

pub use codec::{encode_line, CommandCodec};
pub use command::{Action, Command};
