//! Session stdio and the cooperative input reader (§4.4).

pub mod input;
pub mod stdio;

pub use input::SessionInput;
pub use stdio::SessionStdio;
