// RADIUS Change-of-Authorization channel.

pub mod packet;
mod sender;

pub use sender::CoaSender;
