//! The `broker` module holds the delivery stages run on the broker side.
//!
//! A `DeliverEvent` names a stored message. `DeliverPreHandler` loads it,
//! works out which subscriber groups still need it and packs it for the
//! wire; `DeliverHandler` then hands the packet to the remoting stage aimed
//! at those groups.

pub mod deliver;
pub mod deliver_pre;
pub mod event;

pub use deliver::DeliverHandler;
pub use deliver_pre::{DeliverPreHandler, resolve_groups};
pub use event::DeliverEvent;
