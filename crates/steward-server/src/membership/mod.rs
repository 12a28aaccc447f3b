//! Membership
//!
//! Keepalives received on `PUT /ping` become TTL-leased records under
//! `pods/<key>`, each carrying a sequence number assigned on first sighting.

mod record;
mod sequence;
mod writer;

pub use record::{entity_key, Keepalive, MembershipRecord};
pub use sequence::next_sequence;
pub use writer::{MembershipMessage, MembershipWriter, WriterState};
