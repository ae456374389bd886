//! Reliable, ordered multicast delivery for a group of cluster members.
//!
//! Every member sequences the messages it sends, and every receiver keeps one table per sender
//!  stream. Gaps in a table are detected and re-requested from the original sender (negative
//!  acknowledgement), contiguous runs are delivered in order, and messages flagged as
//!  out-of-band skip the ordering. Periodic stability rounds exchange digests of what every
//!  member has delivered, allowing all members to purge messages that nobody will ever ask for
//!  again.
//!
//! The membership view and the actual network transport are supplied from the outside, see
//!  [membership::Membership] and [messaging::transport::Transport].

pub mod messaging;
pub mod membership;
pub mod nakack;
pub mod util;
pub mod test_util;

