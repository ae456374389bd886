//! The reliable, ordered delivery core: sequencing, per-stream tables, delivery, retransmission
//!  and stability.

pub mod delivery;
pub mod delivery_policy;
pub mod departed_members;
pub mod digest;
pub mod exponential_backoff;
pub mod nakack;
pub mod nakack_config;
pub mod receiver;
pub mod retransmitter;
pub mod sender_table;
pub mod sender_tables;
pub mod seqno_range;
pub mod sequencer;
pub mod stability;
pub mod stats;
