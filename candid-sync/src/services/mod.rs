//! Service layer for candid-sync

pub mod factorization;
pub mod polis_client;
pub mod producer;
