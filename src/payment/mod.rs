pub mod coordinator;
pub mod facilitator_client;
