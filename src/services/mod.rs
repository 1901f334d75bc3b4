pub mod auth_service;
pub mod key_rotation;
pub mod refresh_ledger;
pub mod token_service;
