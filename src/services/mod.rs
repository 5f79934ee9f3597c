pub mod derivative;
pub mod media_index;
pub mod media_service;
pub mod naming;
