//! Service layer: metadata catalog, deletion reconciliation, the remote
//! object-store client and the speech-synthesis task manager.

pub mod catalog_service;
pub mod oss_client;
pub mod reconcile_service;
pub mod tts_service;
