// camrelay Server Library
// Provisions paired source/virtual camera paths on MediaMTX

pub mod models;
pub mod services;
