//! Idsync Azure — Microsoft Entra ID (Azure AD) source connector.
//!
//! Authenticates with the OAuth2 client-credentials flow and lists the
//! filtered users and groups-with-members through the Graph API.

pub mod auth;
pub mod client;
pub mod models;
