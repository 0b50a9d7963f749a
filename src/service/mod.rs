//! External collaborators of the handshake coordinator: login services,
//! session storage, and the ticket resumption service.

pub mod login;
pub mod tickets;
