// Session engine: everything between "user gave us a path" and "the editor
// closed the file" lives here.

pub mod client;
pub mod config;
pub mod error;
pub mod lock;
pub mod protocol;
pub mod registry;
pub mod sink;
